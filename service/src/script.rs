//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Scripting boundary
//!
//! The service does not interpret any scripting language. A deployment supplies a
//! [`Script`], which opens one [`Continuation`] per accepted connection. The scheduler
//! starts it once and resumes it with input lines; every call returns an [`Outcome`]
//! telling the host what to do next.
//!
//! Plain functions and closures work as continuations: the same function handles the start
//! call and every resume.
//!
//! ```
//! use pulsemud_service::{Continuation, Host, Outcome, Value};
//!
//! fn echo(host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
//!     let Some(id) = host.current() else {
//!         return Outcome::Errored("no connection".into());
//!     };
//!     if let Some(Value::Text(line)) = args.first() {
//!         if let Err(err) = host.send(id, &format!("You said: {line}\r\n")) {
//!             return err.into();
//!         }
//!     }
//!     Outcome::Yielded(Vec::new())
//! }
//!
//! let _boxed: Box<dyn Continuation> = Box::new(echo);
//! ```

use crate::error::{ScriptError, ServiceError};
use crate::host::Host;
use crate::types::ConnectionId;
use std::fmt;

/// Text sent by [`DefaultScript`] before it drains the connection
pub const REDEFINE_MESSAGE: &str = "You need to redefine the script's open hook.\r\n";

/// A value exchanged with script code
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Nil,
    /// A boolean
    Bool(bool),
    /// A number; delays are expressed in seconds
    Number(f64),
    /// A string
    Text(String),
    /// A connection handle
    Connection(ConnectionId),
}

impl Value {
    /// The number, if this is one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The connection handle, if this is one
    pub fn as_connection(&self) -> Option<ConnectionId> {
        match self {
            Value::Connection(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(text) => write!(f, "{text}"),
            Value::Connection(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ConnectionId> for Value {
    fn from(id: ConnectionId) -> Self {
        Value::Connection(id)
    }
}

/// Result of starting or resuming a continuation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The script finished; the connection drains
    Terminated,
    /// The script is waiting. A single positive number is a delay in seconds.
    Yielded(Vec<Value>),
    /// The script failed; the message is logged and the connection drains
    Errored(String),
}

impl Outcome {
    /// Self-requested delay carried by a yield, in seconds
    pub fn delay(&self) -> Option<f64> {
        match self {
            Outcome::Yielded(values) => match values.as_slice() {
                [Value::Number(secs)] if *secs > 0.0 => Some(*secs),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<ScriptError> for Outcome {
    fn from(err: ScriptError) -> Self {
        Outcome::Errored(err.to_string())
    }
}

impl From<ServiceError> for Outcome {
    fn from(err: ServiceError) -> Self {
        ScriptError::Service(err).into()
    }
}

/// One suspended script bound to one connection
pub trait Continuation {
    /// Called once, right after the connection is accepted, with the connection handle
    fn start(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome;

    /// Called with an input line, or with no arguments after a self-requested delay
    fn resume(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome;
}

impl<F> Continuation for F
where
    F: FnMut(&mut Host<'_>, Vec<Value>) -> Outcome,
{
    fn start(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
        self(host, args)
    }

    fn resume(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
        self(host, args)
    }
}

/// Boxes a closure as a continuation
pub fn continuation<F>(function: F) -> Box<dyn Continuation>
where
    F: FnMut(&mut Host<'_>, Vec<Value>) -> Outcome + 'static,
{
    Box::new(function)
}

/// The script collaborator installed in a [`Server`](crate::Server)
pub trait Script {
    /// Creates the continuation for a newly accepted connection
    fn open(&mut self, id: ConnectionId) -> Box<dyn Continuation>;

    /// Called once the connection is closed, while its extra data is still readable
    fn on_close(&mut self, host: &mut Host<'_>, id: ConnectionId) -> Result<(), ScriptError> {
        let _ = (host, id);
        Ok(())
    }
}

/// Script used when a deployment installs none
///
/// Every connection is told the open hook needs redefining and is then drained.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScript;

impl Script for DefaultScript {
    fn open(&mut self, _id: ConnectionId) -> Box<dyn Continuation> {
        Box::new(DefaultContinuation)
    }
}

struct DefaultContinuation;

impl Continuation for DefaultContinuation {
    fn start(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
        if let Some(id) = args.first().and_then(Value::as_connection) {
            if let Err(err) = host.send(id, REDEFINE_MESSAGE) {
                return err.into();
            }
        }
        Outcome::Terminated
    }

    fn resume(&mut self, _host: &mut Host<'_>, _args: Vec<Value>) -> Outcome {
        Outcome::Terminated
    }
}
