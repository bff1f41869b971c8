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


//! Pulsemud connection service
//!
//! A single-threaded, pulse-driven Telnet server core. One task owns every socket and
//! advances the world in fixed ticks: it accepts connections, negotiates Telnet options,
//! splits input into commands and hands one command per connection per tick to a
//! scripted continuation.
//!
//! # Architecture
//!
//! ```text
//! Server (pulse loop)
//!     ↓
//! Scheduler ── Script / Continuation
//!     ↓
//! ServerState ── ConnectionTable ── Connection ── TelnetCodec
//!             ├─ TimerQueue
//!             └─ ChannelRegistry
//! ```
//!
//! Scripts only ever see a [`Host`], which borrows the state for the duration of one
//! callback. Nothing is shared across threads.
//!
//! # Example
//!
//! ```no_run
//! use pulsemud_service::{continuation, ConnectionId, Continuation, Host, Outcome, Script, Server, ServerConfig, Value};
//!
//! struct Echo;
//!
//! fn greet(host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
//!     let Some(id) = args.first().and_then(Value::as_connection) else {
//!         return Outcome::Terminated;
//!     };
//!     if let Some(line) = args.get(1).and_then(Value::as_text) {
//!         let _ = host.send(id, &format!("You said: {line}\r\n"));
//!     }
//!     match host.read(id) {
//!         Ok(outcome) => outcome,
//!         Err(err) => err.into(),
//!     }
//! }
//!
//! impl Script for Echo {
//!     fn open(&mut self, _id: ConnectionId) -> Box<dyn Continuation> {
//!         continuation(greet)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind(ServerConfig::default().with_port(4000), Echo).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod buffer;
mod channel;
mod config;
mod connection;
mod error;
mod extra;
mod host;
mod queue;
mod scheduler;
mod script;
mod server;
mod socket;
mod table;
mod timer;
mod types;

pub mod testing;

pub use buffer::Buffer;
pub use channel::{Channel, ChannelCallback, ChannelRegistry};
pub use config::{ConnectionLimits, LogLevel, MAX_PULSE_LENGTH, ServerConfig};
pub use connection::{Connection, LINE_TOO_LONG, QUEUE_FULL};
pub use error::{Result, ScriptError, ServiceError};
pub use extra::{DEFAULT_PROMPT, ExtraData, HEIGHT, Prompt, PromptCallback, WIDTH};
pub use host::{Host, ServerState};
pub use queue::CommandQueue;
pub use scheduler::Scheduler;
pub use script::{Continuation, DefaultScript, Outcome, REDEFINE_MESSAGE, Script, Value, continuation};
pub use server::Server;
pub use socket::{Listener, Socket, bind};
pub use table::ConnectionTable;
pub use timer::{TimerCallback, TimerQueue};
pub use types::{ChannelId, ConnectionId, ConnectionState, TimerId, seconds};
