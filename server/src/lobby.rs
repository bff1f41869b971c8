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


//! Built-in demonstration script
//!
//! A chat lobby: every connection picks a name, then may `say`, `who`, `wait <secs>`,
//! `quit` or `shutdown`.

use pulsemud_service::{
    ConnectionId, Continuation, Host, LogLevel, Outcome, Prompt, Script, ScriptError, Value,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

const WELCOME: &str = "Welcome to pulsemud.\r\n";
const NAME_PROMPT: &str = "By what name are you known? ";
const MAX_NAME: usize = 20;
const MAX_WAIT: f64 = 60.0;

type Names = Rc<RefCell<BTreeMap<ConnectionId, String>>>;

/// The lobby script
#[derive(Debug, Default)]
pub struct Lobby {
    names: Names,
}

impl Lobby {
    pub fn new() -> Lobby {
        Lobby::default()
    }
}

impl Script for Lobby {
    fn open(&mut self, _id: ConnectionId) -> Box<dyn Continuation> {
        Box::new(Session {
            names: Rc::clone(&self.names),
            name: None,
        })
    }

    fn on_close(&mut self, host: &mut Host<'_>, id: ConnectionId) -> Result<(), ScriptError> {
        let removed = self.names.borrow_mut().remove(&id);
        if let Some(name) = removed {
            host.log(LogLevel::Info, &format!("{name} left"));
            broadcast(host, &self.names, None, &format!("{name} has left.\r\n"))?;
        }
        Ok(())
    }
}

struct Session {
    names: Names,
    name: Option<String>,
}

impl Session {
    fn greet(&mut self, host: &mut Host<'_>, id: ConnectionId) -> Result<Outcome, ScriptError> {
        host.send(id, WELCOME)?;
        host.set_prompt(id, NAME_PROMPT)?;
        host.read(id)
    }

    fn step(&mut self, host: &mut Host<'_>, id: ConnectionId, args: &[Value]) -> Result<Outcome, ScriptError> {
        let Some(line) = args.first().and_then(Value::as_text) else {
            host.send(id, "You finish waiting.\r\n")?;
            return host.read(id);
        };
        let line = line.trim();
        match self.name.clone() {
            None => self.choose_name(host, id, line),
            Some(name) => self.command(host, id, &name, line),
        }
    }

    fn choose_name(&mut self, host: &mut Host<'_>, id: ConnectionId, name: &str) -> Result<Outcome, ScriptError> {
        if name.is_empty() || name.len() > MAX_NAME || !name.chars().all(char::is_alphanumeric) {
            host.send(id, "Names are 1 to 20 letters or digits.\r\n")?;
            return host.read(id);
        }
        let taken = self
            .names
            .borrow()
            .values()
            .any(|other| other.eq_ignore_ascii_case(name));
        if taken {
            host.send(id, "That name is taken.\r\n")?;
            return host.read(id);
        }

        self.names.borrow_mut().insert(id, name.to_string());
        self.name = Some(name.to_string());
        host.extra_mut(id)?.insert("name", name);
        host.set_prompt(
            id,
            Prompt::callback(|host, id| {
                let name = host.extra(id)?.get("name").map(ToString::to_string).unwrap_or_default();
                Ok(format!("{name}> "))
            }),
        )?;
        host.log(LogLevel::Info, &format!("{name} joined from {id}"));
        host.send(id, &format!("Hello, {name}.\r\n"))?;
        broadcast(host, &self.names, Some(id), &format!("{name} has arrived.\r\n"))?;
        host.read(id)
    }

    fn command(&mut self, host: &mut Host<'_>, id: ConnectionId, name: &str, line: &str) -> Result<Outcome, ScriptError> {
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match verb.to_ascii_lowercase().as_str() {
            "" => {}
            "say" if rest.is_empty() => host.send(id, "Say what?\r\n")?,
            "say" => {
                host.send(id, &format!("You say: {rest}\r\n"))?;
                broadcast(host, &self.names, Some(id), &format!("{name} says: {rest}\r\n"))?;
            }
            "who" => {
                let online: Vec<String> = self.names.borrow().values().cloned().collect();
                host.send(id, &format!("Online: {}\r\n", online.join(", ")))?;
            }
            "wait" => match rest.parse::<f64>() {
                Ok(secs) if secs > 0.0 && secs <= MAX_WAIT => {
                    host.send(id, "You wait.\r\n")?;
                    return host.read_with_delay(id, secs);
                }
                _ => host.send(id, "Wait how many seconds?\r\n")?,
            },
            "quit" => {
                host.send(id, "Goodbye.\r\n")?;
                return Ok(Outcome::Terminated);
            }
            "shutdown" => {
                host.log(LogLevel::Warn, &format!("shutdown requested by {name}"));
                broadcast(host, &self.names, None, "The server is shutting down.\r\n")?;
                host.shutdown();
            }
            other => host.send(id, &format!("Unknown command '{other}'.\r\n"))?,
        }
        host.read(id)
    }
}

impl Continuation for Session {
    fn start(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
        match args.first().and_then(Value::as_connection) {
            Some(id) => self.greet(host, id).unwrap_or_else(Outcome::from),
            None => Outcome::Terminated,
        }
    }

    fn resume(&mut self, host: &mut Host<'_>, args: Vec<Value>) -> Outcome {
        match host.current() {
            Some(id) => self.step(host, id, &args).unwrap_or_else(Outcome::from),
            None => Outcome::Terminated,
        }
    }
}

/// Sends `text` to every named, open connection except `except`
fn broadcast(
    host: &mut Host<'_>,
    names: &Names,
    except: Option<ConnectionId>,
    text: &str,
) -> Result<(), ScriptError> {
    let open = host.connections();
    let targets: Vec<ConnectionId> = names
        .borrow()
        .keys()
        .copied()
        .filter(|id| Some(*id) != except && open.contains(id))
        .collect();
    for target in targets {
        host.send(target, text)?;
    }
    Ok(())
}
