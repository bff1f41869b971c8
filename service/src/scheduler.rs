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


//! Continuation scheduler
//!
//! The scheduler starts each connection's continuation on accept and resumes it at most
//! once per tick: after a self-requested delay elapses, or with one queued command line.
//! Connections with queued commands are serviced in a freshly shuffled order every tick so
//! no id gets a systematic head start.

use crate::connection::Connection;
use crate::extra::{DEFAULT_PROMPT, Prompt};
use crate::host::{Host, ServerState};
use crate::script::{Outcome, Script, Value};
use crate::types::{ConnectionId, ConnectionState};
use metrics::counter;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, error};

/// Drives continuations through the delay, command and prompt passes
pub struct Scheduler {
    rng: StdRng,
    resumed: HashSet<ConnectionId>,
}

impl Scheduler {
    /// Create a scheduler seeded from the operating system
    pub fn new() -> Scheduler {
        Scheduler {
            rng: StdRng::from_entropy(),
            resumed: HashSet::new(),
        }
    }

    /// Create a scheduler with a fixed shuffle sequence
    pub fn with_seed(seed: u64) -> Scheduler {
        Scheduler {
            rng: StdRng::seed_from_u64(seed),
            resumed: HashSet::new(),
        }
    }

    /// Opens and starts the continuation of a newly inserted connection
    pub fn start(
        &mut self,
        state: &mut ServerState,
        script: &mut dyn Script,
        id: ConnectionId,
        now: Instant,
    ) {
        let Some(connection) = state.connections.get_mut(id) else {
            return;
        };
        connection.set_continuation(script.open(id));
        invoke(state, id, vec![Value::Connection(id)], now, Entry::Start);
    }

    /// Resumes a connection's continuation with `args`
    pub fn resume(&mut self, state: &mut ServerState, id: ConnectionId, args: Vec<Value>, now: Instant) {
        self.resumed.insert(id);
        invoke(state, id, args, now, Entry::Resume);
    }

    /// Reopens delayed connections whose deadline has passed, resuming self-delayed ones
    pub fn run_delays(&mut self, state: &mut ServerState, now: Instant) {
        self.resumed.clear();
        for id in state.connections.ids() {
            let wake = state
                .connections
                .get_mut(id)
                .is_some_and(|connection| connection.wake(now));
            if wake {
                debug!(connection_id = %id, "delay elapsed");
                self.resume(state, id, Vec::new(), now);
            }
        }
    }

    /// Delivers one queued line to every open connection not yet resumed this tick
    pub fn run_commands(&mut self, state: &mut ServerState, now: Instant) {
        let mut ready: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|connection| {
                connection.state() == ConnectionState::Open
                    && !connection.commands().is_empty()
                    && !self.resumed.contains(&connection.id())
            })
            .map(Connection::id)
            .collect();
        ready.shuffle(&mut self.rng);

        for id in ready {
            let line = match state.connections.get_mut(id) {
                Some(connection) if connection.state() == ConnectionState::Open => {
                    connection.pop_command()
                }
                _ => None,
            };
            if let Some(line) = line {
                self.resume(state, id, vec![Value::Text(line)], now);
            }
        }
    }

    /// Sends prompts to open connections that owe one
    pub fn send_prompts(&mut self, state: &mut ServerState, now: Instant) {
        for id in state.connections.ids() {
            let prompt = match state.connections.get_mut(id) {
                Some(connection)
                    if connection.state() == ConnectionState::Open && connection.needs_prompt() =>
                {
                    connection.extra_mut().take_prompt()
                }
                _ => continue,
            };

            let text = match prompt {
                Some(Prompt::Text(text)) => {
                    restore_prompt(state, id, Prompt::Text(text.clone()));
                    Ok(text)
                }
                Some(Prompt::Callback(mut callback)) => {
                    let result = {
                        let mut host = Host::new(state, now, Some(id));
                        callback(&mut host, id)
                    };
                    restore_prompt(state, id, Prompt::Callback(callback));
                    result
                }
                None => Ok(DEFAULT_PROMPT.to_string()),
            };

            let Some(connection) = state.connections.get_mut(id) else {
                continue;
            };
            match text {
                Ok(text) => connection.send_prompt(&text),
                Err(err) => {
                    error!(connection_id = %id, "prompt callback failed: {err}");
                    connection.close();
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("resumed", &self.resumed.len())
            .finish_non_exhaustive()
    }
}

fn restore_prompt(state: &mut ServerState, id: ConnectionId, prompt: Prompt) {
    if let Some(connection) = state.connections.get_mut(id) {
        connection.extra_mut().restore_prompt(prompt);
    }
}

#[derive(Clone, Copy)]
enum Entry {
    Start,
    Resume,
}

fn invoke(state: &mut ServerState, id: ConnectionId, args: Vec<Value>, now: Instant, entry: Entry) {
    let Some(connection) = state.connections.get_mut(id) else {
        return;
    };
    let Some(mut continuation) = connection.take_continuation() else {
        error!(connection_id = %id, "connection has lost its continuation");
        connection.close();
        return;
    };

    let outcome = {
        let mut host = Host::new(state, now, Some(id));
        match entry {
            Entry::Start => continuation.start(&mut host, args),
            Entry::Resume => continuation.resume(&mut host, args),
        }
    };

    let Some(connection) = state.connections.get_mut(id) else {
        return;
    };
    connection.set_continuation(continuation);
    settle(connection, outcome, now);
}

fn settle(connection: &mut Connection, outcome: Outcome, now: Instant) {
    let delay = outcome.delay();
    match outcome {
        Outcome::Terminated => {
            debug!(connection_id = %connection.id(), "script terminated");
            connection.drain();
        }
        Outcome::Errored(message) => {
            error!(connection_id = %connection.id(), "error in script: {message}");
            counter!("pulsemud.scripts.errors").increment(1);
            connection.drain();
        }
        Outcome::Yielded(_) => {
            if let Some(secs) = delay {
                connection.delay(secs, now, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionLimits;
    use crate::script::{Continuation, continuation};
    use crate::testing::MockSocket;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn insert(state: &mut ServerState) -> (ConnectionId, MockSocket) {
        let id = state.connections.allocate_id();
        let socket = MockSocket::new();
        state.connections.insert(Connection::new(
            id,
            Box::new(socket.clone()),
            "127.0.0.1:1".parse().unwrap(),
            &ConnectionLimits::default(),
        ));
        (id, socket)
    }

    struct Scripted<F>(F);

    impl<F> Script for Scripted<F>
    where
        F: FnMut(ConnectionId) -> Box<dyn Continuation>,
    {
        fn open(&mut self, id: ConnectionId) -> Box<dyn Continuation> {
            (self.0)(id)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_receives_own_id() {
        let mut state = ServerState::default();
        let (id, _socket) = insert(&mut state);
        let mut script = Scripted(|_id| {
            continuation(|host, args| {
                let me = args.first().and_then(Value::as_connection);
                assert_eq!(me, host.current());
                Outcome::Yielded(Vec::new())
            })
        });
        Scheduler::with_seed(1).start(&mut state, &mut script, id, Instant::now());
        assert_eq!(state.connections.get(id).unwrap().state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_and_error_drain() {
        let mut state = ServerState::default();
        let (done, _a) = insert(&mut state);
        let (failed, _b) = insert(&mut state);
        let mut script = Scripted(move |id| {
            if id == done {
                continuation(|_host, _args| Outcome::Terminated)
            } else {
                continuation(|_host, _args| Outcome::Errored("bad".into()))
            }
        });
        let mut scheduler = Scheduler::with_seed(1);
        let now = Instant::now();
        scheduler.start(&mut state, &mut script, done, now);
        scheduler.start(&mut state, &mut script, failed, now);
        assert_eq!(state.connections.get(done).unwrap().state(), ConnectionState::Draining);
        assert_eq!(state.connections.get(failed).unwrap().state(), ConnectionState::Draining);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_missing_continuation_closes() {
        let mut state = ServerState::default();
        let (id, _socket) = insert(&mut state);
        Scheduler::with_seed(1).resume(&mut state, id, Vec::new(), Instant::now());
        assert!(state.connections.get(id).unwrap().is_closed());
        assert!(logs_contain("connection has lost its continuation"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_delay_resumes_once_without_args() {
        let mut state = ServerState::default();
        let (id, _socket) = insert(&mut state);
        let resumes = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&resumes);
        let mut script = Scripted(move |_id| {
            let log = Rc::clone(&log);
            let mut started = false;
            continuation(move |_host, args| {
                if started {
                    log.borrow_mut().push(args);
                    Outcome::Yielded(Vec::new())
                } else {
                    started = true;
                    Outcome::Yielded(vec![Value::Number(1.0)])
                }
            })
        });

        let mut scheduler = Scheduler::with_seed(1);
        let start = Instant::now();
        scheduler.start(&mut state, &mut script, id, start);
        assert_eq!(state.connections.get(id).unwrap().state(), ConnectionState::Delaying);

        scheduler.run_delays(&mut state, start + Duration::from_millis(900));
        assert!(resumes.borrow().is_empty());
        scheduler.run_delays(&mut state, start + Duration::from_secs(1));
        scheduler.run_delays(&mut state, start + Duration::from_secs(2));
        assert_eq!(*resumes.borrow(), vec![Vec::<Value>::new()]);
        assert_eq!(state.connections.get(id).unwrap().state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_command_per_connection_per_tick() {
        let mut state = ServerState::default();
        let (id, socket) = insert(&mut state);
        let mut script = Scripted(|_id| {
            continuation(|host, args| {
                if let (Some(id), Some(Value::Text(line))) = (host.current(), args.first()) {
                    let _ = host.send(id, &format!("[{line}]"));
                }
                Outcome::Yielded(Vec::new())
            })
        });
        let mut scheduler = Scheduler::with_seed(1);
        let now = Instant::now();
        scheduler.start(&mut state, &mut script, id, now);

        socket.push_input(b"a\nb\nc\n");
        state.connections.get_mut(id).unwrap().receive();
        scheduler.run_delays(&mut state, now);
        scheduler.run_commands(&mut state, now);
        assert_eq!(state.connections.get(id).unwrap().commands().len(), 2);

        scheduler.run_delays(&mut state, now);
        scheduler.run_commands(&mut state, now);
        scheduler.run_delays(&mut state, now);
        scheduler.run_commands(&mut state, now);
        state.connections.get_mut(id).unwrap().flush();
        assert_eq!(socket.take_output(), b"[a][b][c]");
    }

    fn logging_script(log: &Rc<RefCell<Vec<ConnectionId>>>) -> impl Script {
        let log = Rc::clone(log);
        Scripted(move |_id: ConnectionId| {
            let log = Rc::clone(&log);
            continuation(move |host, args| {
                if let (Some(id), Some(Value::Text(_))) = (host.current(), args.first()) {
                    log.borrow_mut().push(id);
                }
                Outcome::Yielded(Vec::new())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_connection_resumed_once_per_pass() {
        let mut state = ServerState::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut script = logging_script(&log);
        let mut scheduler = Scheduler::with_seed(3);
        let now = Instant::now();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let (id, socket) = insert(&mut state);
            scheduler.start(&mut state, &mut script, id, now);
            socket.push_input(b"a\nb\nc\n");
            state.connections.get_mut(id).unwrap().receive();
            ids.push(id);
        }

        scheduler.run_delays(&mut state, now);
        scheduler.run_commands(&mut state, now);

        let mut resumed = log.borrow().clone();
        resumed.sort();
        assert_eq!(resumed, ids);
        for id in &ids {
            assert_eq!(state.connections.get(*id).unwrap().commands().len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_order_rotates_between_passes() {
        let mut state = ServerState::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut script = logging_script(&log);
        let mut scheduler = Scheduler::with_seed(11);
        let now = Instant::now();

        let mut connections = Vec::new();
        for _ in 0..3 {
            let (id, socket) = insert(&mut state);
            scheduler.start(&mut state, &mut script, id, now);
            connections.push((id, socket));
        }

        let mut first = HashSet::new();
        for _ in 0..40 {
            for (id, socket) in &connections {
                socket.push_input(b"go\n");
                state.connections.get_mut(*id).unwrap().receive();
            }
            log.borrow_mut().clear();
            scheduler.run_delays(&mut state, now);
            scheduler.run_commands(&mut state, now);
            assert_eq!(log.borrow().len(), 3);
            first.insert(log.borrow()[0]);
        }
        assert_eq!(first.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_once_queue_empty() {
        let mut state = ServerState::default();
        let (id, socket) = insert(&mut state);
        let mut scheduler = Scheduler::with_seed(1);
        let now = Instant::now();

        state.connections.get_mut(id).unwrap().append("hello\r\n");
        scheduler.send_prompts(&mut state, now);
        scheduler.send_prompts(&mut state, now);
        state.connections.get_mut(id).unwrap().flush();
        assert_eq!(socket.take_output(), b"hello\r\n? \xFF\xF9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_callback() {
        let mut state = ServerState::default();
        let (id, socket) = insert(&mut state);
        let mut scheduler = Scheduler::with_seed(1);
        let now = Instant::now();

        let connection = state.connections.get_mut(id).unwrap();
        connection.extra_mut().insert("hp", 42.0);
        connection
            .extra_mut()
            .set_prompt(Prompt::callback(|host, id| {
                let hp = host.extra(id)?.get("hp").cloned().unwrap_or(Value::Nil);
                Ok(format!("<{hp}hp> "))
            }));
        connection.append("x");
        scheduler.send_prompts(&mut state, now);
        state.connections.get_mut(id).unwrap().flush();
        assert_eq!(socket.take_output(), b"x<42hp> \xFF\xF9");
        assert!(matches!(
            state.connections.get(id).unwrap().extra().prompt(),
            Some(Prompt::Callback(_))
        ));
    }
}
