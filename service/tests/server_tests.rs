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


//! End-to-end tests of the pulse loop over mock sockets

use pulsemud_service::testing::{MockChannel, MockListener, MockSocket};
use pulsemud_service::{
    ConnectionId, ConnectionLimits, ConnectionState, Continuation, DefaultScript, HEIGHT, Host,
    LINE_TOO_LONG, Outcome, REDEFINE_MESSAGE, Script, ScriptError, Scheduler, Server, ServerConfig,
    ServiceError, Value, WIDTH, continuation,
};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use tokio::time::{Duration, Instant, timeout};

type Log = Rc<RefCell<Vec<String>>>;

/// Records every line it is resumed with and every closed connection
struct Recorder {
    lines: Log,
    closed: Rc<RefCell<Vec<ConnectionId>>>,
}

impl Recorder {
    fn new() -> (Recorder, Log, Rc<RefCell<Vec<ConnectionId>>>) {
        let lines = Log::default();
        let closed = Rc::default();
        let recorder = Recorder {
            lines: Rc::clone(&lines),
            closed: Rc::clone(&closed),
        };
        (recorder, lines, closed)
    }
}

impl Script for Recorder {
    fn open(&mut self, _id: ConnectionId) -> Box<dyn Continuation> {
        let lines = Rc::clone(&self.lines);
        continuation(move |host: &mut Host<'_>, args: Vec<Value>| {
            if let Some(line) = args.first().and_then(Value::as_text) {
                lines.borrow_mut().push(line.to_string());
            }
            match host.current() {
                Some(id) => host.read(id).unwrap_or_else(Outcome::from),
                None => Outcome::Terminated,
            }
        })
    }

    fn on_close(&mut self, _host: &mut Host<'_>, id: ConnectionId) -> Result<(), ScriptError> {
        self.closed.borrow_mut().push(id);
        Ok(())
    }
}

/// Builds a script from a continuation factory
struct Scripted<F>(F);

impl<F> Script for Scripted<F>
where
    F: FnMut(ConnectionId) -> Box<dyn Continuation>,
{
    fn open(&mut self, id: ConnectionId) -> Box<dyn Continuation> {
        (self.0)(id)
    }
}

fn server<S: Script + 'static>(config: ServerConfig, script: S) -> (Server<MockListener>, MockListener) {
    let listener = MockListener::new();
    let server = Server::with_listener(config, listener.clone(), script).with_scheduler(Scheduler::with_seed(7));
    (server, listener)
}

async fn ticks(server: &mut Server<MockListener>, count: usize) {
    for _ in 0..count {
        server.tick().await.unwrap();
    }
}

fn only_connection(server: &Server<MockListener>) -> ConnectionId {
    let ids = server.connections().ids();
    assert_eq!(ids.len(), 1);
    ids[0]
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_prompt_then_line_delivered() {
    let (recorder, lines, _closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client: MockSocket = listener.connect();

    ticks(&mut server, 2).await;
    let greeting = client.take_output();
    assert!(greeting.starts_with(&[0xFF, 0xFB, 0x56, 0xFF, 0xFD, 0x1F]));
    assert!(greeting.ends_with(b"? \xFF\xF9"));

    client.push_input(b"look\n");
    ticks(&mut server, 1).await;
    assert_eq!(*lines.borrow(), vec!["look".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_crlf_line_has_no_terminator() {
    let (recorder, lines, _closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();

    ticks(&mut server, 1).await;
    client.push_input(b"look\r\n");
    ticks(&mut server, 2).await;
    assert_eq!(*lines.borrow(), vec!["look".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_overlong_line_warns_once() {
    let (recorder, lines, _closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();
    ticks(&mut server, 2).await;
    client.take_output();

    client.push_input(&[b'x'; 600]);
    ticks(&mut server, 2).await;
    client.push_input(&[b'y'; 100]);
    ticks(&mut server, 2).await;
    client.push_input(b"\nhello\n");
    ticks(&mut server, 4).await;

    let text = client.take_text();
    assert_eq!(text.matches(LINE_TOO_LONG).count(), 1);
    let lines = lines.borrow();
    assert_eq!(lines.last().map(String::as_str), Some("hello"));
    assert!(!lines.iter().any(|line| line.contains('y')));
}

#[tokio::test(start_paused = true)]
async fn test_self_close_drains_then_removes() {
    let script = Scripted(|_id| {
        continuation(|host: &mut Host<'_>, _args: Vec<Value>| {
            if let Some(id) = host.current() {
                let _ = host.send(id, "bye\r\n");
                let _ = host.close(id);
            }
            Outcome::Yielded(Vec::new())
        })
    });
    let (mut server, listener) = server(ServerConfig::default(), script);
    let client = listener.connect();

    ticks(&mut server, 1).await;
    let id = only_connection(&server);
    assert_eq!(server.connections().get(id).unwrap().state(), ConnectionState::Draining);

    ticks(&mut server, 1).await;
    assert!(client.take_text().ends_with("bye\r\n"));
    assert_eq!(server.connections().get(id).unwrap().state(), ConnectionState::Draining);

    ticks(&mut server, 1).await;
    assert!(!server.connections().contains(id));
}

#[tokio::test(start_paused = true)]
async fn test_declined_window_size_clears_dimensions() {
    let (recorder, _lines, _closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();
    ticks(&mut server, 1).await;
    let id = only_connection(&server);

    client.push_input(&[0xFF, 0xFB, 0x1F, 0xFF, 0xFA, 0x1F, 0, 80, 0, 24, 0xFF, 0xF0]);
    ticks(&mut server, 1).await;
    let extra = server.connections().get(id).unwrap().extra();
    assert_eq!(extra.window_size(), Some((80, 24)));

    client.push_input(&[0xFF, 0xFC, 0x1F]);
    ticks(&mut server, 1).await;
    let extra = server.connections().get(id).unwrap().extra();
    assert!(!extra.contains_key(WIDTH));
    assert!(!extra.contains_key(HEIGHT));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_default_script_says_redefine() {
    let (mut server, listener) = server(ServerConfig::default(), DefaultScript);
    let client = listener.connect();
    ticks(&mut server, 3).await;
    assert!(client.take_text().contains(REDEFINE_MESSAGE));
    assert!(server.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_peer_hangup_runs_close_hook_once() {
    let (recorder, _lines, closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();
    ticks(&mut server, 1).await;
    let id = only_connection(&server);

    client.close_input();
    ticks(&mut server, 3).await;
    assert_eq!(*closed.borrow(), vec![id]);
    assert!(server.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_error_closes() {
    let (recorder, _lines, closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();
    ticks(&mut server, 1).await;

    client.fail_reads(io::ErrorKind::ConnectionReset);
    ticks(&mut server, 2).await;
    assert_eq!(closed.borrow().len(), 1);
    assert!(server.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_flooded_output_closes() {
    let script = Scripted(|_id| {
        continuation(|host: &mut Host<'_>, _args: Vec<Value>| {
            if let Some(id) = host.current() {
                let _ = host.send(id, &"z".repeat(200));
            }
            Outcome::Yielded(Vec::new())
        })
    });
    let config = ServerConfig::default().with_limits(ConnectionLimits::default().with_output_buffer(64));
    let (mut server, listener) = server(config, script);
    let client = listener.connect();
    client.set_write_blocked(true);

    ticks(&mut server, 1).await;
    let id = only_connection(&server);
    assert!(server.connections().get(id).unwrap().is_closed());
    ticks(&mut server, 1).await;
    assert!(server.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ids_are_not_reused() {
    let (mut server, listener) = server(ServerConfig::default(), DefaultScript);
    listener.connect();
    ticks(&mut server, 3).await;
    assert!(server.connections().is_empty());

    listener.connect();
    ticks(&mut server, 1).await;
    let id = only_connection(&server);
    assert_eq!(id.as_u64(), 2);
}

// ============================================================================
// Delays and timers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_self_delay_resumes_after_deadline() {
    let woke: Rc<RefCell<Option<Instant>>> = Rc::default();
    let seen = Rc::clone(&woke);
    let script = Scripted(move |_id| {
        let seen = Rc::clone(&seen);
        let mut started = false;
        continuation(move |host: &mut Host<'_>, _args: Vec<Value>| {
            if started {
                *seen.borrow_mut() = Some(host.now());
                return Outcome::Yielded(Vec::new());
            }
            started = true;
            match host.current() {
                Some(id) => host.read_with_delay(id, 1.0).unwrap_or_else(Outcome::from),
                None => Outcome::Terminated,
            }
        })
    });
    let (mut server, listener) = server(ServerConfig::default(), script);
    listener.connect();
    let start = Instant::now();

    ticks(&mut server, 5).await;
    assert!(woke.borrow().is_none());
    ticks(&mut server, 10).await;
    let at = woke.borrow().expect("continuation resumed");
    assert!(at - start >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_delaying_connection_queues_nothing() {
    let (recorder, lines, _closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    let client = listener.connect();
    ticks(&mut server, 1).await;
    let id = only_connection(&server);

    server.with_host(|host| host.delay(id, 0.5)).unwrap();
    client.push_input(b"early\n");
    ticks(&mut server, 2).await;
    assert!(lines.borrow().is_empty());
    assert_eq!(server.connections().get(id).unwrap().state(), ConnectionState::Delaying);

    ticks(&mut server, 8).await;
    assert_eq!(*lines.borrow(), vec!["early".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_repeating_timer_until_cancelled() {
    let (mut server, _listener) = server(ServerConfig::default(), DefaultScript);
    let fired = Rc::new(RefCell::new(0u32));
    let count = Rc::clone(&fired);
    let timer = server
        .with_host(|host| {
            host.add_timer(0.2, move |_host| {
                *count.borrow_mut() += 1;
                Ok(Some(0.2))
            })
        })
        .unwrap();

    ticks(&mut server, 11).await;
    let after_first = *fired.borrow();
    assert!(after_first >= 4, "fired {after_first} times");

    server.with_host(|host| host.cancel_timer(timer)).unwrap();
    ticks(&mut server, 5).await;
    assert_eq!(*fired.borrow(), after_first);
    assert!(server.state().timers().is_empty());
}

// ============================================================================
// Channels
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_channel_callback_runs_when_readable() {
    let (mut server, _listener) = server(ServerConfig::default(), DefaultScript);
    let channel = MockChannel::new();
    let hits = Rc::new(RefCell::new(0u32));
    let seen = Rc::clone(&hits);
    let handle = channel.clone();
    server
        .with_host(move |host| {
            let id = host.watch(Box::new(handle));
            host.set_readable(id, move |_host, _id| {
                *seen.borrow_mut() += 1;
                Ok(())
            })
        })
        .unwrap();

    ticks(&mut server, 1).await;
    assert_eq!(*hits.borrow(), 0);
    channel.set_readable(true);
    ticks(&mut server, 1).await;
    assert_eq!(*hits.borrow(), 1);
    assert!(!channel.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_failing_channel_callback_force_closes() {
    let (mut server, _listener) = server(ServerConfig::default(), DefaultScript);
    let channel = MockChannel::new();
    let handle = channel.clone();
    server
        .with_host(move |host| {
            let id = host.watch(Box::new(handle));
            host.set_readable(id, |_host, _id| Err(ScriptError::failed("boom")))
        })
        .unwrap();

    channel.set_readable(true);
    ticks(&mut server, 2).await;
    assert!(channel.is_closed());
    assert_eq!(channel.close_count(), 1);
    assert!(server.state().channels().is_empty());
}

// ============================================================================
// Listener and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_accept_error_is_skipped() {
    let (mut server, listener) = server(ServerConfig::default(), DefaultScript);
    listener.fail_accept(io::ErrorKind::ConnectionAborted);
    listener.connect();
    ticks(&mut server, 1).await;
    assert_eq!(server.connections().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_accept_error_stops_loop() {
    let (mut server, listener) = server(ServerConfig::default(), DefaultScript);
    listener.fail_accept(io::ErrorKind::PermissionDenied);
    let result = timeout(Duration::from_secs(10), server.run()).await.unwrap();
    assert!(matches!(result, Err(ServiceError::Listener(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_from_script_closes_everyone() {
    let shutter = Scripted(|_id| {
        continuation(|host: &mut Host<'_>, args: Vec<Value>| {
            let Some(id) = host.current() else {
                return Outcome::Terminated;
            };
            if args.first().and_then(Value::as_text) == Some("halt") {
                let _ = host.send(id, "Goodbye.\r\n");
                host.shutdown();
            }
            host.read(id).unwrap_or_else(Outcome::from)
        })
    });
    let (mut server, listener) = server(ServerConfig::default(), shutter);
    let client = listener.connect();
    client.push_input(b"halt\n");

    timeout(Duration::from_secs(10), server.run()).await.unwrap().unwrap();
    assert!(server.connections().is_empty());
    assert!(server.state().is_shutdown());
    assert!(client.take_text().contains("Goodbye.\r\n"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_runs_close_hooks() {
    let (recorder, _lines, closed) = Recorder::new();
    let (mut server, listener) = server(ServerConfig::default(), recorder);
    listener.connect();
    listener.connect();
    ticks(&mut server, 1).await;

    server.shutdown();
    assert_eq!(closed.borrow().len(), 2);
    assert!(server.connections().is_empty());
}
