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


//! The pulse loop
//!
//! [`Server`] owns the listener, the script and all connection state, and advances
//! everything one fixed-length pulse at a time:
//!
//! 1. dispatch close hooks, then sweep closed connections, dead timers and unwatched
//!    channels;
//! 2. poll the listener, every connection's read/write interest and every watched channel
//!    in a single `poll_fn`, until something is ready or the pulse deadline passes;
//! 3. accept new connections and start their continuations;
//! 4. flush, then read, ready connections;
//! 5. run ready channel callbacks;
//! 6. fire due timers;
//! 7. run the delay pass and the one-command-per-connection pass;
//! 8. send prompts;
//! 9. sleep until the deadline.
//!
//! A pulse whose work runs past the deadline is reported as an overrun. After an idle
//! poll the deadline has already passed, so only the time spent after the poll counts.
//!
//! Everything runs on the calling task. Socket I/O never blocks, so one slow client
//! cannot hold up the others.

use crate::channel::{self, ChannelReadiness};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{Result, ServiceError};
use crate::host::{Host, ServerState};
use crate::scheduler::Scheduler;
use crate::script::Script;
use crate::socket::{self, Listener, Socket};
use crate::table::ConnectionTable;
use crate::timer;
use crate::types::ConnectionId;
use futures::future::poll_fn;
use metrics::{counter, gauge};
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// The event loop
///
/// # Example
///
/// ```no_run
/// use pulsemud_service::{DefaultScript, Server, ServerConfig};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::bind(ServerConfig::default(), DefaultScript).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server<L: Listener> {
    config: ServerConfig,
    listener: L,
    script: Box<dyn Script>,
    scheduler: Scheduler,
    state: ServerState,
}

impl Server<TcpListener> {
    /// Validates `config` and binds a TCP listener for it
    pub async fn bind<S: Script + 'static>(config: ServerConfig, script: S) -> Result<Self> {
        config.validate()?;
        let addr = config.socket_addr();
        let listener = socket::bind(&config)
            .map_err(|err| ServiceError::Listener(format!("failed to bind {addr}: {err}")))?;
        info!("Server bound to {}", listener.local_addr()?);
        Ok(Server::with_listener(config, listener, script))
    }
}

impl<L: Listener> Server<L> {
    /// Builds a server around an already bound listener
    pub fn with_listener<S: Script + 'static>(config: ServerConfig, listener: L, script: S) -> Self {
        let state = ServerState::new(config.script_args.clone());
        Server {
            config,
            listener,
            script: Box::new(script),
            scheduler: Scheduler::new(),
            state,
        }
    }

    /// Replaces the scheduler, e.g. with a seeded one
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connection, timer and channel state
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Connection, timer and channel state, mutably
    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    /// The connection table
    pub fn connections(&self) -> &ConnectionTable {
        &self.state.connections
    }

    /// Runs a closure with a [`Host`] outside any continuation
    pub fn with_host<T>(&mut self, f: impl FnOnce(&mut Host<'_>) -> T) -> T {
        let mut host = Host::new(&mut self.state, Instant::now(), None);
        f(&mut host)
    }

    /// Asks the loop to stop after the current tick
    pub fn request_shutdown(&mut self) {
        self.state.shutdown = true;
    }

    /// Runs ticks until shutdown is requested, then drains every connection
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Listener`] if the listener fails.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting pulse loop with a {:?} pulse", self.config.pulse_length);
        while !self.state.shutdown {
            self.tick().await?;
        }
        self.shutdown();
        Ok(())
    }

    /// Runs exactly one pulse
    pub async fn tick(&mut self) -> Result<()> {
        let tick_start = Instant::now();
        let deadline = tick_start + self.config.pulse_length;
        counter!("pulsemud.ticks").increment(1);

        self.sweep(tick_start);

        let ready = self.poll(deadline).await;
        let polled_at = Instant::now();
        let Readiness {
            accepted,
            listener_error,
            connections,
            channels,
        } = ready;

        self.accept(accepted, tick_start);
        if let Some(err) = listener_error {
            error!("Listener failed: {err}");
            return Err(ServiceError::Listener(err.to_string()));
        }
        self.service_connections(connections);
        for readiness in channels {
            channel::dispatch(&mut self.state, readiness, tick_start);
        }

        timer::fire_due(&mut self.state, tick_start);
        self.scheduler.run_delays(&mut self.state, tick_start);
        self.scheduler.run_commands(&mut self.state, tick_start);
        self.scheduler.send_prompts(&mut self.state, tick_start);

        pace(deadline, polled_at).await;
        Ok(())
    }

    /// Drains, flushes and closes every connection
    pub fn shutdown(&mut self) {
        info!("Shutting down pulsemud server");
        let now = Instant::now();
        for connection in self.state.connections.iter_mut() {
            connection.drain();
            connection.flush();
            connection.close();
        }
        self.run_close_hooks(now);
        self.state.connections.remove_closed();
        info!("Pulsemud server shutdown complete");
    }

    fn sweep(&mut self, now: Instant) {
        self.state.connections.close_drained();
        self.run_close_hooks(now);
        self.state.connections.remove_closed();
        self.state.timers.remove_dead();
        self.state.channels.remove_unwatched();
        #[allow(clippy::cast_precision_loss)]
        gauge!("pulsemud.connections.active").set(self.state.connections.len() as f64);
    }

    fn run_close_hooks(&mut self, now: Instant) {
        loop {
            let closed = self.state.connections.take_close_hooks();
            if closed.is_empty() {
                return;
            }
            for id in closed {
                info!(connection_id = %id, "Connection closed");
                let mut host = Host::new(&mut self.state, now, None);
                if let Err(err) = self.script.on_close(&mut host, id) {
                    error!(connection_id = %id, "close hook failed: {err}");
                }
            }
        }
    }

    async fn poll(&mut self, deadline: Instant) -> Readiness {
        let listener = &self.listener;
        let state = &mut self.state;
        let polled = tokio::time::timeout_at(
            deadline,
            poll_fn(|cx| {
                let mut ready = Readiness::default();
                poll_listener(listener, cx, &mut ready);
                poll_connections(&state.connections, cx, &mut ready.connections);
                state.channels.poll_ready(cx, &mut ready.channels);
                if ready.is_empty() {
                    Poll::Pending
                } else {
                    Poll::Ready(ready)
                }
            }),
        )
        .await;
        polled.unwrap_or_default()
    }

    fn accept(&mut self, accepted: Vec<(Box<dyn Socket>, SocketAddr)>, now: Instant) {
        for (socket, peer_addr) in accepted {
            let id = self.state.connections.allocate_id();
            let mut connection = Connection::new(id, socket, peer_addr, &self.config.limits);
            connection.begin_negotiation();
            self.state.connections.insert(connection);
            info!(connection_id = %id, peer_addr = %peer_addr, "Accepted connection");
            counter!("pulsemud.connections.accepted").increment(1);
            self.scheduler
                .start(&mut self.state, self.script.as_mut(), id, now);
        }
    }

    fn service_connections(&mut self, ready: Vec<SocketReadiness>) {
        for readiness in ready {
            let Some(connection) = self.state.connections.get_mut(readiness.id) else {
                continue;
            };
            if let Some(err) = readiness.error {
                error!(connection_id = %readiness.id, "in error state, closing: {err}");
                connection.close();
                continue;
            }
            if readiness.writable {
                connection.flush();
            }
            if readiness.readable && connection.should_recv() {
                connection.receive();
            }
        }
    }
}

impl<L: Listener> std::fmt::Debug for Server<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Readiness {
    accepted: Vec<(Box<dyn Socket>, SocketAddr)>,
    listener_error: Option<io::Error>,
    connections: Vec<SocketReadiness>,
    channels: Vec<ChannelReadiness>,
}

impl Readiness {
    fn is_empty(&self) -> bool {
        self.accepted.is_empty()
            && self.listener_error.is_none()
            && self.connections.is_empty()
            && self.channels.is_empty()
    }
}

struct SocketReadiness {
    id: ConnectionId,
    readable: bool,
    writable: bool,
    error: Option<io::Error>,
}

fn poll_listener<L: Listener>(listener: &L, cx: &mut Context<'_>, ready: &mut Readiness) {
    loop {
        match listener.poll_accept(cx) {
            Poll::Ready(Ok(accepted)) => ready.accepted.push(accepted),
            Poll::Ready(Err(err)) => match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => {
                    debug!("Transient accept error: {err}");
                }
                io::ErrorKind::WouldBlock => return,
                _ => {
                    ready.listener_error = Some(err);
                    return;
                }
            },
            Poll::Pending => return,
        }
    }
}

fn poll_connections(
    connections: &ConnectionTable,
    cx: &mut Context<'_>,
    ready: &mut Vec<SocketReadiness>,
) {
    for connection in connections.iter() {
        let Some(socket) = connection.socket() else {
            continue;
        };
        let mut readiness = SocketReadiness {
            id: connection.id(),
            readable: false,
            writable: false,
            error: None,
        };
        if connection.should_send() {
            match socket.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => readiness.writable = true,
                Poll::Ready(Err(err)) => readiness.error = Some(err),
                Poll::Pending => {}
            }
        }
        if connection.should_recv() && readiness.error.is_none() {
            match socket.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => readiness.readable = true,
                Poll::Ready(Err(err)) => readiness.error = Some(err),
                Poll::Pending => {}
            }
        }
        if readiness.readable || readiness.writable || readiness.error.is_some() {
            ready.push(readiness);
        }
    }
}

/// Lateness below this is wakeup jitter
const OVERRUN_TOLERANCE: Duration = Duration::from_millis(1);

async fn pace(deadline: Instant, polled_at: Instant) {
    let now = Instant::now();
    if now < deadline {
        tokio::time::sleep_until(deadline).await;
    } else if let Some(late) = overrun(deadline, polled_at, now) {
        warn!("Tick overran pulse by {late:?}");
        counter!("pulsemud.ticks.overrun").increment(1);
    }
}

/// How far the pulse's work ran past the deadline, or past the end of an idle poll
fn overrun(deadline: Instant, polled_at: Instant, now: Instant) -> Option<Duration> {
    let late = now.saturating_duration_since(deadline.max(polled_at));
    (late > OVERRUN_TOLERANCE).then_some(late)
}
