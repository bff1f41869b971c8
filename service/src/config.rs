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


//! Server configuration types and builders
//!
//! ```
//! use pulsemud_service::{LogLevel, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::default()
//!     .with_port(4000)
//!     .with_pulse_length(Duration::from_millis(250))
//!     .with_log_level(LogLevel::Debug);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ServiceError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Longest pulse accepted by [`ServerConfig::validate`], exclusive.
pub const MAX_PULSE_LENGTH: Duration = Duration::from_secs(1);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,

    /// Address to bind the listener to
    pub bind_address: IpAddr,

    /// Length of one event loop tick
    pub pulse_length: Duration,

    /// Minimum level emitted by the logging subscriber
    pub log_level: LogLevel,

    /// Write log output to `pulsemud.log` instead of stderr
    pub file_logging: bool,

    /// Listen backlog
    pub backlog: u32,

    /// Arguments handed to the script through [`Host::args`](crate::Host::args)
    pub script_args: Vec<String>,

    /// Per-connection buffer limits
    pub limits: ConnectionLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            pulse_length: Duration::from_millis(100),
            log_level: LogLevel::Info,
            file_logging: false,
            backlog: 5,
            script_args: Vec::new(),
            limits: ConnectionLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listening port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind address
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the pulse length
    pub fn with_pulse_length(mut self, pulse_length: Duration) -> Self {
        self.pulse_length = pulse_length;
        self
    }

    /// Set the log level
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Enable or disable logging to `pulsemud.log`
    pub fn with_file_logging(mut self, enabled: bool) -> Self {
        self.file_logging = enabled;
        self
    }

    /// Set the listen backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the script arguments
    pub fn with_script_args(mut self, args: Vec<String>) -> Self {
        self.script_args = args;
        self
    }

    /// Set the per-connection limits
    pub fn with_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Socket address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.pulse_length.is_zero() {
            return Err(ServiceError::Config(
                "pulse_length must be greater than 0".to_string(),
            ));
        }

        if self.pulse_length >= MAX_PULSE_LENGTH {
            return Err(ServiceError::Config(
                "pulse_length must be less than 1000000 microseconds".to_string(),
            ));
        }

        if self.backlog == 0 {
            return Err(ServiceError::Config(
                "backlog must be greater than 0".to_string(),
            ));
        }

        self.limits.validate()
    }
}

/// Per-connection buffer limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Capacity of the inbound line buffer
    pub line_buffer: usize,

    /// Capacity of the outbound buffer
    pub output_buffer: usize,

    /// Bytes read from the socket per call
    pub recv_chunk: usize,

    /// Number of complete lines queued per connection
    pub command_queue: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            line_buffer: 512,
            output_buffer: 4096,
            recv_chunk: 1024,
            command_queue: 16,
        }
    }
}

impl ConnectionLimits {
    /// Set the line buffer capacity
    pub fn with_line_buffer(mut self, size: usize) -> Self {
        self.line_buffer = size;
        self
    }

    /// Set the output buffer capacity
    pub fn with_output_buffer(mut self, size: usize) -> Self {
        self.output_buffer = size;
        self
    }

    /// Set the receive chunk size
    pub fn with_recv_chunk(mut self, size: usize) -> Self {
        self.recv_chunk = size;
        self
    }

    /// Set the command queue capacity
    pub fn with_command_queue(mut self, capacity: usize) -> Self {
        self.command_queue = capacity;
        self
    }

    /// Validate the limits
    pub fn validate(&self) -> Result<(), ServiceError> {
        let sizes = [
            ("line_buffer", self.line_buffer),
            ("output_buffer", self.output_buffer),
            ("recv_chunk", self.recv_chunk),
            ("command_queue", self.command_queue),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(ServiceError::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// Minimum severity of emitted log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Everything, including per-byte decoder output
    Trace,
    /// Transient I/O and negotiation
    Debug,
    /// Lifecycle events
    #[default]
    Info,
    /// Peer-caused faults
    Warn,
    /// Script and infrastructure faults
    Error,
}

impl LogLevel {
    /// Lowercase name, usable as an `EnvFilter` directive
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "fatal" => Ok(LogLevel::Error),
            other => Err(ServiceError::Config(format!("unknown log level '{other}'"))),
        }
    }
}
