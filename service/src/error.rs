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


//! Error types for the pulsemud service

use crate::types::{ChannelId, ConnectionId, TimerId};
use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// I/O error from a socket or the listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error from the codec layer
    #[error("Protocol error: {0}")]
    Protocol(#[from] pulsemud_telnetcodec::CodecError),

    /// Connection with the given ID was not found
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// Timer with the given ID was never created
    #[error("Timer {0} not found")]
    TimerNotFound(TimerId),

    /// Timer already fired for the last time or was cancelled
    #[error("Timer {0} has expired")]
    TimerExpired(TimerId),

    /// Channel with the given ID is not watched
    #[error("Channel {0} not found")]
    ChannelNotFound(ChannelId),

    /// The listening socket failed
    #[error("Listener error: {0}")]
    Listener(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Check if the error is fatal to the whole server
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Listener(_) | ServiceError::Config(_))
    }

    /// Check if the error refers to a missing handle
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::ConnectionNotFound(_)
                | ServiceError::TimerNotFound(_)
                | ServiceError::ChannelNotFound(_)
        )
    }
}

/// Errors raised by script code through the [`Host`](crate::Host) API
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A continuation tried to read input on behalf of another connection
    #[error("{} may not read from {target}", requester_name(.requester))]
    ForeignRead {
        /// The connection whose continuation issued the read
        requester: Option<ConnectionId>,
        /// The connection it tried to read from
        target: ConnectionId,
    },

    /// A host operation failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The script itself failed
    #[error("{0}")]
    Failed(String),
}

impl ScriptError {
    /// Shorthand for [`ScriptError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        ScriptError::Failed(message.into())
    }
}

fn requester_name(requester: &Option<ConnectionId>) -> String {
    match requester {
        Some(id) => id.to_string(),
        None => "code outside any continuation".to_string(),
    }
}
