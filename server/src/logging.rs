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


//! Log subscriber bootstrap

use pulsemud_service::{LogLevel, ServerConfig};
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// File written when file logging is enabled
pub const LOG_FILE: &str = "pulsemud.log";

/// Failure to install the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log file could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: &'static str,
        #[source]
        source: io::Error,
    },
    /// Another subscriber is already installed
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Filter admitting `level` and everything more severe
pub fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(level.as_str())
}

/// Installs the global `fmt` subscriber, writing to stderr or to [`LOG_FILE`]
pub fn init(config: &ServerConfig) -> Result<(), LoggingError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config.log_level))
        .with_target(false);

    let installed = if config.file_logging {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)
            .map_err(|source| LoggingError::Open {
                path: LOG_FILE,
                source,
            })?;
        builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        builder.with_writer(io::stderr).try_init()
    };
    installed.map_err(|err| LoggingError::Install(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_filter_follows_level() {
        assert_eq!(filter(LogLevel::Warn).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            filter("fatal".parse().unwrap()).max_level_hint(),
            Some(LevelFilter::ERROR)
        );
    }
}
