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


//! Pulsemud server binary
//!
//! Binds the default configuration, runs the lobby script and exits with `0` on a clean
//! shutdown or `1` on any startup or listener failure. Arguments are handed to the
//! script untouched.

mod lobby;
mod logging;

use lobby::Lobby;
use pulsemud_service::{Server, ServerConfig};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = ServerConfig::default().with_script_args(std::env::args().skip(1).collect());

    if let Err(err) = logging::init(&config) {
        eprintln!("pulsemud: {err}");
        return ExitCode::FAILURE;
    }

    let mut server = match Server::bind(config, Lobby::new()).await {
        Ok(server) => server,
        Err(err) => {
            error!("Failed to start server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let stopped = tokio::select! {
        result = server.run() => Some(result),
        () = interrupted() => None,
    };
    let result = match stopped {
        Some(result) => result,
        None => {
            info!("Interrupted");
            server.shutdown();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Server stopped: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on ctrl-c; never resolves if the signal cannot be watched
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for interrupts: {err}");
        std::future::pending::<()>().await;
    }
}
