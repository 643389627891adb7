// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements running the daemon.

use std::fmt::Write;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use ldnsd::config::{self, Config};
use ldnsd::service::Service;

use crate::args::Args;

/// Runs the daemon with the parsed command line arguments. Argument
/// errors are reported, with status 1, like any other failure.
pub fn run(args: Result<Args, clap::Error>) {
    env_logger::init_from_env(Env::new().default_filter_or("info"));

    let result = args
        .context("invalid command line arguments")
        .and_then(try_running);
    if let Err(e) = result {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: Args) -> Result<()> {
    info!(
        "ldnsd v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    let config = if let Some(ref config_path) = args.config {
        info!("Loading the configuration from {}.", config_path.display());
        config::load_from_path(config_path).context("failed to load the configuration")?
    } else {
        info!("No configuration file given; using the defaults.");
        Config::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;

    // Set everything up before handling signals, so that set-up
    // failures are reported without waiting for one.
    let service = runtime
        .block_on(Service::new("ldnsd", &config))
        .context("failed to set up the service")?;
    let service = Arc::new(service);
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // If the service stops on its own, stop waiting for signals.
    let signals_handle = signals.handle();
    let runner = runtime.spawn({
        let service = service.clone();
        async move {
            let result = service.run().await;
            signals_handle.close();
            result
        }
    });

    if let Some(signal) = signals.forever().next() {
        let name = match signal {
            SIGINT => "SIGINT",
            SIGTERM => "SIGTERM",
            _ => unreachable!(),
        };
        info!("Received {}; shutting down.", name);
    }

    runtime.block_on(service.shutdown());
    runtime
        .block_on(runner)
        .context("the service task failed")?
        .context("the service failed")
}

fn set_up_signal_handling() -> Result<Signals> {
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // A second termination signal that arrives before the graceful
    // shutdown finishes exits immediately.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(term_signals).map_err(Into::into)
}
