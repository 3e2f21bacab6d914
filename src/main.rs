// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! piper - PipeWire to ALSA volume sync.
//!
//! Follows the volume of one PipeWire node and mirrors it onto an ALSA
//! hardware mixer control, and the other way around.

mod audio;
mod config;

use audio::pipewire_thread::{PwEvent, PwThread};
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "piper", version, about = "PipeWire to ALSA volume sync")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exact node.name of the PipeWire node to follow
    #[arg(long)]
    node: Option<String>,

    /// ALSA card to open
    #[arg(long)]
    card: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("piper={}", level).parse()?)
                .add_directive(format!("piper_sync={}", level).parse()?),
        )
        .init();

    info!("piper starting...");

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let mut config = Config::load(&config_path)?;
    if let Some(node) = args.node {
        config.node.name = node;
    }
    if let Some(card) = args.card {
        config.mixer.card = card;
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let (event_tx, mut event_rx) = tokio_mpsc::unbounded_channel::<PwEvent>();
    let pw_thread = PwThread::spawn(config, event_tx)?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            event = event_rx.recv() => match event {
                Some(PwEvent::Ready) => info!("piper ready"),
                Some(PwEvent::Error(e)) => {
                    error!("Startup failed: {}", e);
                    pw_thread.shutdown();
                    return Err(e.into());
                }
                Some(PwEvent::Stopped) | None => {
                    warn!("PipeWire loop stopped");
                    break;
                }
            },
        }
    }

    pw_thread.shutdown();
    info!("piper stopped");
    Ok(())
}
