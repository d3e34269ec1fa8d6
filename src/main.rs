// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "webcam-capture")]
#[command(about = "Capture frames and detect motion from webcams")]
#[command(version = webcam_capture::constants::app_info::version())]
struct Cli {
    /// Configuration file (default: ~/.config/webcam-capture/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of synthetic devices exposed by the dummy driver
    #[arg(short, long, global = true, default_value = "2")]
    devices: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Save a single frame as PNG
    Snapshot {
        /// Camera index to use (from 'webcam-capture list')
        #[arg(long, default_value = "0")]
        camera: usize,

        /// Output file path (default: ./snapshot_TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read the frame from the background updater
        #[arg(long = "async")]
        asynchronous: bool,
    },

    /// Report motion seen by a camera
    Watch {
        /// Camera index to use (from 'webcam-capture list')
        #[arg(long, default_value = "0")]
        camera: usize,

        /// Check interval in milliseconds (default from config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many seconds, runs until Ctrl+C otherwise
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Print cameras as they appear and disappear
    Discover {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=webcam_capture=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let registry = cli::registry(cli.config.as_deref(), cli.devices)?;

    let result = match cli.command {
        Commands::List => cli::list_cameras(&registry),
        Commands::Snapshot {
            camera,
            output,
            asynchronous,
        } => cli::take_snapshot(&registry, camera, output, asynchronous),
        Commands::Watch {
            camera,
            interval,
            seconds,
        } => cli::watch_motion(&registry, camera, interval, seconds),
        Commands::Discover { seconds } => cli::discover(&registry, seconds),
    };

    registry.shutdown();
    result
}
