#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # wardend
//!
//! A POSIX process supervisor: keeps a declared set of child programs
//! alive, captures their output, and exposes an HTTP control surface for
//! operators to start/stop/restart individual children and inspect state.
//!
//! ## Usage
//!
//! - `wardend` / `wardend run` — run in the foreground (or daemonize per
//!   `supervisor.nodaemon` in config)
//! - `wardend --config <path>` — use a specific TOML config file
//! - `wardend -n` / `wardend --nodaemon` — force foreground even if the
//!   config requests daemonizing

use clap::{Parser, Subcommand};

/// POSIX process supervisor.
#[derive(Parser)]
#[command(name = "wardend", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to TOML config file (when no subcommand is given).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Stay in the foreground, overriding `supervisor.nodaemon` in config.
    #[arg(short = 'n', long, global = true)]
    nodaemon: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervision kernel (default).
    Run {
        #[arg(long)]
        config: Option<String>,

        /// Stay in the foreground, overriding `supervisor.nodaemon` in config.
        #[arg(short = 'n', long)]
        nodaemon: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let (config_path, nodaemon_flag) = match cli.command {
        Some(Commands::Run { config, nodaemon }) => (config.or(cli.config), nodaemon || cli.nodaemon),
        None => (cli.config, cli.nodaemon),
    };

    // Daemonization must happen before the tokio runtime starts — forking a
    // multi-threaded process only carries the calling thread into the
    // child, orphaning every other tokio worker thread.
    let config_nodaemon = wardend::Config::load(config_path.as_deref()).supervisor.nodaemon;
    let nodaemon_hint = nodaemon_flag || config_nodaemon;
    if !nodaemon_hint {
        if let Err(e) = wardend::daemonize::daemonize() {
            eprintln!("wardend: daemonize failed: {e}");
            std::process::exit(1);
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(async {
        let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        tracing_subscriber::fmt().with_env_filter(log_filter).init();

        tracing::info!("wardend v{} starting", env!("CARGO_PKG_VERSION"));
        wardend::supervisor::run_forever(config_path.as_deref()).await;
    });
}
