//! choir-daemon — serves the supervisor gateway.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use choir_core::ai::provider::UnconfiguredProvider;
use choir_core::config;

#[derive(Debug, Parser)]
#[command(name = "choir-daemon", about = "Supervised agent execution daemon", version)]
struct Cli {
    /// Path to config.toml (default: ~/.choird/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this directory in addition to stderr.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP/WS gateway (default).
    Serve,
    /// Rebuild all projections from the event log, then exit.
    Rebuild,
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "choir-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> config::AppConfig {
    match path {
        Some(path) => match config::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                std::process::exit(2);
            }
        },
        None => config::load_default_config(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref());
    let config = load_config(cli.config.as_ref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = match choir_core::gateway::build_state(config, Arc::new(UnconfiguredProvider))
            {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(%e, "failed to bootstrap supervisor");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = choir_core::gateway::daemon::serve(state).await {
                tracing::error!(%e, "gateway exited with error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Command::Rebuild => {
            let state = match choir_core::gateway::build_state(config, Arc::new(UnconfiguredProvider))
            {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(%e, "failed to open store");
                    return ExitCode::FAILURE;
                }
            };
            match state.store.rebuild_projections() {
                Ok(replayed) => {
                    println!("replayed {replayed} events");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(%e, "projection rebuild failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
