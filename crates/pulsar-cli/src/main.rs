//! Pulsar CLI — entry point.
//!
//! The CLI is synchronous; async work runs on the execution bridge worker.
//!
//! # Commands
//!
//! - `pulsar agent [-m MESSAGE] [-c CONFIG]` — chat (single-shot or REPL)
//! - `pulsar tools [-c CONFIG]` — list tools from the configured providers
//! - `pulsar status [-c CONFIG]` — show configuration and provider status

mod helpers;
mod repl;
mod session;
mod status;
mod tools_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use pulsar_core::config::load_config;

use crate::session::AgentSession;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// ✦ Pulsar — a tool-using reasoning agent with memory and task tracking
#[derive(Parser)]
#[command(name = "pulsar", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Config file (defaults to ~/.pulsar/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// List tools exposed by the configured tool providers
    Tools {
        /// Config file (defaults to ~/.pulsar/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status {
        /// Config file (defaults to ~/.pulsar/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            config,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, config, logs)
        }
        Commands::Tools { config, logs } => {
            init_logging(logs);
            tools_cmd::run(config.as_deref())
        }
        Commands::Status { config } => status::run(config.as_deref()),
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

fn run_agent(message: Option<String>, config_path: Option<PathBuf>, show_logs: bool) -> Result<()> {
    let config = load_config(config_path.as_deref());
    let session = AgentSession::start(&config)?;

    let outcome = match message {
        Some(msg) => {
            info!(session = %config.session, "processing single message");
            session.query(&msg).map(|response| helpers::print_response(&response))
        }
        None => repl::run(&session, show_logs),
    };

    session.close();
    outcome
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("pulsar=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
