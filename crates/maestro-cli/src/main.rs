//! Maestro CLI - reserve and use remotely scheduled compute from the shell.
//!
//! This binary is the composition root: it builds the one [`Connection`] the
//! process uses and hands it to every component that talks to the backend.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use maestro_core::{Connection, LeaseClient, MaestroConfig, RequestComputeParams, RetryConfig};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(about = "Reserve and use remotely scheduled compute")]
#[command(version)]
struct Args {
    /// WebSocket address of the coordinating backend
    #[arg(long, env = "MAESTRO_BACKEND_URL")]
    url: String,

    /// Bearer token for the backend
    #[arg(long, env = "MAESTRO_API_TOKEN", hide_env_values = true)]
    token: String,

    /// Per-request timeout in milliseconds (default: wait indefinitely)
    #[arg(long, env = "MAESTRO_REQUEST_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Backend selection shared by the leasing subcommands.
#[derive(clap::Args, Debug, Clone)]
struct Selection {
    /// Service to reserve, e.g. "ollama"
    #[arg(long)]
    service: Option<String>,

    /// Model the backend must serve
    #[arg(long)]
    model: Option<String>,
}

impl From<Selection> for RequestComputeParams {
    fn from(selection: Selection) -> Self {
        RequestComputeParams {
            service: selection.service,
            model: selection.model,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reserve compute, print the assignment as JSON, then release it
    Reserve {
        #[command(flatten)]
        selection: Selection,

        /// Hold the reservation this many seconds (default: until Ctrl-C)
        #[arg(long)]
        hold_secs: Option<u64>,
    },

    /// Release an assignment by id
    Release {
        assignment_id: String,
    },

    /// Run a command while holding a reservation
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List models on an assigned Ollama backend
    Models,
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    let mut builder = MaestroConfig::builder(args.url, args.token);
    if let Some(ms) = args.timeout_ms {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }
    let config = builder.build().context("invalid configuration")?;
    debug!(?config, "Loaded configuration");

    let connection = Arc::new(Connection::new(config));
    connection
        .connect_with_retry(&RetryConfig::default())
        .await
        .context("could not connect to the backend")?;

    let leases = LeaseClient::new(connection.clone());

    let code = match args.command {
        Command::Reserve {
            selection,
            hold_secs,
        } => {
            commands::reserve(&leases, &selection.into(), hold_secs.map(Duration::from_secs))
                .await?;
            ExitCode::SUCCESS
        }
        Command::Release { assignment_id } => {
            commands::release(&leases, &assignment_id).await?;
            ExitCode::SUCCESS
        }
        Command::Run { selection, command } => {
            let code = commands::run(&leases, &selection.into(), &command).await?;
            ExitCode::from(code)
        }
        Command::Models => {
            commands::models(&leases).await?;
            ExitCode::SUCCESS
        }
    };

    connection.close();
    Ok(code)
}
