//! Subcommand implementations.

use anyhow::{Context, Result};
use maestro_core::{LeaseClient, RequestComputeParams};
use maestro_proxy::OllamaProxy;
use std::time::Duration;
use tracing::info;

/// Environment variables handed to the child of `maestro run`.
pub struct ChildEnv;

impl ChildEnv {
    pub const HOST: &'static str = "MAESTRO_HOST";
    pub const PORT: &'static str = "MAESTRO_PORT";
    pub const ASSIGNMENT_ID: &'static str = "MAESTRO_ASSIGNMENT_ID";
}

pub async fn reserve(
    leases: &LeaseClient,
    params: &RequestComputeParams,
    hold: Option<Duration>,
) -> Result<()> {
    let lease = leases.lease(params).await.context("reservation failed")?;
    println!("{}", serde_json::to_string_pretty(lease.assignment())?);

    match hold {
        Some(hold) => {
            info!(seconds = hold.as_secs(), "Holding reservation");
            tokio::select! {
                _ = tokio::time::sleep(hold) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, releasing"),
            }
        }
        None => {
            info!("Holding reservation until Ctrl-C");
            tokio::signal::ctrl_c().await?;
        }
    }

    lease.release().await.context("release failed")?;
    Ok(())
}

pub async fn release(leases: &LeaseClient, assignment_id: &str) -> Result<()> {
    leases
        .release_compute(assignment_id)
        .await
        .with_context(|| format!("failed to release {}", assignment_id))
}

/// Run `command` under a scoped lease and return its exit code.
///
/// A child killed by a signal reports exit code 1.
pub async fn run(leases: &LeaseClient, params: &RequestComputeParams, command: &[String]) -> Result<u8> {
    let (program, args) = command.split_first().context("no command given")?;

    leases
        .with_lease(params, |assignment| async move {
            info!(
                assignment_id = %assignment.assignment_id,
                endpoint = %assignment.endpoint(),
                program = %program,
                "Running command under lease"
            );

            let status = tokio::process::Command::new(program)
                .args(args)
                .env(ChildEnv::HOST, &assignment.host)
                .env(ChildEnv::PORT, assignment.port.to_string())
                .env(ChildEnv::ASSIGNMENT_ID, &assignment.assignment_id)
                .status()
                .await
                .with_context(|| format!("failed to start {}", program))?;

            info!(%status, "Command finished");
            Ok::<_, anyhow::Error>(exit_code(status.code()))
        })
        .await
}

fn exit_code(code: Option<i32>) -> u8 {
    code.and_then(|code| u8::try_from(code).ok()).unwrap_or(1)
}

pub async fn models(leases: &LeaseClient) -> Result<()> {
    let proxy = OllamaProxy::new(leases.clone());
    let models = proxy.list().await.context("failed to list models")?;

    for model in &models {
        println!("{:<40} {:>12} {}", model.name, model.size, model.modified_at);
    }
    info!(count = models.len(), "Listed models");
    Ok(())
}
