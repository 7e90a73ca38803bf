//! Shared HTTP plumbing for the downstream clients.

use maestro_core::{MaestroError, Result};
use std::time::Duration;

use crate::config::ProxyDefaults;

/// Build a network error with no HTTP status.
pub(crate) fn net_err(message: String) -> MaestroError {
    MaestroError::Network {
        message,
        status: None,
    }
}

/// Build a client with an optional total timeout.
pub(crate) fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(ProxyDefaults::CONNECT_TIMEOUT)
        .user_agent(ProxyDefaults::USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| net_err(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into a network error carrying the status and body.
pub(crate) async fn check_status(response: reqwest::Response, service: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body: String = response.text().await.unwrap_or_default();
    Err(MaestroError::Network {
        message: format!("{} returned {}: {}", service, status, body),
        status: Some(status.as_u16()),
    })
}
