//! Reserve, use, always release.
//!
//! [`LeaseClient::with_lease`] runs a body against a fresh assignment and
//! releases it on every exit path:
//!
//! - body succeeds: released, value returned; a release failure is logged and
//!   kept as a secondary error in [`ScopedOutcome`].
//! - body fails: released, the body's error is returned unchanged.
//! - the surrounding future is dropped mid-body: the [`LeaseGuard`] spawns
//!   the release on the current tokio runtime.
//!
//! If the reservation itself fails the body never runs.

use super::client::LeaseClient;
use super::types::{ComputeAssignment, RequestComputeParams};
use crate::{MaestroError, Result};
use std::future::Future;
use tracing::{error, warn};

/// An assignment that is released when the guard goes away.
///
/// Prefer [`LeaseGuard::release`], which reports the outcome. A guard
/// dropped without it releases in a background task.
#[must_use = "dropping a LeaseGuard releases the assignment in the background"]
#[derive(Debug)]
pub struct LeaseGuard {
    client: LeaseClient,
    assignment: ComputeAssignment,
    released: bool,
}

impl LeaseGuard {
    pub(crate) fn new(client: LeaseClient, assignment: ComputeAssignment) -> Self {
        Self {
            client,
            assignment,
            released: false,
        }
    }

    pub fn assignment(&self) -> &ComputeAssignment {
        &self.assignment
    }

    /// Release the assignment now.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.client
            .release_compute(&self.assignment.assignment_id)
            .await
    }

    /// Release on a background task without waiting for the outcome.
    ///
    /// Failures are logged.
    pub fn release_detached(mut self) {
        self.released = true;
        spawn_release(self.client.clone(), self.assignment.assignment_id.clone());
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            assignment_id = %self.assignment.assignment_id,
            "Lease dropped without release, releasing in background"
        );
        spawn_release(self.client.clone(), self.assignment.assignment_id.clone());
    }
}

fn spawn_release(client: LeaseClient, assignment_id: String) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = client.release_compute(&assignment_id).await {
                    warn!(%assignment_id, error = %e, "Background release failed");
                }
            });
        }
        Err(_) => {
            error!(
                %assignment_id,
                "No tokio runtime to release on; the lease stays held until it expires"
            );
        }
    }
}

/// Result of a scoped lease: the body's outcome plus any release failure.
#[derive(Debug)]
pub struct ScopedOutcome<T, E> {
    /// The reservation failure or the body's own result.
    pub result: std::result::Result<T, E>,
    /// Set when the release after the body failed.
    pub release_error: Option<MaestroError>,
}

impl<T, E> ScopedOutcome<T, E> {
    /// The primary outcome. Release failures were already logged.
    pub fn into_result(self) -> std::result::Result<T, E> {
        self.result
    }
}

impl LeaseClient {
    /// Reserve, run `body` with the assignment, release, and report both outcomes.
    pub async fn run_scoped<F, Fut, T, E>(
        &self,
        params: &RequestComputeParams,
        body: F,
    ) -> ScopedOutcome<T, E>
    where
        F: FnOnce(ComputeAssignment) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<MaestroError>,
    {
        let guard = match self.lease(params).await {
            Ok(guard) => guard,
            Err(e) => {
                return ScopedOutcome {
                    result: Err(E::from(e)),
                    release_error: None,
                }
            }
        };

        let result = body(guard.assignment().clone()).await;

        let assignment_id = guard.assignment().assignment_id.clone();
        let release_error = match guard.release().await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    %assignment_id,
                    body_succeeded = result.is_ok(),
                    error = %e,
                    "Failed to release compute after scoped use"
                );
                Some(e)
            }
        };

        ScopedOutcome {
            result,
            release_error,
        }
    }

    /// Reserve, run `body` with the assignment, and always release.
    ///
    /// Returns the body's outcome; a release failure never replaces it.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let text = leases
    ///     .with_lease(&RequestComputeParams::for_service("ollama"), |assignment| async move {
    ///         let url = format!("{}/api/tags", assignment.base_url());
    ///         Ok::<_, MaestroError>(reqwest::get(url).await?.text().await?)
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_lease<F, Fut, T, E>(
        &self,
        params: &RequestComputeParams,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(ComputeAssignment) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<MaestroError>,
    {
        self.run_scoped(params, body).await.into_result()
    }
}
