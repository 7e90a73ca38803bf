//! Reserve/release as remote operations over the shared connection.

use super::scoped::LeaseGuard;
use super::types::{ComputeAssignment, RequestComputeParams};
use crate::connection::Connection;
use crate::protocol::Action;
use crate::{MaestroError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client for the lease protocol.
///
/// Cheap to clone; every clone shares the same [`Connection`].
#[derive(Debug, Clone)]
pub struct LeaseClient {
    connection: Arc<Connection>,
}

impl LeaseClient {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Ask the backend for a compute endpoint matching `params`.
    ///
    /// Waits until the matching reply arrives (or the configured request
    /// timeout fires). A successful reply without a payload is reported as
    /// [`MaestroError::Remote`]; a payload that is not an assignment as
    /// [`MaestroError::Protocol`]. If such a payload still names an
    /// `assignmentId`, that assignment is released before the error returns.
    pub async fn reserve_compute(&self, params: &RequestComputeParams) -> Result<ComputeAssignment> {
        debug!(service = ?params.service, model = ?params.model, "Reserving compute");

        let payload = self
            .connection
            .call(Action::Reserve, serde_json::to_value(params)?)
            .await?
            .filter(|payload| !payload.is_null())
            .ok_or_else(|| MaestroError::Remote("reservation reply carried no assignment".to_string()))?;

        // Kept so a grant the client cannot decode is still handed back.
        let granted_id = payload
            .get("assignmentId")
            .and_then(|id| id.as_str())
            .map(str::to_owned);

        let assignment: ComputeAssignment = match serde_json::from_value(payload) {
            Ok(assignment) => assignment,
            Err(e) => {
                if let Some(assignment_id) = granted_id {
                    warn!(%assignment_id, error = %e, "Releasing undecodable reservation");
                    if let Err(release_err) = self.release_compute(&assignment_id).await {
                        warn!(%assignment_id, error = %release_err, "Failed to release undecodable reservation");
                    }
                }
                return Err(MaestroError::protocol(
                    format!("reservation payload is not an assignment: {}", e),
                    Some(e),
                ));
            }
        };

        info!(
            assignment_id = %assignment.assignment_id,
            host = %assignment.host,
            port = assignment.port,
            expires_at = %assignment.expires_at,
            "Reserved compute"
        );
        Ok(assignment)
    }

    /// Tell the backend the assignment is no longer in use.
    ///
    /// The acknowledgement payload, if any, is ignored.
    pub async fn release_compute(&self, assignment_id: &str) -> Result<()> {
        self.connection
            .call(Action::Release, json!({ "assignmentId": assignment_id }))
            .await?;

        info!(assignment_id, "Released compute");
        Ok(())
    }

    /// Reserve and wrap the assignment in a guard that releases it.
    pub async fn lease(&self, params: &RequestComputeParams) -> Result<LeaseGuard> {
        let assignment = self.reserve_compute(params).await?;
        Ok(LeaseGuard::new(self.clone(), assignment))
    }
}
