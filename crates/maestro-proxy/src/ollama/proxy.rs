//! Ollama calls routed through a freshly reserved backend.
//!
//! Every call reserves `{service: "ollama", model}`, talks to the assigned
//! backend through a cached [`OllamaClient`] and releases the assignment. A
//! streamed response carries its lease and releases it when the stream ends.

use super::client::{OllamaClient, StreamableRequest};
use super::types::*;
use crate::cache::ClientCache;
use crate::config::ProxyDefaults;
use crate::stream::Streamable;
use maestro_core::{ComputeAssignment, LeaseClient, LeaseGuard, RequestComputeParams, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Leased access to Ollama backends.
#[derive(Debug)]
pub struct OllamaProxy {
    leases: LeaseClient,
    clients: ClientCache<OllamaClient>,
}

impl OllamaProxy {
    pub fn new(leases: LeaseClient) -> Self {
        Self {
            leases,
            clients: ClientCache::new(),
        }
    }

    /// Clients created so far, one per backend.
    pub fn clients(&self) -> &ClientCache<OllamaClient> {
        &self.clients
    }

    fn params(model: Option<&str>) -> RequestComputeParams {
        let params = RequestComputeParams::for_service(ProxyDefaults::OLLAMA_SERVICE);
        match model {
            Some(model) => params.with_model(model),
            None => params,
        }
    }

    fn client_for(&self, assignment: &ComputeAssignment) -> Result<Arc<OllamaClient>> {
        self.clients
            .get_or_try_insert(&assignment.endpoint(), OllamaClient::for_backend)
    }

    async fn streamable<R: StreamableRequest>(&self, request: R) -> Result<Streamable<R::Response>> {
        let lease = self.leases.lease(&Self::params(Some(request.model()))).await?;

        let outcome = match self.client_for(lease.assignment()) {
            Ok(client) => client.send_streamable(request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Streamable::Stream(stream)) => Ok(Streamable::Stream(stream.with_lease(lease))),
            other => {
                release_logged(lease).await;
                other
            }
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<Streamable<ChatResponse>> {
        self.streamable(request).await
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<Streamable<GenerateResponse>> {
        self.streamable(request).await
    }

    pub async fn pull(&self, request: PullRequest) -> Result<Streamable<ProgressResponse>> {
        self.streamable(request).await
    }

    pub async fn push(&self, request: PushRequest) -> Result<Streamable<ProgressResponse>> {
        self.streamable(request).await
    }

    pub async fn create(&self, request: CreateRequest) -> Result<Streamable<ProgressResponse>> {
        self.streamable(request).await
    }

    pub async fn delete(&self, request: &DeleteRequest) -> Result<StatusResponse> {
        self.leases
            .with_lease(&Self::params(Some(&request.model)), |assignment| async move {
                self.client_for(&assignment)?.delete_model(request).await
            })
            .await
    }

    /// Copy a model. The backend is chosen by the source model.
    pub async fn copy(&self, request: &CopyRequest) -> Result<StatusResponse> {
        self.leases
            .with_lease(&Self::params(Some(&request.source)), |assignment| async move {
                self.client_for(&assignment)?.copy_model(request).await
            })
            .await
    }

    pub async fn show(&self, request: &ShowRequest) -> Result<ShowResponse> {
        self.leases
            .with_lease(&Self::params(Some(&request.model)), |assignment| async move {
                self.client_for(&assignment)?.show_model(request).await
            })
            .await
    }

    pub async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse> {
        self.leases
            .with_lease(&Self::params(Some(&request.model)), |assignment| async move {
                self.client_for(&assignment)?.embed(request).await
            })
            .await
    }

    /// Models registered on whichever Ollama backend is assigned.
    pub async fn list(&self) -> Result<Vec<OllamaModel>> {
        self.leases
            .with_lease(&Self::params(None), |assignment| async move {
                self.client_for(&assignment)?.list_models().await
            })
            .await
    }

    /// Models loaded in memory on whichever Ollama backend is assigned.
    pub async fn ps(&self) -> Result<Vec<RunningModel>> {
        self.leases
            .with_lease(&Self::params(None), |assignment| async move {
                self.client_for(&assignment)?.list_running_models().await
            })
            .await
    }

    /// Cancel in-flight streams on every cached backend client.
    ///
    /// Needs no reservation. Returns the number of clients aborted; each is
    /// ready for new calls immediately afterwards.
    pub fn abort(&self) -> usize {
        let clients = self.clients.clients();
        for client in &clients {
            client.abort();
        }
        info!(clients = clients.len(), "Aborted Ollama streams");
        clients.len()
    }
}

async fn release_logged(lease: LeaseGuard) {
    let assignment_id = lease.assignment().assignment_id.clone();
    if let Err(e) = lease.release().await {
        warn!(%assignment_id, error = %e, "Failed to release compute after Ollama call");
    }
}
