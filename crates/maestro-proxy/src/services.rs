//! Leased calls to single-purpose inference services.

use crate::config::ProxyDefaults;
use crate::http::{build_client, check_status, net_err};
use maestro_core::{LeaseClient, RequestComputeParams, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Arguments for [`ServiceProxy::transcribe`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeParams {
    pub audio_file_path: String,
    /// Service-specific fields, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TranscribeParams {
    pub fn new(audio_file_path: impl Into<String>) -> Self {
        Self {
            audio_file_path: audio_file_path.into(),
            extra: Map::new(),
        }
    }
}

/// Arguments for [`ServiceProxy::diffusion`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffusionParams {
    pub prompt: String,
    /// Generation controls, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DiffusionParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            extra: Map::new(),
        }
    }
}

/// Transcription and image generation on reserved backends.
#[derive(Debug, Clone)]
pub struct ServiceProxy {
    leases: LeaseClient,
    http: reqwest::Client,
}

impl ServiceProxy {
    pub fn new(leases: LeaseClient) -> Result<Self> {
        Ok(Self {
            leases,
            http: build_client(Some(ProxyDefaults::GENERATION_TIMEOUT))?,
        })
    }

    /// Transcribe audio on a `transcription`/`whisper` backend.
    pub async fn transcribe(&self, params: &TranscribeParams) -> Result<Value> {
        self.post_leased(
            ProxyDefaults::TRANSCRIPTION_SERVICE,
            ProxyDefaults::TRANSCRIPTION_MODEL,
            ProxyDefaults::TRANSCRIBE_PATH,
            params,
        )
        .await
    }

    /// Generate an image on a `diffusion`/`sdxl-turbo` backend.
    pub async fn diffusion(&self, params: &DiffusionParams) -> Result<Value> {
        self.post_leased(
            ProxyDefaults::DIFFUSION_SERVICE,
            ProxyDefaults::DIFFUSION_MODEL,
            ProxyDefaults::DIFFUSE_PATH,
            params,
        )
        .await
    }

    async fn post_leased<B: Serialize>(
        &self,
        service: &str,
        model: &str,
        path: &str,
        body: &B,
    ) -> Result<Value> {
        let params = RequestComputeParams::for_service(service).with_model(model);

        self.leases
            .with_lease(&params, |assignment| async move {
                let url = format!("{}{}", assignment.base_url(), path);
                debug!(url = %url, service, "POST");

                let response = self
                    .http
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| net_err(format!("Failed to reach {} backend at {}: {}", service, url, e)))?;
                let response = check_status(response, service).await?;

                response
                    .json::<Value>()
                    .await
                    .map_err(|e| net_err(format!("Failed to parse {} response: {}", service, e)))
            })
            .await
    }
}
