//! HTTP client for one Ollama backend.
//!
//! Instances are created per `(host, port)` by the proxy and shared for the
//! life of the process. Non-streaming calls run under a total timeout;
//! streaming calls run until the body ends or [`OllamaClient::abort`] fires.

use super::types::*;
use crate::cancel::CancellationToken;
use crate::config::ProxyDefaults;
use crate::http::{build_client, check_status, net_err};
use crate::stream::{ndjson_stream, LeasedStream, ResponseStream, Streamable};
use maestro_core::{BackendKey, MaestroError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// A request Ollama can answer either once or as an NDJSON stream.
pub trait StreamableRequest: Serialize + Send + Sync {
    type Response: DeserializeOwned + Send + 'static;

    /// Endpoint path, e.g. `/api/chat`.
    const PATH: &'static str;

    /// Model named by the request, used to pick a backend.
    fn model(&self) -> &str;

    fn stream_flag(&mut self) -> &mut Option<bool>;
}

macro_rules! streamable_request {
    ($request:ty => $response:ty, $path:literal) => {
        impl StreamableRequest for $request {
            type Response = $response;
            const PATH: &'static str = $path;

            fn model(&self) -> &str {
                &self.model
            }

            fn stream_flag(&mut self) -> &mut Option<bool> {
                &mut self.stream
            }
        }
    };
}

streamable_request!(ChatRequest => ChatResponse, "/api/chat");
streamable_request!(GenerateRequest => GenerateResponse, "/api/generate");
streamable_request!(PullRequest => ProgressResponse, "/api/pull");
streamable_request!(PushRequest => ProgressResponse, "/api/push");
streamable_request!(CreateRequest => ProgressResponse, "/api/create");

/// HTTP client for a running Ollama instance.
#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    /// Client for inference and model transfers, which can run for minutes.
    generation_client: reqwest::Client,
    /// Client with no total timeout for streamed responses.
    stream_client: reqwest::Client,
    /// Token handed to new streams; replaced on abort.
    abort: Mutex<CancellationToken>,
}

impl OllamaClient {
    /// Create a client targeting `base_url`, e.g. `http://10.0.0.5:11434`.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(Some(ProxyDefaults::API_TIMEOUT))?,
            generation_client: build_client(Some(ProxyDefaults::GENERATION_TIMEOUT))?,
            stream_client: build_client(None)?,
            abort: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn for_backend(key: &BackendKey) -> Result<Self> {
        Self::new(&format!("http://{}", key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn abort_slot(&self) -> MutexGuard<'_, CancellationToken> {
        self.abort.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel every stream currently running on this client.
    ///
    /// Streams started afterwards are unaffected.
    pub fn abort(&self) {
        let mut token = self.abort_slot();
        token.cancel();
        *token = CancellationToken::new();
        info!(base_url = %self.base_url, "Aborted in-flight Ollama streams");
    }

    /// Send a streamable request, honouring its `stream` flag.
    ///
    /// An unset flag means a single response, and is sent as `false`.
    pub async fn send_streamable<R: StreamableRequest>(
        &self,
        mut request: R,
    ) -> Result<Streamable<R::Response>> {
        let streaming = *request.stream_flag().get_or_insert(false);

        if streaming {
            let stream = self.post_stream(R::PATH, &request).await?;
            Ok(Streamable::Stream(LeasedStream::unleased(stream)))
        } else {
            let response = self
                .post_json(&self.generation_client, R::PATH, &request)
                .await?;
            Ok(Streamable::Single(response))
        }
    }

    /// Delete a model.
    pub async fn delete_model(&self, request: &DeleteRequest) -> Result<StatusResponse> {
        let url = self.url("/api/delete");
        info!(model = %request.model, "Deleting Ollama model");

        let response = self
            .client
            .delete(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send delete request to Ollama: {}", e)))?;
        check_status(response, "Ollama delete API").await?;

        Ok(StatusResponse::success())
    }

    /// Copy a model under a new name.
    pub async fn copy_model(&self, request: &CopyRequest) -> Result<StatusResponse> {
        let url = self.url("/api/copy");
        info!(source = %request.source, destination = %request.destination, "Copying Ollama model");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send copy request to Ollama: {}", e)))?;
        check_status(response, "Ollama copy API").await?;

        Ok(StatusResponse::success())
    }

    /// Show the modelfile, template and parameters of a model.
    pub async fn show_model(&self, request: &ShowRequest) -> Result<ShowResponse> {
        self.post_json(&self.client, "/api/show", request).await
    }

    /// Compute embeddings.
    pub async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse> {
        self.post_json(&self.generation_client, "/api/embed", request)
            .await
    }

    /// List models registered in the running Ollama instance.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>> {
        let tags: TagsResponse = self.get_json("/api/tags").await?;
        let models = tags.models.unwrap_or_default();
        debug!(count = models.len(), "Listed Ollama models");
        Ok(models)
    }

    /// List models currently loaded in Ollama's memory.
    pub async fn list_running_models(&self) -> Result<Vec<RunningModel>> {
        let ps: PsResponse = self.get_json("/api/ps").await?;
        let models = ps.models.unwrap_or_default();
        debug!(count = models.len(), "Listed running Ollama models");
        Ok(models)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to connect to Ollama at {}: {}", url, e)))?;
        let response = check_status(response, "Ollama API").await?;

        response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse Ollama response from {}: {}", path, e)))
    }

    async fn post_json<B, T>(&self, client: &reqwest::Client, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let response = client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to connect to Ollama at {}: {}", url, e)))?;
        let response = check_status(response, "Ollama API").await?;

        response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse Ollama response from {}: {}", path, e)))
    }

    async fn post_stream<B, T>(&self, path: &str, body: &B) -> Result<ResponseStream<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let token = self.abort_slot().clone();
        let url = self.url(path);
        debug!(url = %url, "POST (streaming)");

        let send = self.stream_client.post(&url).json(body).send();
        let response = tokio::select! {
            _ = token.cancelled() => return Err(MaestroError::Cancelled),
            response = send => response
                .map_err(|e| net_err(format!("Failed to connect to Ollama at {}: {}", url, e)))?,
        };
        let response = check_status(response, "Ollama API").await?;

        Ok(ndjson_stream(response.bytes_stream(), token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_backend_builds_base_url() {
        let client = OllamaClient::for_backend(&BackendKey::new("10.0.0.5", 11434)).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.5:11434");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.url("/api/tags"), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_abort_rearms_token() {
        let client = OllamaClient::new("http://localhost:11434").unwrap();
        let before = client.abort_slot().clone();

        client.abort();

        assert!(before.is_cancelled());
        assert!(!client.abort_slot().is_cancelled());
    }

    #[test]
    fn test_streamable_paths() {
        assert_eq!(<ChatRequest as StreamableRequest>::PATH, "/api/chat");
        assert_eq!(<CreateRequest as StreamableRequest>::PATH, "/api/create");
    }
}
