//! Maestro Proxy - downstream clients that run under a compute lease.
//!
//! Each call reserves a backend through [`maestro_core::LeaseClient`], talks
//! to it over HTTP and releases the reservation on every exit path.
//!
//! - [`OllamaProxy`]: the Ollama REST API, with per-backend client caching,
//!   streaming responses and abort.
//! - [`ServiceProxy`]: transcription and diffusion services.
//!
//! # Example
//!
//! ```rust,ignore
//! use maestro_proxy::{GenerateRequest, OllamaProxy};
//!
//! let proxy = OllamaProxy::new(leases);
//! let reply = proxy
//!     .generate(GenerateRequest {
//!         model: "llama3.1".into(),
//!         prompt: "Why is the sky blue?".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod ollama;
pub mod services;
pub mod stream;

mod http;

pub use cache::ClientCache;
pub use cancel::{CancellationToken, CancelledError};
pub use config::ProxyDefaults;
pub use ollama::*;
pub use services::{DiffusionParams, ServiceProxy, TranscribeParams};
pub use stream::{LeasedStream, ResponseStream, Streamable};
