//! Transports carrying whole text frames to and from the backend.
//!
//! The connection supervisor only needs an ordered sink and stream of text
//! frames; framing, TLS and the handshake belong to the [`Connector`].
//!
//! - [`WebSocketConnector`]: the production transport (`tokio-tungstenite`).
//! - [`MemoryConnector`]: an in-process pair of channels for tests and
//!   embedders that host the backend in the same process.

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WebSocketConnector;

use crate::{MaestroError, Result};
use futures::{Sink, Stream};
use std::pin::Pin;
use url::Url;

/// Outgoing half of an established transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = MaestroError> + Send>>;

/// Incoming half of an established transport. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established transport, split into its two halves.
pub struct TransportLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportLink { .. }")
    }
}

/// Establishes transports to the backend.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`, authenticating with a bearer `token`.
    async fn connect(&self, url: &Url, token: &str) -> Result<TransportLink>;
}
