//! In-process transport backed by channels.
//!
//! Each successful [`MemoryConnector::connect`] hands a [`MemoryPeer`] to the
//! paired [`MemoryListener`], which plays the backend: it reads the frames the
//! client sent and pushes frames back.

use super::{Connector, TransportLink};
use crate::{MaestroError, Result};
use futures::channel::mpsc as frame_channel;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Client side of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Backend side: yields one [`MemoryPeer`] per established connection.
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// One established in-memory connection, seen from the backend.
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: Url,
    pub token: String,
    from_client: frame_channel::UnboundedReceiver<String>,
    to_client: frame_channel::UnboundedSender<Result<String>>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its connections.
    pub fn pair() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryListener { peers: rx })
    }

    /// Make subsequent connection attempts fail with a transport error.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url, token: &str) -> Result<TransportLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(MaestroError::transport("connection refused"));
        }

        let (client_tx, from_client) = frame_channel::unbounded::<String>();
        let (to_client, client_rx) = frame_channel::unbounded::<Result<String>>();

        let peer = MemoryPeer {
            url: url.clone(),
            token: token.to_string(),
            from_client,
            to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| MaestroError::transport("memory listener is gone"))?;

        Ok(TransportLink {
            sink: Box::pin(client_tx.sink_map_err(MaestroError::transport)),
            stream: Box::pin(client_rx),
        })
    }
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

impl MemoryPeer {
    /// Next frame sent by the client, or `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Deliver a frame to the client. Returns false if the client hung up.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Deliver a receive error to the client.
    pub fn send_error(&self, error: MaestroError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Close the connection from the backend side.
    pub fn close(self) {
        self.to_client.close_channel();
    }
}
