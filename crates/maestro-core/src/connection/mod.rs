//! Connection supervisor for the single persistent backend connection.
//!
//! A [`Connection`] owns the transport, answers heartbeats, and routes replies
//! into its [`CorrelationTable`]. Any number of tasks can issue requests over
//! it concurrently through [`Connection::call`].
//!
//! # Single instance
//!
//! A process is expected to hold exactly one `Connection` per backend,
//! constructed by its composition root and shared by `Arc` with every
//! component that talks to the backend. Nothing enforces this statically.
//!
//! # Lifecycle
//!
//! - [`Connection::connect`] is idempotent; it does nothing while connected.
//! - When the transport ends or fails, the connection flips to disconnected,
//!   broadcasts [`ConnectionEvent::Closed`] and, unless disabled in the
//!   config, fails every pending request with `ConnectionLost`.
//! - Nothing reconnects automatically. Calling `connect` again (or
//!   [`Connection::connect_with_retry`]) establishes a fresh transport.

mod io;

use crate::config::{ConnectionDefaults, MaestroConfig};
use crate::correlation::CorrelationTable;
use crate::protocol::{Action, RequestEnvelope};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::transport::{Connector, WebSocketConnector};
use crate::{MaestroError, Result};
use io::{Link, Outbound, Shared};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Lifecycle notifications broadcast by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Closed,
    /// A transport-level failure; usually followed by `Closed`.
    Error(String),
}

/// The single logical connection to the coordinating backend.
pub struct Connection {
    config: MaestroConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backend_url", &self.config.backend_url.as_str())
            .field("connected", &self.is_connected())
            .field("table", &self.shared.table)
            .finish()
    }
}

impl Connection {
    /// Create a disconnected connection that will use a WebSocket transport.
    pub fn new(config: MaestroConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    /// Create a disconnected connection over a custom transport.
    pub fn with_connector(config: MaestroConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(ConnectionDefaults::EVENT_BUFFER);
        let shared = Arc::new(Shared::new(
            CorrelationTable::new(),
            events,
            config.fail_pending_on_disconnect,
        ));

        Self {
            config,
            connector,
            shared,
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MaestroConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The table of requests awaiting a reply on this connection.
    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.shared.table
    }

    /// Number of heartbeat probes answered since construction.
    pub fn heartbeats_answered(&self) -> u64 {
        self.shared.heartbeats.load(Ordering::Relaxed)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Establish the transport if it is not already up.
    ///
    /// On failure the connection stays disconnected and later sends fail with
    /// [`MaestroError::NotConnected`].
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let url = &self.config.backend_url;
        debug!(url = %url, "Connecting to backend");

        let link = match tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(url, &self.config.api_token),
        )
        .await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Failed to connect to backend");
                let _ = self.shared.events.send(ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let e = MaestroError::Timeout(self.config.connect_timeout);
                warn!(url = %url, error = %e, "Failed to connect to backend");
                let _ = self.shared.events.send(ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(self.config.outbound_buffer);
        let (control_tx, control_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Publish the link before the I/O tasks start so a transport that
        // closes immediately is observed as a loss of this generation.
        self.shared.install(Link {
            generation,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        });

        tokio::spawn(io::write_loop(
            link.sink,
            control_rx,
            outbound_rx,
            self.shared.clone(),
            generation,
        ));
        tokio::spawn(io::read_loop(
            link.stream,
            control_tx,
            shutdown_rx,
            self.shared.clone(),
            generation,
        ));

        info!(url = %url, generation, "Connected to backend");
        let _ = self.shared.events.send(ConnectionEvent::Connected);
        Ok(())
    }

    /// [`connect`](Self::connect), retried with backoff on transport failures.
    pub async fn connect_with_retry(&self, retry: &RetryConfig) -> Result<()> {
        retry_with_backoff(retry, || self.connect()).await
    }

    /// Close the transport deliberately.
    ///
    /// Pending requests are handled exactly as for an unexpected loss.
    pub fn close(&self) {
        if let Some(generation) = self.shared.current_generation() {
            info!(generation, "Closing backend connection");
            self.shared.handle_loss(generation);
        }
    }

    /// Hand one text frame to the transport.
    ///
    /// Resolves once the transport accepted the frame.
    pub async fn send(&self, frame: String) -> Result<()> {
        if !self.is_connected() {
            return Err(MaestroError::NotConnected);
        }
        let outbound = self.shared.outbound().ok_or(MaestroError::NotConnected)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        outbound
            .send(Outbound {
                frame,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| MaestroError::transport("connection writer has stopped"))?;

        ack_rx
            .await
            .map_err(|_| MaestroError::transport("connection closed before the frame was written"))?
    }

    /// Issue one request and wait for its matching reply.
    ///
    /// Returns the reply payload (`None` if a successful reply carried none).
    /// Fails with `NotConnected` before registering anything when the
    /// connection is down, with a transport error if the frame cannot be
    /// written, and with `Remote` when the backend reports failure.
    pub async fn call(&self, action: Action, data: Value) -> Result<Option<Value>> {
        if !self.is_connected() {
            return Err(MaestroError::NotConnected);
        }

        // Dropping `reply` on any early return removes the entry again.
        let (request_id, reply) = self.shared.table.register();
        let frame = RequestEnvelope::new(request_id, action, data).encode()?;

        debug!(request_id, action = %action, "Sending request");
        self.send(frame).await?;

        reply.wait(self.config.request_timeout).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
