//! Maestro Core - multiplexed lease client for remotely scheduled compute.
//!
//! One persistent duplex connection to a coordinating backend carries the
//! requests of any number of concurrent callers. Replies are matched back to
//! their callers by a correlation id, the backend's heartbeat probes are
//! answered automatically, and a small lease protocol reserves and releases
//! compute endpoints on top.
//!
//! The downstream HTTP convenience layer lives in the `maestro-proxy` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use maestro_core::{Connection, LeaseClient, MaestroConfig, RequestComputeParams};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> maestro_core::Result<()> {
//!     let config = MaestroConfig::from_env()?;
//!     let connection = Arc::new(Connection::new(config));
//!     connection.connect().await?;
//!
//!     let leases = LeaseClient::new(connection.clone());
//!     leases
//!         .with_lease(&RequestComputeParams::for_service("ollama"), |assignment| async move {
//!             println!("using {}", assignment.base_url());
//!             Ok::<_, maestro_core::MaestroError>(())
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod lease;
pub mod protocol;
pub mod retry;
pub mod transport;

// Re-export commonly used types
pub use config::{ConnectionDefaults, EnvVars, MaestroConfig, MaestroConfigBuilder};
pub use connection::{Connection, ConnectionEvent};
pub use correlation::{CorrelationTable, PendingReply, TableStatsSnapshot};
pub use error::{MaestroError, Result};
pub use lease::{
    BackendKey, ComputeAssignment, LeaseClient, LeaseGuard, RequestComputeParams, ScopedOutcome,
};
pub use protocol::Action;
pub use retry::RetryConfig;
pub use transport::{Connector, MemoryConnector, MemoryListener, MemoryPeer, WebSocketConnector};
