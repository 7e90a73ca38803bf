//! Resource-lease protocol layered on the shared connection.
//!
//! - [`LeaseClient`]: `RESERVE` / `RELEASE` as request/response calls.
//! - [`LeaseGuard`] and [`LeaseClient::with_lease`]: scoped acquisition with
//!   guaranteed release.

mod client;
mod scoped;
mod types;

pub use client::LeaseClient;
pub use scoped::{LeaseGuard, ScopedOutcome};
pub use types::{BackendKey, ComputeAssignment, RequestComputeParams};
