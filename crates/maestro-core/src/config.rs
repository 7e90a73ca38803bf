//! Configuration for the Maestro client.
//!
//! Fixed tunables live as associated constants on unit structs; the values a
//! deployment must supply (backend address and bearer token) live on
//! [`MaestroConfig`].

use crate::{MaestroError, Result};
use std::time::Duration;
use url::Url;

/// Connection-level defaults.
pub struct ConnectionDefaults;

impl ConnectionDefaults {
    /// Literal heartbeat probe sent by the backend.
    pub const HEARTBEAT_PROBE: &'static str = "ping";
    /// Literal heartbeat answer sent back on the same connection.
    pub const HEARTBEAT_RESPONSE: &'static str = "pong";
    /// Capacity of the outbound frame queue feeding the transport writer.
    pub const OUTBOUND_BUFFER: usize = 64;
    /// Capacity of the connection event broadcast channel.
    pub const EVENT_BUFFER: usize = 16;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CONNECT_RETRY_ATTEMPTS: u32 = 5;
}

/// Environment variable names read by [`MaestroConfig::from_env`].
pub struct EnvVars;

impl EnvVars {
    pub const BACKEND_URL: &'static str = "MAESTRO_BACKEND_URL";
    pub const API_TOKEN: &'static str = "MAESTRO_API_TOKEN";
    pub const REQUEST_TIMEOUT_MS: &'static str = "MAESTRO_REQUEST_TIMEOUT_MS";
}

/// Runtime configuration for a [`Connection`](crate::Connection).
#[derive(Clone)]
pub struct MaestroConfig {
    /// WebSocket address of the coordinating backend.
    pub backend_url: Url,
    /// Bearer credential sent on the handshake.
    pub api_token: String,
    /// Optional per-request deadline. `None` waits until settled.
    pub request_timeout: Option<Duration>,
    pub outbound_buffer: usize,
    /// Fail every pending request with `ConnectionLost` when the link drops.
    pub fail_pending_on_disconnect: bool,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for MaestroConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaestroConfig")
            .field("backend_url", &self.backend_url.as_str())
            .field("api_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("fail_pending_on_disconnect", &self.fail_pending_on_disconnect)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl MaestroConfig {
    /// Create a builder for the given backend address and token.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = MaestroConfig::builder("wss://maestro.example/ws", "secret")
    ///     .request_timeout(Duration::from_secs(30))
    ///     .build()?;
    /// ```
    pub fn builder(backend_url: impl Into<String>, api_token: impl Into<String>) -> MaestroConfigBuilder {
        MaestroConfigBuilder {
            backend_url: backend_url.into(),
            api_token: api_token.into(),
            request_timeout: None,
            outbound_buffer: ConnectionDefaults::OUTBOUND_BUFFER,
            fail_pending_on_disconnect: true,
            connect_timeout: ConnectionDefaults::CONNECT_TIMEOUT,
        }
    }

    /// Load configuration from `MAESTRO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(EnvVars::BACKEND_URL).ok_or_else(|| MaestroError::Config {
            message: format!("{} is not set", EnvVars::BACKEND_URL),
        })?;
        let token = lookup(EnvVars::API_TOKEN).ok_or_else(|| MaestroError::Config {
            message: format!("{} is not set", EnvVars::API_TOKEN),
        })?;

        let mut builder = Self::builder(url, token);
        if let Some(raw) = lookup(EnvVars::REQUEST_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| MaestroError::Config {
                message: format!("{} must be an integer, got '{}'", EnvVars::REQUEST_TIMEOUT_MS, raw),
            })?;
            builder = builder.request_timeout(Duration::from_millis(millis));
        }
        builder.build()
    }

    /// Check the invariants the connection relies on.
    pub fn validate(&self) -> Result<()> {
        match self.backend_url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(MaestroError::Config {
                    message: format!("backend URL scheme must be ws or wss, got '{}'", other),
                })
            }
        }
        if self.api_token.trim().is_empty() {
            return Err(MaestroError::Config {
                message: "API token must not be empty".to_string(),
            });
        }
        if self.outbound_buffer == 0 {
            return Err(MaestroError::Config {
                message: "outbound buffer must hold at least one frame".to_string(),
            });
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(MaestroError::Config {
                message: "request timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`MaestroConfig`].
#[derive(Debug, Clone)]
pub struct MaestroConfigBuilder {
    backend_url: String,
    api_token: String,
    request_timeout: Option<Duration>,
    outbound_buffer: usize,
    fail_pending_on_disconnect: bool,
    connect_timeout: Duration,
}

impl MaestroConfigBuilder {
    /// Fail requests that have not been settled within `timeout`.
    ///
    /// Default: no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Capacity of the queue of request frames waiting for the writer.
    ///
    /// Senders wait while it is full. Heartbeat answers bypass it.
    pub fn outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames;
        self
    }

    /// Whether pending requests are failed when the connection drops.
    ///
    /// Default: `true`. With `false`, callers of in-flight requests wait until
    /// their request timeout (if any) fires.
    pub fn fail_pending_on_disconnect(mut self, enable: bool) -> Self {
        self.fail_pending_on_disconnect = enable;
        self
    }

    /// Give up on establishing the transport after `timeout`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Parse the URL and validate the result.
    pub fn build(self) -> Result<MaestroConfig> {
        let backend_url = Url::parse(&self.backend_url).map_err(|e| MaestroError::Config {
            message: format!("invalid backend URL '{}': {}", self.backend_url, e),
        })?;

        let config = MaestroConfig {
            backend_url,
            api_token: self.api_token,
            request_timeout: self.request_timeout,
            outbound_buffer: self.outbound_buffer,
            fail_pending_on_disconnect: self.fail_pending_on_disconnect,
            connect_timeout: self.connect_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}
