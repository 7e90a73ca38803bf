//! Fixed tunables for the downstream proxies.

use std::time::Duration;

/// Services, default models and HTTP timeouts used by the proxies.
pub struct ProxyDefaults;

impl ProxyDefaults {
    pub const OLLAMA_SERVICE: &'static str = "ollama";

    pub const TRANSCRIPTION_SERVICE: &'static str = "transcription";
    pub const TRANSCRIPTION_MODEL: &'static str = "whisper";
    pub const TRANSCRIBE_PATH: &'static str = "/transcribe";

    pub const DIFFUSION_SERVICE: &'static str = "diffusion";
    pub const DIFFUSION_MODEL: &'static str = "sdxl-turbo";
    pub const DIFFUSE_PATH: &'static str = "/diffuse";

    /// Timeout for short management calls (list, show, delete, copy).
    pub const API_TIMEOUT: Duration = Duration::from_secs(10);
    /// Timeout for non-streaming inference and model transfers.
    pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
    /// Connect timeout for every downstream call. Streams have no total timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub const USER_AGENT: &'static str = concat!("maestro/", env!("CARGO_PKG_VERSION"));
}
