//! Deployment configuration.
//!
//! [`Configuration`] holds the concrete values that drive session behavior.
//! Construct one with [`Configuration::default`] and adjust it with the
//! builder-style setters, or deserialize it from JSON with
//! [`Configuration::from_json`].
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `session_timeout` | 600 s |
//! | `bootstrap_timeout` | 10 s |
//! | `server_push_timeout` | 50 s |
//! | `max_request_size` | 128 KiB |
//! | `max_form_data_size` | 5 MiB |
//! | `session_tracking` | `CookiesUrl` |
//! | `session_id_length` | 16 |
//! | `worker_threads` | available CPU parallelism |
//! | `two_phase_threshold` | 5000 bytes |
//! | `progressive_boot` | false |

use serde::Deserialize;
use std::time::Duration;

/// How the session credential is transported between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SessionTracking {
    /// Only the `wtd` URL/form parameter carries the session id.
    Url,
    /// A tracking cookie when the client supports cookies, the URL
    /// parameter otherwise.
    CookiesUrl,
    /// URL parameter plus a secondary random cookie that must both match.
    Combined,
}

/// Deployment configuration for a [`Controller`](crate::controller::Controller).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Idle time after which a loaded session expires, in seconds.
    pub session_timeout: u64,
    /// Grace period for the client to confirm it finished loading, in
    /// seconds.
    pub bootstrap_timeout: u64,
    /// Time after which an open push connection is proactively closed and
    /// renewed, in seconds.
    pub server_push_timeout: u64,
    /// Maximum accepted request body size in bytes.
    pub max_request_size: usize,
    /// Maximum accepted accumulated form-data size in bytes.
    pub max_form_data_size: usize,
    /// Session credential transport policy.
    pub session_tracking: SessionTracking,
    /// Length of generated session id tokens, in random bytes (the encoded
    /// id is twice this).
    pub session_id_length: usize,
    /// Number of worker threads in the request pool.
    pub worker_threads: usize,
    /// Incremental updates larger than this many bytes are delivered via a
    /// follow-up update round-trip rather than inline in a page render.
    pub two_phase_threshold: usize,
    /// Start the application already during the bootstrap page, before the
    /// client's script capabilities are known.
    pub progressive_boot: bool,
    /// Require a correct response puzzle on the load signal. Disabled by
    /// default; when set, a failing puzzle quits the application.
    pub require_response_puzzle: bool,
}

impl Configuration {
    /// Parse a configuration from a JSON document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Normalize configuration values to safe minimums.
    pub fn normalize(&mut self) {
        if self.session_timeout == 0 {
            self.session_timeout = 1;
        }
        if self.bootstrap_timeout == 0 {
            self.bootstrap_timeout = 1;
        }
        if self.session_id_length < 8 {
            self.session_id_length = 8;
        }
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
    }

    /// Set the session timeout.
    #[must_use]
    pub fn session_timeout(mut self, seconds: u64) -> Self {
        self.session_timeout = seconds;
        self
    }

    /// Set the bootstrap timeout.
    #[must_use]
    pub fn bootstrap_timeout(mut self, seconds: u64) -> Self {
        self.bootstrap_timeout = seconds;
        self
    }

    /// Set the session tracking policy.
    #[must_use]
    pub fn session_tracking(mut self, tracking: SessionTracking) -> Self {
        self.session_tracking = tracking;
        self
    }

    /// Set the maximum request body size.
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    /// Set the worker pool size.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Enable or disable progressive boot.
    #[must_use]
    pub fn progressive_boot(mut self, enabled: bool) -> Self {
        self.progressive_boot = enabled;
        self
    }

    /// Returns the session timeout as a [`Duration`].
    #[must_use]
    pub const fn session_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    /// Returns the bootstrap timeout as a [`Duration`].
    #[must_use]
    pub const fn bootstrap_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout)
    }

    /// Returns the push timeout as a [`Duration`].
    #[must_use]
    pub const fn server_push_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.server_push_timeout)
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            session_timeout: 600,
            bootstrap_timeout: 10,
            server_push_timeout: 50,
            max_request_size: 128 * 1024,
            max_form_data_size: 5 * 1024 * 1024,
            session_tracking: SessionTracking::CookiesUrl,
            session_id_length: 16,
            worker_threads: Self::default_worker_threads(),
            two_phase_threshold: 5000,
            progressive_boot: false,
            require_response_puzzle: false,
        }
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("session_timeout", &self.session_timeout)
            .field("bootstrap_timeout", &self.bootstrap_timeout)
            .field("session_tracking", &self.session_tracking)
            .field("worker_threads", &self.worker_threads)
            .finish_non_exhaustive()
    }
}
