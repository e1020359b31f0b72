//! Session configuration.

use fcp_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default timeout for one-shot global commands, in seconds.
pub const DEFAULT_GLOBAL_COMMANDS_TIMEOUT_SECS: u64 = 20;

/// Default timeout for the `ClientHello` handshake, in seconds.
pub const DEFAULT_HELLO_TIMEOUT_SECS: u64 = 20;

/// Default depth of the bounded request queue.
pub const DEFAULT_REQUEST_QUEUE_DEPTH: usize = 32;

/// Configuration for a node session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Client name sent in `ClientHello`. An empty name is replaced by a
    /// generated `id<epoch-seconds>` token at connect time.
    pub name: String,
    /// Node host.
    pub host: String,
    /// Node FCP port.
    pub port: u16,
    /// Timeout for one-shot global commands (peer management, config,
    /// TestDDA steps), in seconds.
    pub global_commands_timeout_secs: u64,
    /// Timeout for the initial handshake, in seconds.
    pub hello_timeout_secs: u64,
    /// Depth of the bounded request queue; submission blocks when full.
    pub request_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            global_commands_timeout_secs: DEFAULT_GLOBAL_COMMANDS_TIMEOUT_SECS,
            hello_timeout_secs: DEFAULT_HELLO_TIMEOUT_SECS,
            request_queue_depth: DEFAULT_REQUEST_QUEUE_DEPTH,
        }
    }
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Loads defaults, then applies `FCP_NAME`, `FCP_HOST` and `FCP_PORT`
    /// environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("FCP_NAME") {
            self.name = name;
        }
        if let Ok(host) = std::env::var("FCP_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("FCP_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
    }

    pub fn with_global_commands_timeout_secs(mut self, secs: u64) -> Self {
        self.global_commands_timeout_secs = secs;
        self
    }

    pub fn with_hello_timeout_secs(mut self, secs: u64) -> Self {
        self.hello_timeout_secs = secs;
        self
    }

    pub fn with_request_queue_depth(mut self, depth: usize) -> Self {
        self.request_queue_depth = depth.max(1);
        self
    }

    pub fn global_commands_timeout(&self) -> Duration {
        Duration::from_secs(self.global_commands_timeout_secs)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// The name used on the wire: the configured one, or a generated token
    /// when empty.
    pub(crate) fn effective_name(&self) -> String {
        if self.name.is_empty() {
            unique_id()
        } else {
            self.name.clone()
        }
    }
}

/// Generates an `id<epoch-seconds>` token.
pub(crate) fn unique_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("id{secs}")
}
