//! Configuration for the bridge and its RPC server.
//!
//! Fixed limits live on [`RpcConfig`]; per-deployment settings are in
//! [`ServerConfig`], which can be loaded from a JSON file.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Transport and main-loop constants.
pub struct RpcConfig;

impl RpcConfig {
    pub const DEFAULT_HOSTNAME: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 54444;

    /// Largest accepted frame payload.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_CONNECTIONS: usize = 64;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// How often `MainLoop::run_until` rechecks its shutdown token.
    pub const MAIN_LOOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
}

/// Attribute visibility rules applied by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    /// Allow names starting with `_`.
    pub allow_private_attrs: bool,
    pub allow_setattr: bool,
    pub allow_delattr: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            allow_private_attrs: false,
            allow_setattr: true,
            allow_delattr: true,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
    /// 0 lets the OS pick a port.
    pub port: u16,
    pub access: AccessPolicy,
    /// Upper bound on a network thread's wait for the main thread.
    /// `None` waits as long as the main thread takes.
    pub wait_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: RpcConfig::DEFAULT_HOSTNAME.to_string(),
            port: RpcConfig::DEFAULT_PORT,
            access: AccessPolicy::default(),
            wait_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
            message: format!("Failed to read config {}: {}", path.display(), e),
            source: Some(e),
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}
