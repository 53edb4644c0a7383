//! Configuration types for chatwire
//!
//! Defines:
//! - `Settings` - Application settings (`.chatwire/config.toml`)
//! - One sub-struct per TOML section

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chatwire_client::gateway::{AuthPaths, DEFAULT_QUEUE_LIMIT};
use chatwire_client::session::{BackoffPolicy, SessionConfig};
use chatwire_core::prelude::*;

/// Application settings (.chatwire/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub typing: TypingSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

/// Remote endpoints
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Base URL of the HTTP API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Realtime endpoint (ws:// or wss://)
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// Per-request timeout for HTTP calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_socket_url() -> String {
    "ws://localhost:3001".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Reconnect backoff
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failed attempts before the session gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

/// Outbound typing indicators
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TypingSettings {
    /// Quiet period after which `typing_stop` is sent
    #[serde(default = "default_auto_stop_ms")]
    pub auto_stop_ms: u64,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            auto_stop_ms: default_auto_stop_ms(),
        }
    }
}

fn default_auto_stop_ms() -> u64 {
    3000
}

/// Session behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionSettings {
    /// How long to wait for `authenticated` after the transport opens
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Ask for rooms and online users after every handshake
    #[serde(default = "default_true")]
    pub request_initial_data: bool,

    /// Calls allowed to wait on one credential refresh
    #[serde(default = "default_refresh_queue_limit")]
    pub refresh_queue_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_timeout_ms: default_auth_timeout_ms(),
            request_initial_data: true,
            refresh_queue_limit: default_refresh_queue_limit(),
        }
    }
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_refresh_queue_limit() -> usize {
    DEFAULT_QUEUE_LIMIT
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(Error::config_invalid("reconnect.base_delay_ms must be > 0"));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(Error::config_invalid(format!(
                "reconnect.max_delay_ms ({}) is below base_delay_ms ({})",
                reconnect.max_delay_ms, reconnect.base_delay_ms
            )));
        }
        if self.typing.auto_stop_ms == 0 {
            return Err(Error::config_invalid("typing.auto_stop_ms must be > 0"));
        }
        if self.session.auth_timeout_ms == 0 {
            return Err(Error::config_invalid("session.auth_timeout_ms must be > 0"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(Error::config_invalid("server.request_timeout_ms must be > 0"));
        }
        if self.session.refresh_queue_limit == 0 {
            return Err(Error::config_invalid(
                "session.refresh_queue_limit must be > 0",
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.reconnect.base_delay_ms),
                Duration::from_millis(self.reconnect.max_delay_ms),
                self.reconnect.max_attempts,
            ),
            auth_timeout: Duration::from_millis(self.session.auth_timeout_ms),
            typing_auto_stop: Duration::from_millis(self.typing.auto_stop_ms),
            request_initial_data: self.session.request_initial_data,
        }
    }

    pub fn auth_paths(&self) -> AuthPaths {
        AuthPaths {
            login: self.server.login_path.clone(),
            refresh: self.server.refresh_path.clone(),
            logout: self.server.logout_path.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}
