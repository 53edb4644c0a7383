//! Configuration file parsing for chatwire
//!
//! Supports:
//! - `.chatwire/config.toml` - Server endpoints, reconnect policy, typing and session tuning
//! - `CHATWIRE_API_URL` / `CHATWIRE_SOCKET_URL` environment overrides

pub mod settings;
pub mod types;

pub use settings::{
    apply_env_overrides, init_config_dir, load_settings, ENV_API_URL, ENV_SOCKET_URL,
};
pub use types::*;
