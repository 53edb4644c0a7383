//! Settings loader for .chatwire/config.toml

use std::path::Path;

use super::types::Settings;
use chatwire_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const CHATWIRE_DIR: &str = ".chatwire";

/// Overrides `server.api_url`.
pub const ENV_API_URL: &str = "CHATWIRE_API_URL";

/// Overrides `server.socket_url`.
pub const ENV_SOCKET_URL: &str = "CHATWIRE_SOCKET_URL";

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from .chatwire/config.toml, then apply environment overrides.
///
/// Returns default settings if the file doesn't exist, can't be parsed, or
/// fails validation.
pub fn load_settings(project_path: &Path) -> Settings {
    let mut settings = read_settings_file(project_path);
    apply_env_overrides(&mut settings);

    if let Err(e) = settings.validate() {
        warn!("Ignoring invalid settings: {}", e);
        let mut defaults = Settings::default();
        apply_env_overrides(&mut defaults);
        return defaults;
    }
    settings
}

fn read_settings_file(project_path: &Path) -> Settings {
    let config_path = project_path.join(CHATWIRE_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Apply `CHATWIRE_API_URL` / `CHATWIRE_SOCKET_URL` when set and non-empty.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(url) = env_value(ENV_API_URL) {
        debug!("{} overrides api_url", ENV_API_URL);
        settings.server.api_url = url;
    }
    if let Some(url) = env_value(ENV_SOCKET_URL) {
        debug!("{} overrides socket_url", ENV_SOCKET_URL);
        settings.server.socket_url = url;
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Create a commented default config file in .chatwire/
///
/// Leaves an existing file untouched.
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let chatwire_dir = project_path.join(CHATWIRE_DIR);

    if !chatwire_dir.exists() {
        std::fs::create_dir_all(&chatwire_dir)
            .with_context(|| format!("Failed to create {}", chatwire_dir.display()))?;
    }

    let config_path = chatwire_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .context("Failed to write config.toml")?;
        info!("Wrote default settings to {:?}", config_path);
    }

    Ok(())
}

fn generate_default_config() -> String {
    r#"# chatwire configuration
# CHATWIRE_API_URL and CHATWIRE_SOCKET_URL override the server URLs below.

[server]
api_url = "http://localhost:3001/api"
socket_url = "ws://localhost:3001"
login_path = "/auth/login"
refresh_path = "/auth/refresh"
logout_path = "/auth/logout"
request_timeout_ms = 15000

[reconnect]
base_delay_ms = 1000    # First retry delay, doubled per attempt
max_delay_ms = 10000    # Upper bound for a single delay
max_attempts = 5        # Give up (state "Failed") after this many

[typing]
auto_stop_ms = 3000     # Send typing_stop after this much quiet

[session]
auth_timeout_ms = 10000
request_initial_data = true
refresh_queue_limit = 64
"#
    .to_string()
}
