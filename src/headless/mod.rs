//! Headless mode - JSON event output
//!
//! Runs the chat client without any UI and writes structured JSON events to
//! stdout, one per line (NDJSON). Each event has an "event" field naming its
//! type.
//!
//! # Example Output
//!
//! ```json
//! {"event":"logged_in","user_id":"u1","username":"alice","timestamp":1704700001000}
//! {"event":"session_state","state":"Ready","attempt":0,"last_error":null,"timestamp":1704700002000}
//! {"event":"store_changed","revision":3,"snapshot":{"rooms":[],"messages":{}},"timestamp":1704700003000}
//! ```

pub mod command;
pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use chatwire_app::StoreSnapshot;
use chatwire_client::{SessionSnapshot, SessionState};

pub use runner::{run_headless, HeadlessOptions};

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Login succeeded
    LoggedIn {
        user_id: String,
        username: String,
        timestamp: i64,
    },

    /// The realtime session changed state
    SessionState {
        state: SessionState,
        attempt: u32,
        last_error: Option<String>,
        timestamp: i64,
    },

    /// The chat store changed
    StoreChanged {
        revision: u64,
        snapshot: StoreSnapshot,
        timestamp: i64,
    },

    /// The credential was revoked or the user logged out
    SignedOut { reason: String, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        // Flush so line-oriented readers see it immediately
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn logged_in(user_id: &str, username: &str) -> Self {
        Self::LoggedIn {
            user_id: user_id.to_string(),
            username: username.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn session_state(snapshot: &SessionSnapshot) -> Self {
        Self::SessionState {
            state: snapshot.state,
            attempt: snapshot.attempt,
            last_error: snapshot.last_error.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn store_changed(revision: u64, snapshot: StoreSnapshot) -> Self {
        Self::StoreChanged {
            revision,
            snapshot,
            timestamp: Self::now(),
        }
    }

    pub fn signed_out(reason: impl ToString) -> Self {
        Self::SignedOut {
            reason: reason.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: impl ToString, fatal: bool) -> Self {
        Self::Error {
            message: message.to_string(),
            fatal,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_logged_in_serialization() {
        let value = to_value(&HeadlessEvent::logged_in("u1", "alice"));

        assert_eq!(value["event"], "logged_in");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["username"], "alice");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_session_state_serialization() {
        let snapshot = SessionSnapshot {
            state: SessionState::Reconnecting,
            attempt: 2,
            last_error: Some("connection refused".to_string()),
            ..SessionSnapshot::default()
        };
        let value = to_value(&HeadlessEvent::session_state(&snapshot));

        assert_eq!(value["event"], "session_state");
        assert_eq!(value["state"], "Reconnecting");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["last_error"], "connection refused");
    }

    #[test]
    fn test_store_changed_serialization() {
        let value = to_value(&HeadlessEvent::store_changed(7, StoreSnapshot::default()));

        assert_eq!(value["event"], "store_changed");
        assert_eq!(value["revision"], 7);
        assert!(value["snapshot"]["rooms"].is_array());
        assert_eq!(value["snapshot"]["authenticated"], false);
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("session failed", true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "session failed");
        assert_eq!(value["fatal"], true);
    }
}
