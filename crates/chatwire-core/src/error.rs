//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Realtime Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Authentication rejected: {reason}")]
    AuthRejected { reason: String },

    #[error("Cannot send '{event}': session is {state}")]
    SendWhileNotReady { event: String, state: String },

    #[error("Malformed '{event}' event: {reason}")]
    MalformedEvent { event: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Request Gateway Errors
    // ─────────────────────────────────────────────────────────────
    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Request was not authorized")]
    Unauthorized,

    #[error("Credential refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("Too many calls waiting on credential refresh (limit {limit})")]
    RefreshQueueFull { limit: usize },

    #[error("Not signed in")]
    NotSignedIn,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn auth_rejected(reason: impl Into<String>) -> Self {
        Self::AuthRejected {
            reason: reason.into(),
        }
    }

    pub fn send_while_not_ready(event: impl Into<String>, state: impl ToString) -> Self {
        Self::SendWhileNotReady {
            event: event.into(),
            state: state.to_string(),
        }
    }

    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn refresh_failed(reason: impl Into<String>) -> Self {
        Self::RefreshFailed {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this error should end the program
    ///
    /// Retrying cannot help: the configuration must be fixed first.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigInvalid { .. })
    }

    /// Check if this error means the user has been signed out
    ///
    /// These surface as a top-level "signed out" condition rather than a
    /// transient failure.
    pub fn signs_out(&self) -> bool {
        matches!(
            self,
            Error::AuthRejected { .. } | Error::RefreshFailed { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
