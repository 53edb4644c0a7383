//! Session state, snapshot, and reconnect policy.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;

use chatwire_core::{PresenceStatus, RoomId};

/// Default initial reconnect delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default reconnect delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default time allowed between transport open and the `authenticated` reply.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default typing auto-stop interval.
pub const DEFAULT_TYPING_AUTO_STOP: Duration = Duration::from_millis(3000);

/// Connection lifecycle of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    /// Not connected and not trying to connect.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport is open; waiting for the handshake result.
    AwaitingAuth,
    /// Authenticated and able to send.
    Ready,
    /// Connection lost; waiting out the backoff delay.
    Reconnecting,
    /// Reconnect attempts exhausted. Only an explicit connect leaves this state.
    Failed,
}

impl SessionState {
    /// Whether the session is connected or trying to be.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::AwaitingAuth
                | SessionState::Ready
                | SessionState::Reconnecting
        )
    }

    pub fn is_ready(&self) -> bool {
        *self == SessionState::Ready
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::AwaitingAuth => "AwaitingAuth",
            SessionState::Ready => "Ready",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session, published on every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Reconnect attempt counter. Zero while `Ready`.
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Rooms to re-join after every successful handshake.
    pub subscribed_rooms: BTreeSet<RoomId>,
    /// Presence to re-broadcast after every successful handshake.
    pub presence: PresenceStatus,
}

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-indexed).
    ///
    /// `base * 2^(attempt-1)`, capped at `cap`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // checked_shl returns None once the shift reaches the bit width.
        let exponent = attempt.saturating_sub(1);
        let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.cap.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(cap_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Tunables for a [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub backoff: BackoffPolicy,
    pub auth_timeout: Duration,
    pub typing_auto_stop: Duration,
    /// Ask for rooms and online users after every successful handshake.
    pub request_initial_data: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            typing_auto_stop: DEFAULT_TYPING_AUTO_STOP,
            request_initial_data: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|k| policy.delay_for(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(40), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay_for(u32::MAX), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(1), 3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));
    }

    #[test]
    fn test_live_states() {
        assert!(SessionState::Connecting.is_live());
        assert!(SessionState::AwaitingAuth.is_live());
        assert!(SessionState::Ready.is_live());
        assert!(SessionState::Reconnecting.is_live());
        assert!(!SessionState::Disconnected.is_live());
        assert!(!SessionState::Failed.is_live());
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert_eq!(snapshot.attempt, 0);
        assert!(snapshot.subscribed_rooms.is_empty());
        assert_eq!(snapshot.presence, PresenceStatus::Online);
    }
}
