//! Sans-IO session state machine
//!
//! [`SessionMachine::handle`] maps one [`SessionInput`] to the list of
//! [`SessionAction`]s the driver must perform. The machine never touches a
//! socket, a timer, or a clock, so every transition is unit-testable.

use std::time::Duration;

use chatwire_core::prelude::*;
use chatwire_core::{OutboundEvent, PresenceStatus, RoomId};

use super::state::{BackoffPolicy, SessionConfig, SessionSnapshot, SessionState};
use crate::credential::SignOutReason;

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Caller asked to connect.
    Connect,
    /// The transport finished its handshake.
    TransportOpened,
    /// The server accepted the credential.
    AuthAccepted,
    /// The server rejected the credential.
    AuthRejected { reason: String },
    /// An established transport closed or errored.
    TransportLost { reason: String },
    /// Opening the transport failed.
    TransportFailed { reason: String },
    /// No `authenticated` reply arrived in time.
    AuthTimedOut,
    /// The reconnect delay is over.
    BackoffElapsed,
    /// A reconnect found the credential store empty.
    SignedOut,
    /// Caller asked to disconnect.
    Disconnect,
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    SetPresence(PresenceStatus),
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a transport with the current credential.
    OpenTransport,
    /// Drop the current transport.
    CloseTransport,
    /// Feed [`SessionInput::AuthTimedOut`] back after this long.
    ArmAuthTimeout(Duration),
    /// Re-join exactly these rooms and refetch their history.
    Resubscribe(Vec<RoomId>),
    /// Announce this presence.
    BroadcastPresence(PresenceStatus),
    /// Ask for the room list and online users.
    RequestInitialData,
    /// Feed [`SessionInput::BackoffElapsed`] back after `delay`.
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Drop any pending reconnect.
    CancelReconnect,
    /// Sign the user out.
    SignOut(SignOutReason),
    /// Send an event right away.
    Emit(OutboundEvent),
    /// Cancel the typing timer for one room without emitting.
    ForgetTyping(RoomId),
    /// Cancel every typing timer without emitting.
    CancelTyping,
}

/// The session state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    snapshot: SessionSnapshot,
    policy: BackoffPolicy,
    auth_timeout: Duration,
    request_initial_data: bool,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            snapshot: SessionSnapshot::default(),
            policy: config.backoff,
            auth_timeout: config.auth_timeout,
            request_initial_data: config.request_initial_data,
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    /// Apply `input` and return the resulting actions.
    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionAction> {
        use SessionState::*;

        let state = self.snapshot.state;
        match (state, input) {
            // ── Lifecycle ─────────────────────────────────────────────────
            (Disconnected | Failed, SessionInput::Connect) => {
                self.transition(Connecting);
                self.snapshot.attempt = 0;
                self.snapshot.last_error = None;
                vec![SessionAction::OpenTransport]
            }
            (_, SessionInput::Connect) => {
                debug!("Connect ignored: session already {}", state);
                Vec::new()
            }

            (Connecting, SessionInput::TransportOpened) => {
                self.transition(AwaitingAuth);
                vec![SessionAction::ArmAuthTimeout(self.auth_timeout)]
            }

            (AwaitingAuth, SessionInput::AuthAccepted) => {
                self.transition(Ready);
                self.snapshot.attempt = 0;
                self.snapshot.last_error = None;

                let rooms = self.snapshot.subscribed_rooms.iter().cloned().collect();
                let mut actions = vec![
                    SessionAction::Resubscribe(rooms),
                    SessionAction::BroadcastPresence(self.snapshot.presence),
                ];
                if self.request_initial_data {
                    actions.push(SessionAction::RequestInitialData);
                }
                actions
            }

            (AwaitingAuth, SessionInput::AuthRejected { reason }) => {
                warn!("Session authentication rejected: {}", reason);
                self.transition(Disconnected);
                self.snapshot.attempt = 0;
                self.snapshot.subscribed_rooms.clear();
                self.snapshot.last_error = Some(reason.clone());
                vec![
                    SessionAction::CloseTransport,
                    SessionAction::CancelTyping,
                    SessionAction::SignOut(SignOutReason::AuthRejected { reason }),
                ]
            }

            (Ready | AwaitingAuth | Connecting, SessionInput::TransportLost { reason })
            | (Connecting | AwaitingAuth, SessionInput::TransportFailed { reason }) => {
                self.enter_reconnecting(reason)
            }

            (AwaitingAuth, SessionInput::AuthTimedOut) => {
                self.enter_reconnecting("authentication timed out".to_string())
            }

            (Reconnecting, SessionInput::BackoffElapsed) => {
                self.transition(Connecting);
                vec![SessionAction::OpenTransport]
            }

            (Connecting | Reconnecting, SessionInput::SignedOut) => {
                self.transition(Disconnected);
                self.snapshot.attempt = 0;
                self.snapshot.subscribed_rooms.clear();
                self.snapshot.last_error = Some("signed out".to_string());
                vec![
                    SessionAction::CloseTransport,
                    SessionAction::CancelReconnect,
                    SessionAction::CancelTyping,
                ]
            }

            (_, SessionInput::Disconnect) => {
                if state != Disconnected {
                    self.transition(Disconnected);
                }
                self.snapshot.attempt = 0;
                self.snapshot.subscribed_rooms.clear();
                vec![
                    SessionAction::CloseTransport,
                    SessionAction::CancelReconnect,
                    SessionAction::CancelTyping,
                ]
            }

            // ── Rooms and presence ────────────────────────────────────────
            (_, SessionInput::JoinRoom(room_id)) => {
                self.snapshot.subscribed_rooms.insert(room_id.clone());
                if state.is_ready() {
                    vec![SessionAction::Emit(OutboundEvent::JoinRoom(room_id))]
                } else {
                    Vec::new()
                }
            }

            (_, SessionInput::LeaveRoom(room_id)) => {
                self.snapshot.subscribed_rooms.remove(&room_id);
                let mut actions = vec![SessionAction::ForgetTyping(room_id.clone())];
                if state.is_ready() {
                    actions.push(SessionAction::Emit(OutboundEvent::LeaveRoom(room_id)));
                }
                actions
            }

            (_, SessionInput::SetPresence(status)) => {
                self.snapshot.presence = status;
                if state.is_ready() {
                    vec![SessionAction::Emit(OutboundEvent::UpdateStatus(status))]
                } else {
                    Vec::new()
                }
            }

            // ── Anything else is stale ────────────────────────────────────
            (_, input) => {
                debug!("Ignoring {:?} while {}", input, state);
                Vec::new()
            }
        }
    }

    fn enter_reconnecting(&mut self, reason: String) -> Vec<SessionAction> {
        self.snapshot.last_error = Some(reason);

        if self.snapshot.attempt >= self.policy.max_attempts {
            error!(
                "Session: exceeded {} reconnection attempts, giving up",
                self.policy.max_attempts
            );
            self.transition(SessionState::Failed);
            return vec![SessionAction::CloseTransport, SessionAction::CancelTyping];
        }

        self.snapshot.attempt += 1;
        let attempt = self.snapshot.attempt;
        let delay = self.policy.delay_for(attempt);
        warn!(
            "Session: connection lost ({}), retrying in {:?} (attempt {}/{})",
            self.snapshot.last_error.as_deref().unwrap_or("unknown"),
            delay,
            attempt,
            self.policy.max_attempts
        );
        self.transition(SessionState::Reconnecting);
        vec![
            SessionAction::CloseTransport,
            SessionAction::ScheduleReconnect { attempt, delay },
        ]
    }

    fn transition(&mut self, next: SessionState) {
        if self.snapshot.state != next {
            debug!("Session: {} -> {}", self.snapshot.state, next);
            self.snapshot.state = next;
        }
    }
}
