//! # chatwire-client - Realtime Client Runtime
//!
//! Keeps one authenticated realtime connection alive and coordinates it with
//! an HTTP gateway that refreshes expiring credentials.
//!
//! ## Public API
//!
//! ### Credentials (`credential`)
//! - [`CredentialStore`] - Shared holder of the bearer credential, with sign-out notifications
//!
//! ### Request Gateway (`gateway`)
//! - [`RequestGateway`] - HTTP calls with single-flight credential refresh
//! - [`HttpBackend`] / [`ReqwestBackend`] - Backend seam and its `reqwest` implementation
//!
//! ### Session (`session`)
//! - [`SessionManager`] - Connection lifecycle, reconnect with backoff, room resubscription
//! - [`SessionMachine`] - Sans-IO state machine behind the manager
//! - [`Connector`] / [`WsConnector`] - Transport seam and its WebSocket implementation
//! - [`EventSink`] - Receives decoded inbound events
//!
//! ### Typing (`typing`)
//! - [`TypingScheduler`] - Outbound typing indicators with auto-stop
//!
//! ## Test helpers
//!
//! With the `test-helpers` feature, `test_utils` provides `MockConnector` and
//! `MockBackend`.

pub mod credential;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod typing;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use credential::{Credential, CredentialStore, SignOutReason};
pub use gateway::{
    ApiRequest, ApiResponse, AuthPaths, HttpBackend, HttpMethod, RefreshGuard, ReqwestBackend,
    RequestGateway,
};
pub use protocol::WireFrame;
pub use session::{
    BackoffPolicy, Connector, EventSink, SessionConfig, SessionMachine, SessionManager,
    SessionSnapshot, SessionState, TransportLink, TransportSignal, WsConnector,
};
pub use typing::{TypingEmitter, TypingScheduler, TypingTimer};
