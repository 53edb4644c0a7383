//! Realtime session: state machine, transport seam, and driver.

pub mod machine;
pub mod manager;
pub mod state;
pub mod transport;

pub use machine::{SessionAction, SessionInput, SessionMachine};
pub use manager::{EventSink, SessionManager};
pub use state::{
    BackoffPolicy, SessionConfig, SessionSnapshot, SessionState, DEFAULT_AUTH_TIMEOUT,
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_TYPING_AUTO_STOP,
};
pub use transport::{Connector, LocalConnector, TransportLink, TransportSignal, WsConnector};
