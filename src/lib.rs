//! chatwire Library
//!
//! Realtime chat client runtime: credential refresh, a self-healing session,
//! typing indicators, and a synchronized chat store.

pub mod headless;

// Re-export workspace crates under short names
pub use chatwire_app as app;
pub use chatwire_client as client;
pub use chatwire_core as core;

pub use headless::{run_headless, HeadlessOptions};
