//! # chatwire-app - Application Layer
//!
//! Configuration, the reactive chat store, the synchronization sink that feeds
//! it from the realtime session, and the [`ChatClient`] facade.
//!
//! ## Public API
//!
//! ### Configuration (`config`)
//! - [`Settings`] - Parsed `.chatwire/config.toml`
//! - [`config::load_settings`] - Load with defaults and environment overrides
//!
//! ### Store (`store`)
//! - [`ChatStore`] - Mutators and read accessors the sink writes through
//! - [`MemoryStore`] - In-process store with a revision counter
//!
//! ### Synchronization (`sync`)
//! - [`SyncSink`] - Applies inbound events to a [`ChatStore`]
//!
//! ### Client (`client`)
//! - [`ChatClient`] - Login, session lifecycle, and chat helpers

pub mod client;
pub mod config;
pub mod store;
pub mod sync;

pub use client::{ChatClient, DefaultChatClient};
pub use config::Settings;
pub use store::{ChatStore, MemoryStore, StoreSnapshot};
pub use sync::SyncSink;
