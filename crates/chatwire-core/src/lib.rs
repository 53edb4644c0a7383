//! # chatwire-core - Core Domain Types
//!
//! Foundation crate for chatwire. Provides chat domain types, the decoded
//! realtime event model, error handling, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`ChatMessage`], [`Room`], [`Presence`], [`Principal`]
//! - [`RoomId`], [`UserId`], [`MessageId`] identifier aliases
//!
//! ### Events (`events`)
//! - [`InboundEvent`] - Tagged variant for everything the remote service pushes
//! - [`OutboundEvent`] - Typed events this client emits
//! - [`parse_inbound()`] - Decode a named wire event
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with fatal / signs-out classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use chatwire_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all chatwire crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{
    names, parse_inbound, AuthOutcome, InboundEvent, MessageEdit, OutboundEvent, RoomOrigin,
    ServerError, TypingNotice,
};
pub use types::{
    ChatMessage, DeliveryStatus, MessageId, MessageKind, Presence, PresenceStatus, Principal,
    Room, RoomId, RoomKind, RoomMember, UserId, UserSummary,
};
