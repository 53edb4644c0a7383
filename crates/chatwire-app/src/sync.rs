//! Synchronization sink
//!
//! Applies inbound events to a [`ChatStore`] in arrival order. Dispatch is one
//! exhaustive `match` over [`InboundEvent`]; each arm reads the slice it
//! touches, runs a pure reducer from [`reduce`], and writes the result back
//! through one store mutator.

use std::collections::BTreeSet;

use chatwire_client::EventSink;
use chatwire_core::prelude::*;
use chatwire_core::InboundEvent;

use crate::store::ChatStore;

/// Pure `(current slice, event) -> new slice` functions.
pub mod reduce {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use chatwire_core::{ChatMessage, MessageEdit, Presence, Room, UserId};

    /// Apply an edit to the stored message.
    pub fn apply_edit(mut message: ChatMessage, edit: &MessageEdit) -> ChatMessage {
        message.content = edit.content.clone();
        message.edited = true;
        message.edited_at = Some(edit.edited_at.unwrap_or_else(Utc::now));
        message
    }

    /// A new message makes its room the most recently active.
    pub fn touch_room(mut room: Room, message: &ChatMessage) -> Room {
        if room.last_activity.map_or(true, |at| at < message.timestamp) {
            room.last_activity = Some(message.timestamp);
        }
        room
    }

    /// Announced rooms replace stored ones but keep local counters the
    /// announcement does not carry.
    pub fn merge_room(existing: Option<Room>, mut incoming: Room) -> Room {
        if let Some(existing) = existing {
            if incoming.unread_count == 0 {
                incoming.unread_count = existing.unread_count;
            }
            if incoming.last_activity.is_none() {
                incoming.last_activity = existing.last_activity;
            }
            if incoming.created_at.is_none() {
                incoming.created_at = existing.created_at;
            }
        }
        incoming
    }

    pub fn merge_presence(existing: Option<Presence>, mut incoming: Presence) -> Presence {
        if let Some(existing) = existing {
            if incoming.username.is_none() {
                incoming.username = existing.username;
            }
            if incoming.last_seen.is_none() {
                incoming.last_seen = existing.last_seen;
            }
        }
        incoming
    }

    pub fn typing_started(mut users: BTreeSet<UserId>, user_id: &str) -> BTreeSet<UserId> {
        users.insert(user_id.to_string());
        users
    }

    pub fn typing_stopped(mut users: BTreeSet<UserId>, user_id: &str) -> BTreeSet<UserId> {
        users.remove(user_id);
        users
    }
}

/// [`EventSink`] writing into a [`ChatStore`].
#[derive(Debug)]
pub struct SyncSink<S> {
    store: S,
}

impl<S: ChatStore> SyncSink<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Apply one event.
    pub fn apply_event(&mut self, event: InboundEvent) {
        let store = &mut self.store;

        match event {
            InboundEvent::MessageCreated(message) => {
                if let Some(room) = store.room(&message.room_id) {
                    store.upsert_room(reduce::touch_room(room, &message));
                }
                store.upsert_message(message);
            }
            InboundEvent::MessageEdited(edit) => match store.find_message(&edit.message_id) {
                Some(current) => store.upsert_message(reduce::apply_edit(current, &edit)),
                None => debug!("Edit for unknown message {}", edit.message_id),
            },
            InboundEvent::MessageDeleted {
                message_id,
                room_id,
            } => store.remove_message(&room_id, &message_id),
            InboundEvent::MessageHistory { room_id, messages } => {
                store.replace_messages(&room_id, messages)
            }
            InboundEvent::RoomCreated { room, .. } => {
                let existing = store.room(&room.id);
                store.upsert_room(reduce::merge_room(existing, room));
            }
            InboundEvent::RoomListSnapshot(rooms) => store.replace_rooms(rooms),
            InboundEvent::PresenceChanged(presence) => {
                let existing = store.presence(&presence.user_id);
                store.set_presence(reduce::merge_presence(existing, presence));
            }
            InboundEvent::OnlineUsers(users) => store.replace_presence(users),
            InboundEvent::TypingStarted(notice) => {
                let users = reduce::typing_started(store.typing(&notice.room_id), &notice.user_id);
                store.set_typing(&notice.room_id, users);
            }
            InboundEvent::TypingStopped(notice) => {
                let current: BTreeSet<_> = store.typing(&notice.room_id);
                if current.contains(&notice.user_id) {
                    let users = reduce::typing_stopped(current, &notice.user_id);
                    store.set_typing(&notice.room_id, users);
                }
            }
            InboundEvent::AuthResult(outcome) => {
                store.set_authenticated(outcome.success);
                if !outcome.success {
                    store.record_error(
                        outcome
                            .message
                            .unwrap_or_else(|| "authentication failed".to_string()),
                    );
                }
            }
            InboundEvent::TransportError(err) => {
                warn!("Server reported error: {}", err.message);
                store.record_error(err.message);
            }
        }
    }
}

impl<S: ChatStore> EventSink for SyncSink<S> {
    fn apply(&mut self, event: InboundEvent) {
        trace!("Applying {}", event.tag());
        self.apply_event(event);
    }
}
