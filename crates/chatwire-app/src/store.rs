//! Reactive chat store
//!
//! [`ChatStore`] is the only surface the synchronization sink writes to.
//! [`MemoryStore`] is the in-process implementation: a shared snapshot plus a
//! `watch` revision counter bumped on every mutation, so observers know when
//! to re-render.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::watch;

use chatwire_core::prelude::*;
use chatwire_core::{ChatMessage, Presence, Room, RoomId, UserId};

/// Read accessors and mutators over the chat state.
///
/// Reads return owned slices; every write replaces one slice.
#[cfg_attr(test, mockall::automock)]
pub trait ChatStore: Send {
    fn messages(&self, room_id: &str) -> Vec<ChatMessage>;
    /// Look a message up across all rooms.
    fn find_message(&self, message_id: &str) -> Option<ChatMessage>;
    fn room(&self, room_id: &str) -> Option<Room>;
    fn presence(&self, user_id: &str) -> Option<Presence>;
    fn typing(&self, room_id: &str) -> BTreeSet<UserId>;

    /// Insert, or replace the message with the same id in place.
    fn upsert_message(&mut self, message: ChatMessage);
    fn remove_message(&mut self, room_id: &str, message_id: &str);
    fn replace_messages(&mut self, room_id: &str, messages: Vec<ChatMessage>);
    /// Replace the room with the same id in place, or insert it first.
    fn upsert_room(&mut self, room: Room);
    fn replace_rooms(&mut self, rooms: Vec<Room>);
    fn set_presence(&mut self, presence: Presence);
    fn replace_presence(&mut self, users: Vec<Presence>);
    fn set_typing(&mut self, room_id: &str, users: BTreeSet<UserId>);
    fn set_authenticated(&mut self, authenticated: bool);
    fn record_error(&mut self, message: String);
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the store holds, serializable for headless output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Most recently announced first.
    pub rooms: Vec<Room>,
    /// Per room, in arrival order.
    pub messages: BTreeMap<RoomId, Vec<ChatMessage>>,
    pub presence: BTreeMap<UserId, Presence>,
    pub typing: BTreeMap<RoomId, BTreeSet<UserId>>,
    pub authenticated: bool,
    pub last_error: Option<String>,
}

/// In-process [`ChatStore`]. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreSnapshot>>,
    // watch::Sender is not Clone
    revision: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(StoreSnapshot::default())),
            revision: Arc::new(revision),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read(Clone::clone)
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.read(|s| s.rooms.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|s| s.authenticated)
    }

    pub fn last_error(&self) -> Option<String> {
        self.read(|s| s.last_error.clone())
    }

    /// Current revision; bumped once per mutation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watch the revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Drop all chat state, e.g. after sign-out.
    pub fn reset(&self) {
        self.mutate(|s| *s = StoreSnapshot::default());
    }

    fn read<T>(&self, f: impl FnOnce(&StoreSnapshot) -> T) -> T {
        f(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn mutate(&self, f: impl FnOnce(&mut StoreSnapshot)) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            f(&mut state);
        }
        self.revision.send_modify(|r| *r += 1);
    }
}

impl ChatStore for MemoryStore {
    fn messages(&self, room_id: &str) -> Vec<ChatMessage> {
        self.read(|s| s.messages.get(room_id).cloned().unwrap_or_default())
    }

    fn find_message(&self, message_id: &str) -> Option<ChatMessage> {
        self.read(|s| {
            s.messages
                .values()
                .flatten()
                .find(|m| m.id == message_id)
                .cloned()
        })
    }

    fn room(&self, room_id: &str) -> Option<Room> {
        self.read(|s| s.rooms.iter().find(|r| r.id == room_id).cloned())
    }

    fn presence(&self, user_id: &str) -> Option<Presence> {
        self.read(|s| s.presence.get(user_id).cloned())
    }

    fn typing(&self, room_id: &str) -> BTreeSet<UserId> {
        self.read(|s| s.typing.get(room_id).cloned().unwrap_or_default())
    }

    fn upsert_message(&mut self, message: ChatMessage) {
        self.mutate(|s| {
            let messages = s.messages.entry(message.room_id.clone()).or_default();
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => messages.push(message),
            }
        });
    }

    fn remove_message(&mut self, room_id: &str, message_id: &str) {
        self.mutate(|s| {
            if let Some(messages) = s.messages.get_mut(room_id) {
                messages.retain(|m| m.id != message_id);
            }
        });
    }

    fn replace_messages(&mut self, room_id: &str, messages: Vec<ChatMessage>) {
        self.mutate(|s| {
            s.messages.insert(room_id.to_string(), messages);
        });
    }

    fn upsert_room(&mut self, room: Room) {
        self.mutate(|s| match s.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => *existing = room,
            None => s.rooms.insert(0, room),
        });
    }

    fn replace_rooms(&mut self, rooms: Vec<Room>) {
        self.mutate(|s| s.rooms = rooms);
    }

    fn set_presence(&mut self, presence: Presence) {
        self.mutate(|s| {
            s.presence.insert(presence.user_id.clone(), presence);
        });
    }

    fn replace_presence(&mut self, users: Vec<Presence>) {
        self.mutate(|s| {
            s.presence = users.into_iter().map(|p| (p.user_id.clone(), p)).collect();
        });
    }

    fn set_typing(&mut self, room_id: &str, users: BTreeSet<UserId>) {
        self.mutate(|s| {
            if users.is_empty() {
                s.typing.remove(room_id);
            } else {
                s.typing.insert(room_id.to_string(), users);
            }
        });
    }

    fn set_authenticated(&mut self, authenticated: bool) {
        self.mutate(|s| {
            s.authenticated = authenticated;
            if authenticated {
                s.last_error = None;
            }
        });
    }

    fn record_error(&mut self, message: String) {
        debug!("Store error recorded: {}", message);
        self.mutate(|s| s.last_error = Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: &str, room_id: &str, content: &str) -> ChatMessage {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "roomId": room_id,
            "senderId": "u1",
            "content": content,
            "timestamp": Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }))
        .unwrap()
    }

    fn room(id: &str, name: &str) -> Room {
        serde_json::from_value(serde_json::json!({ "id": id, "name": name })).unwrap()
    }

    #[test]
    fn test_upsert_message_replaces_in_place() {
        let mut store = MemoryStore::new();
        store.upsert_message(message("m1", "r1", "one"));
        store.upsert_message(message("m2", "r1", "two"));
        store.upsert_message(message("m1", "r1", "uno"));

        let contents: Vec<String> = store.messages("r1").into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["uno", "two"]);
        assert_eq!(store.find_message("m2").unwrap().content, "two");
        assert!(store.find_message("m9").is_none());
    }

    #[test]
    fn test_upsert_room_inserts_new_rooms_first() {
        let mut store = MemoryStore::new();
        store.upsert_room(room("r1", "General"));
        store.upsert_room(room("r2", "Random"));
        store.upsert_room(room("r1", "General (renamed)"));

        let rooms = store.rooms();
        assert_eq!(rooms[0].id, "r2");
        assert_eq!(rooms[1].name, "General (renamed)");
    }

    #[test]
    fn test_empty_typing_set_is_removed() {
        let mut store = MemoryStore::new();
        store.set_typing("r1", BTreeSet::from(["u2".to_string()]));
        assert_eq!(store.typing("r1").len(), 1);

        store.set_typing("r1", BTreeSet::new());
        assert!(store.snapshot().typing.is_empty());
    }

    #[test]
    fn test_every_mutation_bumps_revision() {
        let mut store = MemoryStore::new();
        let rx = store.subscribe();
        assert_eq!(store.revision(), 0);

        store.upsert_room(room("r1", "General"));
        store.remove_message("r1", "missing");
        store.record_error("boom".to_string());

        assert_eq!(store.revision(), 3);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_authenticating_clears_last_error() {
        let mut store = MemoryStore::new();
        store.record_error("Invalid token".to_string());
        assert_eq!(store.last_error().as_deref(), Some("Invalid token"));

        store.set_authenticated(true);
        assert!(store.is_authenticated());
        assert!(store.last_error().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let mut store = MemoryStore::new();
        let observer = store.clone();
        store.upsert_room(room("r1", "General"));

        assert_eq!(observer.rooms().len(), 1);
        observer.reset();
        assert!(store.rooms().is_empty());
    }
}
