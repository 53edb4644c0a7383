//! ChatClient facade
//!
//! Wires one [`CredentialStore`], [`RequestGateway`], [`SessionManager`], and
//! [`MemoryStore`] together and watches for sign-out.

use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use chatwire_client::gateway::{ApiRequest, HttpBackend, ReqwestBackend, RequestGateway};
use chatwire_client::session::{
    Connector, SessionManager, SessionSnapshot, SessionState, WsConnector,
};
use chatwire_client::{Credential, CredentialStore, SignOutReason};
use chatwire_core::prelude::*;
use chatwire_core::{
    ChatMessage, MessageKind, OutboundEvent, PresenceStatus, Principal, Room, UserId,
};

use crate::config::Settings;
use crate::store::{ChatStore, MemoryStore};
use crate::sync::SyncSink;

/// Page size used by [`ChatClient::load_history`].
pub const HISTORY_PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
struct RoomsPage {
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct MessagesPage {
    messages: Vec<ChatMessage>,
}

/// Production client over WebSocket and `reqwest`.
pub type DefaultChatClient = ChatClient<WsConnector, ReqwestBackend>;

/// High-level chat client.
///
/// Dropping it stops the sign-out watcher; the session itself is only torn
/// down by [`ChatClient::logout`] or [`ChatClient::disconnect`].
pub struct ChatClient<C, B> {
    credentials: CredentialStore,
    gateway: RequestGateway<B>,
    session: SessionManager<C>,
    store: MemoryStore,
    principal: Arc<RwLock<Option<Principal>>>,
    watcher: JoinHandle<()>,
}

impl DefaultChatClient {
    /// Build a client from validated settings.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let connector = WsConnector::new(&settings.server.socket_url)?;
        let backend = ReqwestBackend::new(&settings.server.api_url, settings.request_timeout())?;
        Ok(Self::new(connector, backend, settings))
    }
}

impl<C, B> ChatClient<C, B>
where
    C: Connector + Send + Sync + 'static,
    B: HttpBackend + Send + Sync + 'static,
{
    /// Must be called from within a Tokio runtime.
    pub fn new(connector: C, backend: B, settings: &Settings) -> Self {
        let credentials = CredentialStore::new();
        let gateway = RequestGateway::new(
            backend,
            credentials.clone(),
            settings.auth_paths(),
            settings.session.refresh_queue_limit,
        );
        let session = SessionManager::new(
            connector,
            credentials.clone(),
            settings.session_config(),
        );
        let store = MemoryStore::new();
        let principal = Arc::new(RwLock::new(None));

        let watcher = tokio::spawn(watch_sign_out(
            credentials.subscribe(),
            session.clone(),
            store.clone(),
            Arc::clone(&principal),
        ));

        Self {
            credentials,
            gateway,
            session,
            store,
            principal,
            watcher,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Log in over HTTP, then open the realtime session.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Principal> {
        let principal = self.gateway.login(identifier, password).await?;
        let credential = self.credentials.get().ok_or(Error::NotSignedIn)?;
        self.set_principal(Some(principal.clone()));
        self.start_session(credential);
        Ok(principal)
    }

    /// Open the realtime session with a credential obtained elsewhere.
    pub fn resume(&self, credential: Credential) {
        self.credentials.set(credential.clone());
        self.start_session(credential);
    }

    fn start_session(&self, credential: Credential) {
        self.session
            .connect_with_sink(credential, SyncSink::new(self.store.clone()));
    }

    /// Log out on the server, then tear the session down and clear the store.
    pub async fn logout(&self) {
        self.gateway.logout().await;
        self.session.disconnect();
        self.set_principal(None);
        self.store.reset();
    }

    /// Tear the session down but stay signed in.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rooms and messages
    // ─────────────────────────────────────────────────────────────────────────

    pub fn send_message(&self, room_id: &str, content: &str) -> Result<()> {
        self.send_message_with(room_id, content, MessageKind::Text, None)
    }

    pub fn send_message_with(
        &self,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        reply_to: Option<&str>,
    ) -> Result<()> {
        self.session.emit(OutboundEvent::SendMessage {
            room_id: room_id.to_string(),
            content: content.to_string(),
            kind,
            reply_to: reply_to.map(str::to_string),
        })?;
        // A message ends the typing burst.
        self.session.stop_typing(room_id);
        Ok(())
    }

    pub fn edit_message(&self, message_id: &str, content: &str) -> Result<()> {
        self.session.emit(OutboundEvent::EditMessage {
            message_id: message_id.to_string(),
            content: content.to_string(),
        })
    }

    pub fn delete_message(&self, message_id: &str) -> Result<()> {
        self.session.emit(OutboundEvent::DeleteMessage {
            message_id: message_id.to_string(),
        })
    }

    /// Subscribe to a room and ask for its recent messages.
    ///
    /// Before the session is `Ready` both are deferred to the resubscribe
    /// that follows the handshake.
    pub fn join_room(&self, room_id: &str) {
        self.session.join_room(room_id);
        if self.session.state().is_ready() {
            if let Err(e) = self
                .session
                .emit(OutboundEvent::GetMessages(room_id.to_string()))
            {
                debug!("History for {} not requested: {}", room_id, e);
            }
        }
    }

    pub fn leave_room(&self, room_id: &str) {
        self.session.leave_room(room_id);
    }

    pub fn create_private_chat(&self, target_user_id: &str) -> Result<()> {
        self.session.emit(OutboundEvent::CreatePrivateChat {
            target_user_id: target_user_id.to_string(),
        })
    }

    pub fn create_group_chat(&self, name: &str, member_ids: Vec<UserId>) -> Result<()> {
        self.session.emit(OutboundEvent::CreateGroupChat {
            name: name.to_string(),
            member_ids,
        })
    }

    pub fn typing(&self, room_id: &str) {
        self.session.typing(room_id);
    }

    pub fn stop_typing(&self, room_id: &str) {
        self.session.stop_typing(room_id);
    }

    pub fn set_presence(&self, status: PresenceStatus) {
        self.session.set_presence(status);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the room list over HTTP and replace the stored one.
    pub async fn load_rooms(&self) -> Result<Vec<Room>> {
        let page: RoomsPage = self.gateway.call_as(ApiRequest::get("/chat/rooms")).await?;
        self.store.clone().replace_rooms(page.rooms.clone());
        Ok(page.rooms)
    }

    /// Fetch one page of a room's history over HTTP and replace the stored one.
    pub async fn load_history(&self, room_id: &str) -> Result<Vec<ChatMessage>> {
        let request = ApiRequest::get(format!("/chat/messages/{room_id}"))
            .with_query("page", 1)
            .with_query("limit", HISTORY_PAGE_SIZE);
        let page: MessagesPage = self.gateway.call_as(request).await?;
        self.store
            .clone()
            .replace_messages(room_id, page.messages.clone());
        Ok(page.messages)
    }

    pub async fn profile(&self) -> Result<Principal> {
        let principal: Principal = self.gateway.call_as(ApiRequest::get("/user/profile")).await?;
        self.set_principal(Some(principal.clone()));
        Ok(principal)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn session(&self) -> &SessionManager<C> {
        &self.session
    }

    pub fn gateway(&self) -> &RequestGateway<B> {
        &self.gateway
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn principal(&self) -> Option<Principal> {
        self.principal
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.watch_state()
    }

    /// Subscribe to sign-out notifications.
    pub fn signed_out(&self) -> broadcast::Receiver<SignOutReason> {
        self.credentials.subscribe()
    }

    fn set_principal(&self, principal: Option<Principal>) {
        *self.principal.write().unwrap_or_else(|e| e.into_inner()) = principal;
    }
}

impl<C, B> Drop for ChatClient<C, B> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Tear the session down whenever the credential is revoked.
async fn watch_sign_out<C>(
    mut signed_out: broadcast::Receiver<SignOutReason>,
    session: SessionManager<C>,
    store: MemoryStore,
    principal: Arc<RwLock<Option<Principal>>>,
) where
    C: Connector + Send + Sync + 'static,
{
    loop {
        let reason = match signed_out.recv().await {
            Ok(reason) => reason,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Sign-out watcher skipped {} notices", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match reason {
            SignOutReason::UserRequested => debug!("Sign-out requested by user"),
            SignOutReason::AuthRejected { .. } | SignOutReason::RefreshFailed { .. } => {
                warn!("Signed out: {}", reason);
                session.disconnect();
                *principal.write().unwrap_or_else(|e| e.into_inner()) = None;
                let mut store = store.clone();
                store.set_authenticated(false);
                store.record_error(reason.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_client::gateway::ApiResponse;
    use chatwire_client::test_utils::{MockBackend, MockConnector};
    use chatwire_core::names;
    use serde_json::json;
    use std::time::Duration;

    fn login_backend() -> MockBackend {
        MockBackend::new(|request, bearer| match request.path.as_str() {
            "/auth/login" => ApiResponse::new(
                200,
                json!({
                    "success": true,
                    "data": {
                        "user": { "id": "u1", "username": "alice" },
                        "token": "t1",
                        "refreshToken": "r1"
                    }
                }),
            ),
            "/auth/refresh" => ApiResponse::new(401, json!({ "success": false, "error": "expired" })),
            "/chat/rooms" if bearer == Some("t1") => ApiResponse::new(
                200,
                json!({ "success": true, "data": { "rooms": [{ "id": "r1", "name": "General" }] } }),
            ),
            _ => ApiResponse::new(401, json!({ "success": false, "error": "unauthorized" })),
        })
    }

    async fn wait_for(client: &ChatClient<MockConnector, MockBackend>, state: SessionState) {
        let mut rx = client.watch_state();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("session dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_connects_and_syncs_store() {
        let connector = MockConnector::new().auto_authenticate();
        let client = ChatClient::new(connector.clone(), login_backend(), &Settings::default());

        let principal = client.login("alice", "secret").await.unwrap();
        assert_eq!(principal.username, "alice");
        assert_eq!(client.principal().unwrap().id, "u1");

        let server = connector.next_server().await;
        assert_eq!(server.token, "t1");
        wait_for(&client, SessionState::Ready).await;

        server.push(
            names::ROOMS_LIST,
            json!({ "rooms": [{ "id": "r1", "name": "General" }] }),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(client.store().is_authenticated());
        assert_eq!(client.store().rooms().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_tears_session_down() {
        let connector = MockConnector::new().auto_authenticate();
        let client = ChatClient::new(connector.clone(), login_backend(), &Settings::default());

        client.login("alice", "secret").await.unwrap();
        let _server = connector.next_server().await;
        wait_for(&client, SessionState::Ready).await;

        let err = client.profile().await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed { .. }));

        wait_for(&client, SessionState::Disconnected).await;
        assert!(!client.credentials().is_signed_in());
        assert!(client.principal().is_none());
        assert!(!client.store().is_authenticated());
        assert!(client
            .store()
            .last_error()
            .unwrap()
            .starts_with("refresh failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_surfaces_sign_out() {
        let connector = MockConnector::new();
        let client = ChatClient::new(connector.clone(), login_backend(), &Settings::default());
        let mut signed_out = client.signed_out();

        client.resume(Credential::new("stale"));
        let server = connector.next_server().await;
        server.reject("Invalid token");

        assert_eq!(
            signed_out.recv().await.unwrap(),
            SignOutReason::AuthRejected {
                reason: "Invalid token".to_string()
            }
        );
        wait_for(&client, SessionState::Disconnected).await;
        assert!(!client.credentials().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_everything() {
        let connector = MockConnector::new().auto_authenticate();
        let backend = login_backend();
        let client = ChatClient::new(connector.clone(), backend.clone(), &Settings::default());

        client.login("alice", "secret").await.unwrap();
        let _server = connector.next_server().await;
        wait_for(&client, SessionState::Ready).await;
        client.load_rooms().await.unwrap();
        assert_eq!(client.store().rooms().len(), 1);

        client.logout().await;

        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(!client.credentials().is_signed_in());
        assert!(client.store().rooms().is_empty());
        assert_eq!(backend.calls_to("/auth/logout"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_helpers_emit_typed_events() {
        let connector = MockConnector::new().auto_authenticate();
        let client = ChatClient::new(connector.clone(), login_backend(), &Settings::default());

        assert!(matches!(
            client.send_message("r1", "too early"),
            Err(Error::SendWhileNotReady { .. })
        ));

        client.login("alice", "secret").await.unwrap();
        let mut server = connector.next_server().await;
        wait_for(&client, SessionState::Ready).await;
        server.drain_frames();

        client.join_room("r1");
        client.send_message("r1", "hello").unwrap();
        client.edit_message("m1", "hello!").unwrap();

        let frames = server.drain_frames();
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                names::JOIN_ROOM,
                names::GET_MESSAGES,
                names::SEND_MESSAGE,
                names::EDIT_MESSAGE
            ]
        );
        assert_eq!(frames[2].data["content"], "hello");
        assert_eq!(frames[2].data["type"], "text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_before_ready_requests_history_once_ready() {
        let connector = MockConnector::new();
        let client = ChatClient::new(connector.clone(), login_backend(), &Settings::default());

        client.resume(Credential::new("t1"));
        client.join_room("r1");
        let mut server = connector.next_server().await;
        assert!(server.drain_frames().is_empty());

        server.authenticate();
        wait_for(&client, SessionState::Ready).await;

        let history: Vec<serde_json::Value> = server
            .drain_frames()
            .into_iter()
            .filter(|f| f.event == names::GET_MESSAGES)
            .map(|f| f.data)
            .collect();
        assert_eq!(history, vec![json!("r1")]);
    }
}
