//! Shared fixtures: a scripted remote service and client constructors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use chatwire::app::{ChatClient, Settings};
use chatwire::client::gateway::ApiResponse;
use chatwire::client::test_utils::{MockBackend, MockConnector};
use chatwire::client::SessionState;

pub type TestClient = ChatClient<MockConnector, MockBackend>;

/// Tokens the fake service currently accepts, plus how it answers refreshes.
#[derive(Clone)]
pub struct Service {
    state: Arc<Mutex<ServiceState>>,
}

struct ServiceState {
    valid_token: String,
    next_token: String,
    refresh_allowed: bool,
}

impl Service {
    /// Login issues `t1`; refresh rotates to `t2`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                valid_token: "t1".to_string(),
                next_token: "t2".to_string(),
                refresh_allowed: true,
            })),
        }
    }

    /// Expire the current token server-side.
    pub fn expire_token(&self) {
        self.state.lock().unwrap().valid_token = "expired".to_string();
    }

    pub fn deny_refresh(&self) {
        self.state.lock().unwrap().refresh_allowed = false;
    }

    pub fn backend(&self) -> MockBackend {
        let service = self.clone();
        MockBackend::new(move |request, bearer| service.answer(&request.path, bearer))
            .with_latency(Duration::from_millis(5))
    }

    fn answer(&self, path: &str, bearer: Option<&str>) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        match path {
            "/auth/login" => ok(json!({
                "user": { "id": "u1", "username": "alice" },
                "token": state.valid_token,
                "refreshToken": "r1"
            })),
            "/auth/refresh" if state.refresh_allowed => {
                state.valid_token = state.next_token.clone();
                ok(json!({ "token": state.valid_token }))
            }
            "/auth/refresh" => error(401, "refresh token revoked"),
            "/auth/logout" => ok(Value::Null),
            _ if bearer == Some(state.valid_token.as_str()) => match path {
                "/chat/rooms" => ok(json!({ "rooms": [{ "id": "r1", "name": "General" }] })),
                _ => ok(json!({ "path": path })),
            },
            _ => error(401, "Token expired"),
        }
    }
}

fn ok(data: Value) -> ApiResponse {
    ApiResponse::new(200, json!({ "success": true, "data": data }))
}

fn error(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(status, json!({ "success": false, "error": message }))
}

pub fn client(connector: &MockConnector, backend: MockBackend) -> TestClient {
    ChatClient::new(connector.clone(), backend, &Settings::default())
}

pub async fn wait_for(client: &TestClient, state: SessionState) {
    let mut rx = client.watch_state();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("session dropped");
}
