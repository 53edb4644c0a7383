//! Test utilities for the client runtime
//!
//! In-memory stand-ins for the two I/O seams: [`MockConnector`] for the
//! realtime transport and [`MockBackend`] for HTTP. Available to other crates
//! through the `test-helpers` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use chatwire_core::names;
use chatwire_core::prelude::*;

use crate::credential::Credential;
use crate::gateway::{ApiRequest, ApiResponse, HttpBackend};
use crate::protocol::WireFrame;
use crate::session::{Connector, TransportLink, TransportSignal};

const MOCK_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// MockConnector
// ---------------------------------------------------------------------------

/// Scripted outcome of one [`MockConnector`] open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOpen {
    Accept,
    Fail(String),
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<MockOpen>,
    opens: usize,
    auto_authenticate: bool,
}

/// In-memory [`Connector`]. Every accepted open produces a [`MockServer`]
/// retrievable with [`MockConnector::next_server`].
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
    servers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServer>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            servers_tx,
            servers_rx: Arc::new(tokio::sync::Mutex::new(servers_rx)),
        }
    }

    /// Answer every accepted open with a successful `authenticated` frame.
    pub fn auto_authenticate(self) -> Self {
        self.lock().auto_authenticate = true;
        self
    }

    /// Queue open outcomes. Opens past the end of the script are accepted.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockOpen>) {
        self.lock().script.extend(outcomes);
    }

    /// Number of open attempts so far.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&self) -> MockServer {
        self.servers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("MockConnector: server channel closed")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    async fn open(&self, credential: &Credential) -> Result<TransportLink> {
        let (outcome, auto_authenticate) = {
            let mut state = self.lock();
            state.opens += 1;
            let outcome = state.script.pop_front().unwrap_or(MockOpen::Accept);
            (outcome, state.auto_authenticate)
        };

        if let MockOpen::Fail(reason) = outcome {
            return Err(Error::transport(reason));
        }

        let (to_client, inbound) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        let (outbound, from_client) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        let server = MockServer {
            token: credential.access_token.clone(),
            to_client,
            from_client,
        };
        if auto_authenticate {
            server.authenticate();
        }
        let _ = self.servers_tx.send(server);

        Ok(TransportLink { outbound, inbound })
    }
}

/// The far end of one mock connection.
///
/// Dropping it ends the connection from the client's point of view.
pub struct MockServer {
    /// Access token the client connected with.
    pub token: String,
    to_client: mpsc::Sender<TransportSignal>,
    from_client: mpsc::Receiver<WireFrame>,
}

impl MockServer {
    /// Push a named event to the client. Ignored once the client is gone.
    pub fn push(&self, event: &str, data: Value) {
        let _ = self
            .to_client
            .try_send(TransportSignal::Frame(WireFrame::new(event, data)));
    }

    pub fn authenticate(&self) {
        self.push(names::AUTHENTICATED, json!({ "success": true }));
    }

    pub fn reject(&self, message: &str) {
        self.push(
            names::AUTHENTICATED,
            json!({ "success": false, "message": message }),
        );
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.try_send(TransportSignal::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .try_send(TransportSignal::Error(message.to_string()));
    }

    /// Wait for the next frame the client sends.
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.from_client.recv().await
    }

    /// Every frame the client has sent so far.
    pub fn drain_frames(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

type Handler = dyn Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync;

/// One request seen by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub request: ApiRequest,
    pub bearer: Option<String>,
}

/// Scripted [`HttpBackend`] that records every request.
#[derive(Clone)]
pub struct MockBackend {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    latency: Duration,
}

impl MockBackend {
    pub fn new(
        handler: impl Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of requests made to `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.request.path == path)
            .count()
    }
}

impl HttpBackend for MockBackend {
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                request: request.clone(),
                bearer: bearer.map(str::to_string),
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok((self.handler)(request, bearer))
    }
}
