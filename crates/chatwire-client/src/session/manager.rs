//! Session manager: drives the [`SessionMachine`] against a live transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        SessionManager                          │
//! │                                                                │
//! │  connect() ───▶ machine ──spawn──▶ ┌─────────────────────────┐ │
//! │  join/leave ──▶ machine ──emit──┐  │  Driver task (per epoch) │ │
//! │  send()/emit() ─────────────────┤  │                          │ │
//! │                                 ▼  │  open / backoff / auth   │ │
//! │                            Outbound ◀──── ready link ─────────┤ │
//! │                                    │  frames ─▶ EventSink     │ │
//! │  disconnect(): epoch++, abort ────▶└─────────────────────────┘ │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine lives behind one mutex; every input, from the public API or the
//! driver, is applied under it. The driver checks the epoch under that same
//! lock, so once [`SessionManager::disconnect`] returns a stale driver can no
//! longer change state, install a link, or reach the sink.
//!
//! Lock order is machine, then driver slot / sink / typing timers. A sink must
//! not call back into the manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use chatwire_core::prelude::*;
use chatwire_core::{InboundEvent, OutboundEvent, PresenceStatus, RoomOrigin};

use super::machine::{SessionAction, SessionInput, SessionMachine};
use super::state::{SessionConfig, SessionSnapshot, SessionState};
use super::transport::{Connector, TransportLink, TransportSignal};
use crate::credential::{Credential, CredentialStore};
use crate::protocol::WireFrame;
use crate::typing::{TypingEmitter, TypingScheduler};

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receives every decoded inbound event, in arrival order.
pub trait EventSink: Send {
    fn apply(&mut self, event: InboundEvent);
}

impl<F> EventSink for F
where
    F: FnMut(InboundEvent) + Send,
{
    fn apply(&mut self, event: InboundEvent) {
        self(event)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Send path shared by the manager and the typing scheduler.
///
/// Holds the outbound sender only while the session is `Ready`.
#[derive(Clone)]
struct Outbound {
    link: Arc<RwLock<Option<mpsc::Sender<WireFrame>>>>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl Outbound {
    fn send(&self, event: &str, payload: Value) -> Result<()> {
        let guard = self.link.read().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return Err(Error::send_while_not_ready(event, self.state()));
        };

        tx.try_send(WireFrame::new(event, payload))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    Error::channel_send(format!("outbound queue full, '{event}' not sent"))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::send_while_not_ready(event, SessionState::Reconnecting)
                }
            })
    }

    fn install(&self, tx: Option<mpsc::Sender<WireFrame>>) {
        *self.link.write().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    fn is_installed(&self) -> bool {
        self.link
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }
}

impl TypingEmitter for Outbound {
    fn emit_typing(&self, event: OutboundEvent) -> Result<()> {
        self.send(event.name(), event.payload())
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

struct Inner<C> {
    connector: C,
    credentials: CredentialStore,
    config: SessionConfig,
    machine: Mutex<SessionMachine>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    outbound: Outbound,
    sink: Mutex<Option<Box<dyn EventSink>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    epoch: AtomicU64,
    typing: TypingScheduler,
}

/// Owns the realtime connection.
///
/// Cheap to clone; clones drive the same session.
pub struct SessionManager<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("snapshot", &*self.inner.snapshot_tx.borrow())
            .field("epoch", &self.inner.epoch.load(Ordering::SeqCst))
            .finish()
    }
}

impl<C: Connector + Send + Sync + 'static> SessionManager<C> {
    pub fn new(connector: C, credentials: CredentialStore, config: SessionConfig) -> Self {
        let machine = SessionMachine::new(&config);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot().clone());
        let outbound = Outbound {
            link: Arc::new(RwLock::new(None)),
            snapshot: snapshot_rx,
        };
        let typing = TypingScheduler::new(Arc::new(outbound.clone()), config.typing_auto_stop);

        Self {
            inner: Arc::new(Inner {
                connector,
                credentials,
                config,
                machine: Mutex::new(machine),
                snapshot_tx,
                outbound,
                sink: Mutex::new(None),
                driver: Mutex::new(None),
                epoch: AtomicU64::new(0),
                typing,
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start connecting with `credential`.
    ///
    /// No-op while the session is connecting, authenticating, ready, or
    /// reconnecting. Reconnects use the newest credential in the store.
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, credential: Credential) {
        self.start(credential, None);
    }

    /// Install `sink` and start connecting, as one step.
    ///
    /// A concurrent [`disconnect`](Self::disconnect) either runs entirely
    /// before this (the new run keeps the sink) or entirely after it.
    pub fn connect_with_sink(&self, credential: Credential, sink: impl EventSink + 'static) {
        self.start(credential, Some(Box::new(sink)));
    }

    fn start(&self, credential: Credential, sink: Option<Box<dyn EventSink>>) {
        // The driver slot and the sink only change under the machine lock, so
        // a disconnect can never abort a driver spawned after its epoch bump.
        let mut machine = self.inner.lock_machine();
        if let Some(sink) = sink {
            *self.inner.lock_sink() = Some(sink);
        }
        if machine.handle(SessionInput::Connect).is_empty() {
            return;
        }
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.publish(&machine);

        info!("Session connecting (epoch {})", epoch);
        let handle = tokio::spawn(run_driver(Arc::clone(&self.inner), epoch, credential));
        if let Some(previous) = self.inner.lock_driver().replace(handle) {
            previous.abort();
        }
    }

    /// Tear the session down.
    ///
    /// Cancels the reconnect loop and every typing timer, clears subscribed
    /// rooms, and detaches the event sink. Once this returns no event is
    /// applied and nothing is sent. Idempotent.
    ///
    /// Must not be called from inside [`EventSink::apply`].
    pub fn disconnect(&self) {
        let (driver, detached) = {
            let mut machine = self.inner.lock_machine();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            // Close, cancel-reconnect, and cancel-typing are all done here.
            let _ = machine.handle(SessionInput::Disconnect);
            self.inner.outbound.install(None);
            self.inner.typing.cancel_all();
            self.inner.publish(&machine);

            let driver = self.inner.lock_driver().take();
            // Waits for an in-flight apply to finish.
            let detached = self.inner.lock_sink().take();
            (driver, detached)
        };

        if let Some(driver) = driver {
            // Dropping the driver's link closes the transport.
            driver.abort();
        }
        if detached.is_some() {
            debug!("Event sink detached");
        }
        info!("Session disconnected");
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    /// Send a named event.
    ///
    /// # Errors
    ///
    /// [`Error::SendWhileNotReady`] unless the session is `Ready`. Nothing is
    /// queued for later delivery.
    pub fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.inner.outbound.send(event, payload)
    }

    /// Send a typed event.
    pub fn emit(&self, event: OutboundEvent) -> Result<()> {
        self.inner.emit(&event)
    }

    // ---------------------------------------------------------------------
    // Rooms, presence, typing
    // ---------------------------------------------------------------------

    /// Register the sole event sink, replacing any previous one.
    pub fn on_event(&self, sink: impl EventSink + 'static) {
        *self.inner.lock_sink() = Some(Box::new(sink));
    }

    /// Subscribe to `room_id`; re-joined after every reconnect.
    pub fn join_room(&self, room_id: &str) {
        self.inner
            .apply_local(SessionInput::JoinRoom(room_id.to_string()));
    }

    /// Unsubscribe from `room_id` and drop its typing timer.
    pub fn leave_room(&self, room_id: &str) {
        self.inner
            .apply_local(SessionInput::LeaveRoom(room_id.to_string()));
    }

    /// Set the presence announced after every successful handshake.
    pub fn set_presence(&self, status: PresenceStatus) {
        self.inner.apply_local(SessionInput::SetPresence(status));
    }

    /// The local user typed in `room_id`.
    ///
    /// Ignored unless `room_id` is a subscribed room, so no timer outlives
    /// its room's subscription.
    pub fn typing(&self, room_id: &str) {
        let machine = self.inner.lock_machine();
        if !machine.snapshot().subscribed_rooms.contains(room_id) {
            debug!("Ignoring typing in unjoined room {}", room_id);
            return;
        }
        self.inner.typing.notify_activity(room_id);
    }

    /// The local user stopped typing in `room_id`.
    pub fn stop_typing(&self, room_id: &str) {
        self.inner.typing.notify_stopped(room_id);
    }

    pub fn typing_scheduler(&self) -> &TypingScheduler {
        &self.inner.typing
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.snapshot_tx.borrow().state
    }

    /// Watch snapshots as the session moves through its lifecycle.
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl<C> Inner<C> {
    fn lock_machine(&self) -> std::sync::MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn EventSink>>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_driver(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, machine: &SessionMachine) {
        self.snapshot_tx.send_replace(machine.snapshot().clone());
    }

    fn emit(&self, event: &OutboundEvent) -> Result<()> {
        self.outbound.send(event.name(), event.payload())
    }

    fn emit_logged(&self, event: OutboundEvent) {
        if let Err(e) = self.emit(&event) {
            debug!("Could not send '{}': {}", event.name(), e);
        }
    }

    /// Apply an input from the public API and run the resulting actions.
    fn apply_local(&self, input: SessionInput) {
        let actions = {
            let mut machine = self.lock_machine();
            let actions = machine.handle(input);
            self.publish(&machine);
            actions
        };

        for action in actions {
            match action {
                SessionAction::Emit(event) => self.emit_logged(event),
                SessionAction::ForgetTyping(room_id) => self.typing.forget(&room_id),
                other => debug!("Unexpected action from local input: {:?}", other),
            }
        }
    }

    /// Apply a driver input if `epoch` is still current.
    ///
    /// Returns `None` when the driver is stale and must exit. The outbound
    /// link is installed or removed under the machine lock so it always
    /// matches the published state.
    fn apply_driver(
        &self,
        epoch: u64,
        input: SessionInput,
        link: Option<&TransportLink>,
    ) -> Option<Vec<SessionAction>> {
        let mut machine = self.lock_machine();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            trace!("Stale driver (epoch {}) dropped {:?}", epoch, input);
            return None;
        }

        let actions = machine.handle(input);
        if machine.state().is_ready() {
            if !self.outbound.is_installed() {
                self.outbound.install(link.map(|l| l.outbound.clone()));
            }
        } else {
            self.outbound.install(None);
        }
        self.publish(&machine);
        Some(actions)
    }

    /// Hand `event` to the sink unless the driver is stale.
    fn deliver(&self, epoch: u64, event: InboundEvent) {
        let mut sink = self.lock_sink();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        match sink.as_mut() {
            Some(sink) => sink.apply(event),
            None => trace!(
                "No event sink; dropped {} ({})",
                event.tag(),
                event.room_id().unwrap_or("-")
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

/// Per-connection-run state owned by the driver.
#[derive(Default)]
struct DriverState {
    link: Option<TransportLink>,
    auth_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
}

/// Drive one connect run until the session settles in `Disconnected` or
/// `Failed`, or a newer epoch takes over.
async fn run_driver<C>(inner: Arc<Inner<C>>, epoch: u64, credential: Credential)
where
    C: Connector + Send + Sync + 'static,
{
    let mut initial = Some(credential);
    let mut driver = DriverState::default();
    let mut actions: VecDeque<SessionAction> = VecDeque::from([SessionAction::OpenTransport]);

    loop {
        while let Some(action) = actions.pop_front() {
            let follow_up = match action {
                SessionAction::OpenTransport => {
                    let input = open_transport(&inner, &mut initial, &mut driver).await;
                    Some(input)
                }
                SessionAction::CloseTransport => {
                    driver.link = None;
                    driver.auth_deadline = None;
                    None
                }
                SessionAction::ArmAuthTimeout(timeout) => {
                    driver.auth_deadline = Some(Instant::now() + timeout);
                    None
                }
                SessionAction::Resubscribe(rooms) => {
                    if !rooms.is_empty() {
                        info!("Re-joining {} room(s)", rooms.len());
                    }
                    // History is refetched too: joins made before Ready never
                    // got theirs, and a reconnect may have missed messages.
                    for room_id in rooms {
                        inner.emit_logged(OutboundEvent::JoinRoom(room_id.clone()));
                        inner.emit_logged(OutboundEvent::GetMessages(room_id));
                    }
                    None
                }
                SessionAction::BroadcastPresence(status) => {
                    inner.emit_logged(OutboundEvent::UpdateStatus(status));
                    None
                }
                SessionAction::RequestInitialData => {
                    inner.emit_logged(OutboundEvent::GetRooms);
                    inner.emit_logged(OutboundEvent::GetOnlineUsers);
                    None
                }
                SessionAction::ScheduleReconnect { delay, .. } => {
                    driver.reconnect_at = Some(Instant::now() + delay);
                    None
                }
                SessionAction::CancelReconnect => {
                    driver.reconnect_at = None;
                    None
                }
                SessionAction::SignOut(reason) => {
                    inner.credentials.sign_out(reason);
                    None
                }
                SessionAction::Emit(event) => {
                    inner.emit_logged(event);
                    None
                }
                SessionAction::ForgetTyping(room_id) => {
                    inner.typing.forget(&room_id);
                    None
                }
                SessionAction::CancelTyping => {
                    inner.typing.cancel_all();
                    None
                }
            };

            if let Some(input) = follow_up {
                match inner.apply_driver(epoch, input, driver.link.as_ref()) {
                    Some(next) => actions.extend(next),
                    None => return,
                }
            }
        }

        let state = inner.outbound.state();
        if !state.is_live() {
            debug!("Session driver (epoch {}) finished", epoch);
            return;
        }
        if state != SessionState::AwaitingAuth {
            driver.auth_deadline = None;
        }

        let input = tokio::select! {
            signal = next_signal(&mut driver.link) => match signal {
                Some(TransportSignal::Frame(frame)) => {
                    match handle_frame(&inner, epoch, frame) {
                        FrameOutcome::Input(input) => input,
                        FrameOutcome::Delivered => continue,
                    }
                }
                Some(TransportSignal::Closed { reason }) => SessionInput::TransportLost { reason },
                Some(TransportSignal::Error(reason)) => SessionInput::TransportLost { reason },
                None => SessionInput::TransportLost {
                    reason: "transport closed".to_string(),
                },
            },

            _ = sleep_until(driver.auth_deadline) => {
                driver.auth_deadline = None;
                SessionInput::AuthTimedOut
            }

            _ = sleep_until(driver.reconnect_at) => {
                driver.reconnect_at = None;
                SessionInput::BackoffElapsed
            }
        };

        match inner.apply_driver(epoch, input, driver.link.as_ref()) {
            Some(next) => actions.extend(next),
            None => return,
        }
    }
}

/// Open a transport with the initial credential, or the store's newest one.
async fn open_transport<C>(
    inner: &Inner<C>,
    initial: &mut Option<Credential>,
    driver: &mut DriverState,
) -> SessionInput
where
    C: Connector + Send + Sync + 'static,
{
    let Some(credential) = initial.take().or_else(|| inner.credentials.get()) else {
        info!("No credential available; not reconnecting");
        return SessionInput::SignedOut;
    };

    match inner.connector.open(&credential).await {
        Ok(link) => {
            driver.link = Some(link);
            SessionInput::TransportOpened
        }
        Err(e) => SessionInput::TransportFailed {
            reason: e.to_string(),
        },
    }
}

enum FrameOutcome {
    /// The frame changes the session lifecycle.
    Input(SessionInput),
    /// The frame was routed to the sink (or dropped).
    Delivered,
}

fn handle_frame<C>(inner: &Inner<C>, epoch: u64, frame: WireFrame) -> FrameOutcome {
    let event = match frame.decode() {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping frame: {}", e);
            return FrameOutcome::Delivered;
        }
    };
    trace!("<- {} ({})", event.tag(), event.room_id().unwrap_or("-"));

    match event {
        InboundEvent::AuthResult(outcome) => {
            let input = if outcome.success {
                SessionInput::AuthAccepted
            } else {
                SessionInput::AuthRejected {
                    reason: outcome
                        .message
                        .clone()
                        .unwrap_or_else(|| "authentication failed".to_string()),
                }
            };
            inner.deliver(epoch, InboundEvent::AuthResult(outcome));
            FrameOutcome::Input(input)
        }
        InboundEvent::RoomCreated {
            room,
            origin: RoomOrigin::CreatedHere,
        } => {
            let room_id = room.id.clone();
            inner.deliver(
                epoch,
                InboundEvent::RoomCreated {
                    room,
                    origin: RoomOrigin::CreatedHere,
                },
            );
            FrameOutcome::Input(SessionInput::JoinRoom(room_id))
        }
        other => {
            inner.deliver(epoch, other);
            FrameOutcome::Delivered
        }
    }
}

async fn next_signal(link: &mut Option<TransportLink>) -> Option<TransportSignal> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
