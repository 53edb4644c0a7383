//! Outbound typing-indicator scheduler
//!
//! Keeps one [`TypingTimer`] per room. Activity sends `typing_start` once and
//! re-arms an auto-stop deadline; when the deadline passes without further
//! activity `typing_stop` is sent and the timer is dropped.
//!
//! Each arm bumps the timer's generation. A sleeping timer task only fires if
//! its generation is still current, so re-arming, cancelling, or
//! [`TypingScheduler::cancel_all`] make every older task a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use chatwire_core::prelude::*;
use chatwire_core::{OutboundEvent, RoomId};

/// Where typing events go.
pub trait TypingEmitter: Send + Sync + 'static {
    fn emit_typing(&self, event: OutboundEvent) -> Result<()>;
}

/// Typing state for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingTimer {
    pub room_id: RoomId,
    /// Whether `typing_start` has been sent for the current burst.
    pub started: bool,
    pub deadline: Instant,
    pub generation: u64,
}

impl TypingTimer {
    fn new(room_id: RoomId, deadline: Instant, generation: u64) -> Self {
        Self {
            room_id,
            started: false,
            deadline,
            generation,
        }
    }

    /// Push the deadline out and take a new generation.
    pub fn arm(&mut self, deadline: Instant, generation: u64) {
        self.deadline = deadline;
        self.generation = generation;
    }

    /// Whether a task armed with `generation` may still fire this timer.
    pub fn fires_for(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

struct TimerEntry {
    timer: TypingTimer,
    task: Option<JoinHandle<()>>,
}

impl TimerEntry {
    fn cancel(self) -> TypingTimer {
        if let Some(task) = self.task {
            task.abort();
        }
        self.timer
    }
}

struct SchedulerInner {
    emitter: Arc<dyn TypingEmitter>,
    auto_stop: Duration,
    timers: Mutex<HashMap<RoomId, TimerEntry>>,
    generation: AtomicU64,
}

impl SchedulerInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Timer expiry: send `typing_stop` if `generation` is still current.
    fn fire(&self, room_id: &str, generation: u64) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let current = timers
            .get(room_id)
            .is_some_and(|entry| entry.timer.fires_for(generation));
        if !current {
            trace!("Typing timer for {} superseded", room_id);
            return;
        }

        if let Some(entry) = timers.remove(room_id) {
            // This is the running task; nothing to abort.
            let timer = entry.timer;
            if timer.started {
                self.emit(OutboundEvent::TypingStop(timer.room_id));
            }
        }
    }

    fn emit(&self, event: OutboundEvent) -> bool {
        match self.emitter.emit_typing(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Typing event not sent: {}", e);
                false
            }
        }
    }
}

/// Per-room typing timers with auto-stop.
#[derive(Clone)]
pub struct TypingScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for TypingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingScheduler")
            .field("auto_stop", &self.inner.auto_stop)
            .field("active", &self.active_rooms())
            .finish()
    }
}

impl TypingScheduler {
    pub fn new(emitter: Arc<dyn TypingEmitter>, auto_stop: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                emitter,
                auto_stop,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The local user typed in `room_id`.
    ///
    /// Sends `typing_start` unless a burst is already running, then re-arms
    /// the auto-stop deadline.
    pub fn notify_activity(&self, room_id: &str) {
        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        let generation = self.inner.next_generation();
        let deadline = Instant::now() + self.inner.auto_stop;

        let started = timers
            .get(room_id)
            .is_some_and(|entry| entry.timer.started);
        if !started
            && !self
                .inner
                .emit(OutboundEvent::TypingStart(room_id.to_string()))
        {
            // Nothing to stop later.
            if let Some(entry) = timers.remove(room_id) {
                entry.cancel();
            }
            return;
        }

        let entry = timers
            .entry(room_id.to_string())
            .or_insert_with(|| TimerEntry {
                timer: TypingTimer::new(room_id.to_string(), deadline, generation),
                task: None,
            });
        entry.timer.started = true;

        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.timer.arm(deadline, generation);
        entry.task = Some(self.spawn_expiry(room_id.to_string(), generation));
    }

    /// The local user stopped typing: send `typing_stop` now.
    pub fn notify_stopped(&self, room_id: &str) {
        let entry = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.remove(room_id)
        };
        if let Some(entry) = entry {
            let timer = entry.cancel();
            if timer.started {
                self.inner.emit(OutboundEvent::TypingStop(timer.room_id));
            }
        }
    }

    /// Drop the timer for `room_id` without sending anything.
    pub fn forget(&self, room_id: &str) {
        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = timers.remove(room_id) {
            entry.cancel();
            trace!("Typing timer for {} forgotten", room_id);
        }
    }

    /// Drop every timer without sending anything.
    pub fn cancel_all(&self) {
        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        // Invalidate tasks that already woke but have not taken the lock yet.
        self.inner.next_generation();
        let count = timers.len();
        for (_, entry) in timers.drain() {
            entry.cancel();
        }
        if count > 0 {
            debug!("Cancelled {} typing timer(s)", count);
        }
    }

    pub fn is_typing(&self, room_id: &str) -> bool {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .is_some_and(|entry| entry.timer.started)
    }

    /// Rooms with a live timer.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        let timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut rooms: Vec<RoomId> = timers.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Snapshot of the timer for `room_id`.
    pub fn timer(&self, room_id: &str) -> Option<TypingTimer> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .map(|entry| entry.timer.clone())
    }

    fn spawn_expiry(&self, room_id: RoomId, generation: u64) -> JoinHandle<()> {
        let inner: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let auto_stop = self.inner.auto_stop;
        tokio::spawn(async move {
            tokio::time::sleep(auto_stop).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire(&room_id, generation);
            }
        })
    }
}
