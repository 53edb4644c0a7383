//! Single-flight guard for credential refresh
//!
//! One flag and one FIFO wait list. The first caller to [`RefreshGuard::enter`]
//! while no refresh is running becomes the owner; everybody after that is
//! parked until the owner calls [`RefreshOwnership::complete`]. No lock is
//! held across I/O.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

use chatwire_core::prelude::*;

use crate::credential::Credential;

/// Default bound on the number of parked calls.
pub const DEFAULT_QUEUE_LIMIT: usize = 64;

/// Why a refresh did not produce a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshError {
    pub reason: String,
}

impl RefreshError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        Error::refresh_failed(err.reason)
    }
}

/// Outcome shared with every parked call.
pub type RefreshOutcome = std::result::Result<Credential, RefreshError>;

/// A caller parked behind an in-flight refresh.
struct PendingCall {
    resolve: oneshot::Sender<RefreshOutcome>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    pending: VecDeque<PendingCall>,
}

/// What [`RefreshGuard::enter`] decided for a caller.
pub enum RefreshTicket<'a> {
    /// The caller must perform the refresh and complete the ownership.
    Owner(RefreshOwnership<'a>),
    /// Another caller is refreshing; await the receiver for its outcome.
    Parked(oneshot::Receiver<RefreshOutcome>),
}

impl std::fmt::Debug for RefreshTicket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshTicket::Owner(_) => f.write_str("Owner"),
            RefreshTicket::Parked(_) => f.write_str("Parked"),
        }
    }
}

/// Mutual exclusion with a wait list for credential refresh.
pub struct RefreshGuard {
    state: Mutex<RefreshState>,
    limit: usize,
}

impl RefreshGuard {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            limit,
        }
    }

    /// Become the refresh owner, or park behind the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshQueueFull`] when `limit` calls are already parked.
    pub fn enter(&self) -> Result<RefreshTicket<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !state.refreshing {
            state.refreshing = true;
            return Ok(RefreshTicket::Owner(RefreshOwnership {
                guard: self,
                completed: false,
            }));
        }

        if state.pending.len() >= self.limit {
            warn!("Refresh wait list full ({} parked)", state.pending.len());
            return Err(Error::RefreshQueueFull { limit: self.limit });
        }

        let (resolve, rx) = oneshot::channel();
        state.pending.push_back(PendingCall { resolve });
        trace!("Parked call behind refresh ({} waiting)", state.pending.len());
        Ok(RefreshTicket::Parked(rx))
    }

    pub fn is_refreshing(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .refreshing
    }

    /// Number of calls currently parked.
    pub fn parked(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    /// Clear the flag and hand `outcome` to every parked call in FIFO order.
    fn resolve(&self, outcome: &RefreshOutcome) -> usize {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.refreshing = false;
            std::mem::take(&mut state.pending)
        };

        let woken = pending.len();
        for call in pending {
            // The caller may have gone away; nothing to do then.
            let _ = call.resolve.send(outcome.clone());
        }
        woken
    }
}

impl Default for RefreshGuard {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}

/// Proof that the holder owns the in-flight refresh.
///
/// Dropping it without calling [`complete`](Self::complete) (for example when
/// the owner's future is cancelled) rejects every parked call so none of them
/// waits forever.
pub struct RefreshOwnership<'a> {
    guard: &'a RefreshGuard,
    completed: bool,
}

impl RefreshOwnership<'_> {
    /// Publish the refresh outcome. Returns how many parked calls were woken.
    pub fn complete(mut self, outcome: &RefreshOutcome) -> usize {
        self.completed = true;
        self.guard.resolve(outcome)
    }
}

impl Drop for RefreshOwnership<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Refresh owner dropped before completing; rejecting parked calls");
            self.guard
                .resolve(&Err(RefreshError::new("refresh was abandoned")));
        }
    }
}
