//! Credential store shared by the request gateway and the session manager
//!
//! The store is the only place the bearer credential lives. Login and refresh
//! both write through [`CredentialStore::set`]; the session manager only reads.
//! Clearing the store because a credential became unusable goes through
//! [`CredentialStore::sign_out`], which also notifies subscribers so the
//! surrounding application can return the user to a login flow.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use chatwire_core::prelude::*;

/// Capacity of the sign-out notification channel.
const SIGN_OUT_CHANNEL_CAPACITY: usize = 8;

/// An opaque bearer token plus an optional refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

// Tokens must never end up in log files.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Why the user was signed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutReason {
    /// The realtime handshake rejected the credential.
    AuthRejected { reason: String },
    /// The credential could not be refreshed.
    RefreshFailed { reason: String },
    /// The user asked to log out.
    UserRequested,
}

impl std::fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignOutReason::AuthRejected { reason } => write!(f, "authentication rejected: {reason}"),
            SignOutReason::RefreshFailed { reason } => write!(f, "refresh failed: {reason}"),
            SignOutReason::UserRequested => write!(f, "logged out"),
        }
    }
}

/// Clonable handle to the current credential.
#[derive(Clone)]
pub struct CredentialStore {
    current: Arc<RwLock<Option<Credential>>>,
    sign_out_tx: broadcast::Sender<SignOutReason>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        let (sign_out_tx, _) = broadcast::channel(SIGN_OUT_CHANNEL_CAPACITY);
        Self {
            current: Arc::new(RwLock::new(None)),
            sign_out_tx,
        }
    }

    /// Create a store that already holds `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        store.set(credential);
        store
    }

    /// Return a copy of the current credential.
    pub fn get(&self) -> Option<Credential> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Return the current access token.
    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Replace the current credential.
    pub fn set(&self, credential: Credential) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(credential);
        debug!("Credential store: credential updated");
    }

    /// Drop the current credential without notifying anyone.
    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Clear the credential and broadcast the sign-out.
    pub fn sign_out(&self, reason: SignOutReason) {
        self.clear();
        info!("Signed out: {}", reason);
        // No subscribers is fine.
        let _ = self.sign_out_tx.send(reason);
    }

    /// Subscribe to sign-out notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SignOutReason> {
        self.sign_out_tx.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
