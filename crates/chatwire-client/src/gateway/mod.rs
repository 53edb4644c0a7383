//! Request gateway
//!
//! Every authenticated HTTP call goes through [`RequestGateway::call`]. When a
//! call is rejected with 401 the gateway refreshes the credential at most once
//! no matter how many calls fail together: the first becomes the refresh
//! owner, the rest park behind it in the [`RefreshGuard`] and are replayed
//! with the refreshed credential.
//!
//! ```text
//!  call A ──401──▶ enter() ─▶ Owner ──POST /auth/refresh──▶ set() ─▶ complete()
//!  call B ──401──▶ enter() ─▶ Parked ·························▶ woken ─▶ replay
//!  call C ──401──▶ store already newer ──────────────────────────────▶ replay
//! ```

pub mod backend;
pub mod refresh;

pub use backend::{
    unwrap_envelope, ApiRequest, ApiResponse, HttpBackend, HttpMethod, LocalHttpBackend,
    ReqwestBackend, DEFAULT_REQUEST_TIMEOUT,
};
pub use refresh::{RefreshError, RefreshGuard, RefreshOutcome, RefreshTicket, DEFAULT_QUEUE_LIMIT};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use chatwire_core::prelude::*;
use chatwire_core::Principal;

use crate::credential::{Credential, CredentialStore, SignOutReason};

/// Authentication endpoints, relative to the backend base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            refresh: "/auth/refresh".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    user: Principal,
    #[serde(alias = "accessToken")]
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    #[serde(alias = "accessToken")]
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct GatewayInner<B> {
    backend: B,
    store: CredentialStore,
    guard: RefreshGuard,
    paths: AuthPaths,
}

/// HTTP client that attaches the current credential and refreshes it on 401.
///
/// Cheap to clone; clones share the backend, store, and refresh guard.
pub struct RequestGateway<B> {
    inner: Arc<GatewayInner<B>>,
}

impl<B> Clone for RequestGateway<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for RequestGateway<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("store", &self.inner.store)
            .field("paths", &self.inner.paths)
            .finish()
    }
}

impl<B: HttpBackend + Send + Sync + 'static> RequestGateway<B> {
    pub fn new(backend: B, store: CredentialStore, paths: AuthPaths, queue_limit: usize) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                backend,
                store,
                guard: RefreshGuard::new(queue_limit),
                paths,
            }),
        }
    }

    /// The credential store this gateway reads and writes.
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.guard.is_refreshing()
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    /// Perform `request` with the current credential.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] when the request is still rejected after one
    ///   replay, or was already marked as retried.
    /// - [`Error::RefreshFailed`] when the credential could not be refreshed;
    ///   the store has been signed out by then.
    /// - [`Error::RefreshQueueFull`] when too many calls are already parked.
    /// - [`Error::Api`] / [`Error::Http`] for everything else.
    pub async fn call(&self, request: ApiRequest) -> Result<Value> {
        let used = self.inner.store.access_token();
        let response = self.inner.backend.execute(&request, used.as_deref()).await?;

        if !response.is_unauthorized() {
            return response.into_result();
        }

        if request.retried {
            debug!("{} {} unauthorized after retry", request.method, request.path);
            return Err(Error::Unauthorized);
        }

        let credential = self.credential_after_rejection(used.as_deref()).await?;

        let replay = request.mark_retried();
        let response = self
            .inner
            .backend
            .execute(&replay, Some(&credential.access_token))
            .await?;
        if response.is_unauthorized() {
            warn!(
                "{} {} rejected with a refreshed credential",
                replay.method, replay.path
            );
            return Err(Error::Unauthorized);
        }
        response.into_result()
    }

    /// Perform `request` and deserialize the unwrapped payload.
    pub async fn call_as<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let value = self.call(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.call(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.call(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.call(ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.call(ApiRequest::delete(path)).await
    }

    // ---------------------------------------------------------------------
    // Authentication
    // ---------------------------------------------------------------------

    /// Log in and store the issued credential.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Principal> {
        let request = ApiRequest::post(
            &self.inner.paths.login,
            json!({ "identifier": identifier, "password": password }),
        )
        .mark_retried();

        let response = self.inner.backend.execute(&request, None).await?;
        let payload: LoginPayload = serde_json::from_value(response.into_result()?)?;

        let mut credential = Credential::new(payload.token);
        credential.refresh_token = payload.refresh_token;
        self.inner.store.set(credential);

        info!("Logged in as {}", payload.user.username);
        Ok(payload.user)
    }

    /// Refresh the credential, joining an in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<Credential> {
        self.refresh_single_flight().await
    }

    /// Best-effort server logout, then sign out locally.
    pub async fn logout(&self) {
        if self.inner.store.is_signed_in() {
            let request = ApiRequest::post(&self.inner.paths.logout, Value::Null).mark_retried();
            let token = self.inner.store.access_token();
            match self.inner.backend.execute(&request, token.as_deref()).await {
                Ok(response) if !response.is_success() => {
                    debug!("Logout returned {}", response.status);
                }
                Ok(_) => {}
                Err(e) => warn!("Logout request failed: {}", e),
            }
        }
        self.inner.store.sign_out(SignOutReason::UserRequested);
    }

    // ---------------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------------

    /// Credential to replay with after `rejected` was refused.
    async fn credential_after_rejection(&self, rejected: Option<&str>) -> Result<Credential> {
        match self.inner.store.get() {
            // A refresh finished after this call was issued.
            Some(current) if Some(current.access_token.as_str()) != rejected => {
                debug!("Credential changed while call was in flight; replaying");
                Ok(current)
            }
            Some(_) => self.refresh_single_flight().await,
            None => Err(Error::Unauthorized),
        }
    }

    async fn refresh_single_flight(&self) -> Result<Credential> {
        match self.inner.guard.enter()? {
            RefreshTicket::Owner(ownership) => {
                let outcome = self.issue_refresh().await;
                let woken = ownership.complete(&outcome);
                if woken > 0 {
                    debug!("Refresh resolved {} parked call(s)", woken);
                }
                outcome.map_err(Error::from)
            }
            RefreshTicket::Parked(rx) => {
                let outcome = rx.await.map_err(|_| Error::ChannelClosed)?;
                outcome.map_err(Error::from)
            }
        }
    }

    /// Issue exactly one refresh request and update the store.
    async fn issue_refresh(&self) -> RefreshOutcome {
        let Some(current) = self.inner.store.get() else {
            return Err(RefreshError::new("no credential to refresh"));
        };

        info!("Refreshing credential");
        let request = ApiRequest::post(
            &self.inner.paths.refresh,
            json!({ "refreshToken": current.refresh_token }),
        )
        .mark_retried();

        let result = match self
            .inner
            .backend
            .execute(&request, Some(&current.access_token))
            .await
        {
            Ok(response) => response
                .into_result()
                .and_then(|value| Ok(serde_json::from_value::<RefreshPayload>(value)?)),
            Err(e) => Err(e),
        };

        match result {
            Ok(payload) => {
                let credential = Credential {
                    access_token: payload.token,
                    refresh_token: payload.refresh_token.or(current.refresh_token),
                };
                self.inner.store.set(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Credential refresh failed: {}", reason);
                self.inner.store.sign_out(SignOutReason::RefreshFailed {
                    reason: reason.clone(),
                });
                Err(RefreshError::new(reason))
            }
        }
    }
}
