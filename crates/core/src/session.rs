// crates/core/src/session.rs
//! Session Manager: access-token lifecycle and single-flight refresh.
//!
//! Every call goes out with the current bearer token. A 401 moves the
//! manager from `Idle` to `Refreshing` exactly once; 401s that land while a
//! refresh is in flight park as [`PendingRequest`]s. When the refresh
//! settles they are released in the order they arrived, and each caller
//! replays its own request with the new token. Replays and the retry of the
//! request that triggered the refresh are marked as already retried, so a
//! second 401 fails instead of looping.
//!
//! The in-memory credential is authoritative. Durable storage is written as
//! a side channel so [`SessionManager::new`] can rehydrate after a restart.

use std::sync::{Arc, Mutex};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::PortalConfig;
use crate::error::ApiError;
use crate::storage::CredentialStore;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use civic_portal_types::{
    CompleteSetupRequest, CompleteSetupResponse, Credential, LoginRequest, LoginResponse,
    RefreshResponse,
};

/// A request together with whether it has already been through a refresh
/// cycle. Decided when the request enters the manager and never mutated;
/// a replay is a new `Attempt`.
#[derive(Debug, Clone)]
pub struct Attempt {
    request: ApiRequest,
    retried: bool,
}

impl Attempt {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    /// An attempt that must not trigger another refresh.
    pub fn retried(request: ApiRequest) -> Self {
        Self {
            request,
            retried: true,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    fn replay(&self) -> Self {
        Self::retried(self.request.clone())
    }
}

/// A caller parked behind the in-flight refresh. Receives the new access
/// token, or the refresh error.
struct PendingRequest {
    reply: oneshot::Sender<Result<String, ApiError>>,
}

enum RefreshState {
    Idle,
    Refreshing(Vec<PendingRequest>),
}

/// What a 401 turns into, decided under the state lock.
enum Decision {
    /// Another refresh is in flight; wait for it.
    Wait(oneshot::Receiver<Result<String, ApiError>>),
    /// A refresh already replaced the token this request was sent with.
    RetryWith(String),
    /// No refresh token: the session is over.
    EndSession,
    /// This caller performs the refresh.
    Refresh,
}

/// Resets `Refreshing` to `Idle` when the refreshing future settles or is
/// dropped. On drop, parked requests see their sender vanish and fail with
/// [`ApiError::RefreshAbandoned`].
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self { state, armed: true }
    }

    /// Return to `Idle` and hand back everything that queued meanwhile.
    fn settle(mut self) -> Vec<PendingRequest> {
        self.armed = false;
        take_queue(self.state)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let abandoned = take_queue(self.state);
            warn!(queued = abandoned.len(), "token refresh dropped before it settled");
        }
    }
}

fn take_queue(state: &Mutex<RefreshState>) -> Vec<PendingRequest> {
    let mut state = state.lock().expect("refresh state lock poisoned");
    match std::mem::replace(&mut *state, RefreshState::Idle) {
        RefreshState::Refreshing(queue) => queue,
        RefreshState::Idle => Vec::new(),
    }
}

/// Endpoint paths the manager treats specially.
#[derive(Debug, Clone)]
struct AuthPaths {
    login: String,
    refresh: String,
    complete_setup: String,
}

pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    credentials: CredentialStore,
    paths: AuthPaths,
    refresh: Mutex<RefreshState>,
    current: watch::Sender<Option<Credential>>,
}

impl<T: Transport> SessionManager<T> {
    /// Build the manager, rehydrating any persisted session.
    pub fn new(transport: Arc<T>, credentials: CredentialStore, config: &PortalConfig) -> Self {
        let restored = credentials.load();
        if let Some(cred) = &restored {
            debug!(expires_at = %cred.expires_at, roles = cred.roles.len(), "restored session");
        }
        let (current, _) = watch::channel(restored);
        Self {
            transport,
            credentials,
            paths: AuthPaths {
                login: config.login_path.clone(),
                refresh: config.refresh_path.clone(),
                complete_setup: config.complete_setup_path.clone(),
            },
            refresh: Mutex::new(RefreshState::Idle),
            current,
        }
    }

    /// Reload the session from storage, replacing whatever is in memory.
    pub fn restore(&self) -> Option<Credential> {
        let restored = self.credentials.load();
        self.current.send_replace(restored.clone());
        restored
    }

    pub fn credential(&self) -> Option<Credential> {
        self.current.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|c| c.access_token.clone())
    }

    /// Logged in with a token that has not yet expired at `now`.
    pub fn is_authenticated(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|c| !c.is_expired(now))
    }

    /// Observe session changes. Flips to `None` whenever the session is torn
    /// down, including after a rejected refresh.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.current.subscribe()
    }

    /// Refresh the access token now, joining the in-flight refresh if there
    /// is one. Returns the new token.
    pub async fn refresh(&self) -> Result<String, ApiError> {
        match self.join_or_lead() {
            Some(rx) => rx.await.unwrap_or(Err(ApiError::RefreshAbandoned)),
            None => self.lead_refresh().await,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            *self.refresh.lock().expect("refresh state lock poisoned"),
            RefreshState::Refreshing(_)
        )
    }

    // -- Session lifecycle ----------------------------------------------------

    /// POST credentials to the login endpoint and install the new session.
    /// Goes straight to the transport: a 401 here means bad credentials, not
    /// an expired token.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let request = ApiRequest::post(self.paths.login.clone()).with_json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let response = self.transport.execute(&request).await?;
        if !response.status.is_success() {
            return Err(ApiError::from_response(&request.method, response.status, &response.body));
        }

        let login: LoginResponse = response.json()?;
        if let Some(refresh_token) = login.refresh_token.as_deref() {
            if let Err(e) = self.credentials.set_refresh_token(refresh_token) {
                error!(error = %e, "failed to persist refresh token");
            }
        }
        let credential = login.credential();
        self.install(credential.clone());
        info!(roles = ?credential.roles, expires_at = %credential.expires_at, "logged in");
        Ok(credential)
    }

    pub fn logout(&self) {
        self.end_session();
        info!("logged out");
    }

    /// First-time employee setup: verification code plus the new password.
    pub async fn complete_setup(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<CompleteSetupResponse, ApiError> {
        let request =
            ApiRequest::post(self.paths.complete_setup.clone()).with_json(&CompleteSetupRequest {
                code: code.to_string(),
                new_password: new_password.to_string(),
            })?;
        self.send(request).await?.json()
    }

    // -- Request pipeline -----------------------------------------------------

    /// Attach the current access token, if any.
    pub fn attach(&self, request: &ApiRequest) -> ApiRequest {
        request.with_bearer(self.access_token().as_deref())
    }

    /// Send through the refresh-aware pipeline.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send_attempt(Attempt::new(request)).await
    }

    pub async fn send_attempt(&self, attempt: Attempt) -> Result<ApiResponse, ApiError> {
        let token = self.access_token();
        match self.execute_once(&attempt, token.as_deref()).await {
            Ok(response) => Ok(self.on_response(response)),
            Err(err) => self.on_error(attempt, token, err).await,
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        self.send(ApiRequest::post(path).with_json(body)?).await?.json()
    }

    pub async fn put<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        self.send(ApiRequest::put(path).with_json(body)?).await?.json()
    }

    pub async fn patch<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        self.send(ApiRequest::patch(path).with_json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Successful responses pass through untouched.
    pub fn on_response(&self, response: ApiResponse) -> ApiResponse {
        response
    }

    async fn on_error(
        &self,
        attempt: Attempt,
        sent_token: Option<String>,
        err: ApiError,
    ) -> Result<ApiResponse, ApiError> {
        if !err.is_unauthorized() {
            return Err(err);
        }

        if self.is_refresh_call(attempt.request()) {
            warn!("refresh endpoint rejected the session");
            self.end_session();
            return Err(err);
        }

        if attempt.is_retried() {
            debug!(path = %attempt.request().path, "401 after retry; giving up");
            return Err(err);
        }

        let decision = {
            let mut state = self.refresh.lock().expect("refresh state lock poisoned");
            let decision = match &mut *state {
                RefreshState::Refreshing(queue) => {
                    let (reply, rx) = oneshot::channel();
                    queue.push(PendingRequest { reply });
                    Decision::Wait(rx)
                }
                RefreshState::Idle => match self.access_token() {
                    Some(current) if sent_token.as_deref() != Some(current.as_str()) => {
                        Decision::RetryWith(current)
                    }
                    _ if !self.transport.has_refresh_token() => Decision::EndSession,
                    _ => Decision::Refresh,
                },
            };
            // Check and set under the same lock acquisition.
            if matches!(decision, Decision::Refresh) {
                *state = RefreshState::Refreshing(Vec::new());
            }
            decision
        };

        match decision {
            Decision::Wait(rx) => {
                debug!(path = %attempt.request().path, "queued behind in-flight refresh");
                let token = rx.await.unwrap_or(Err(ApiError::RefreshAbandoned))?;
                self.execute_once(&attempt.replay(), Some(token.as_str())).await
            }
            Decision::RetryWith(token) => {
                debug!(path = %attempt.request().path, "token already refreshed; retrying");
                self.execute_once(&attempt.replay(), Some(token.as_str())).await
            }
            Decision::EndSession => {
                warn!("access token rejected and no refresh token available");
                self.end_session();
                Err(err)
            }
            Decision::Refresh => {
                info!("access token rejected; refreshing");
                match self.lead_refresh().await {
                    Ok(token) => self.execute_once(&attempt.replay(), Some(token.as_str())).await,
                    // The caller that hit the 401 sees its own error.
                    Err(_) => Err(err),
                }
            }
        }
    }

    /// Park behind the in-flight refresh, or take the `Idle → Refreshing`
    /// transition and return `None`.
    fn join_or_lead(&self) -> Option<oneshot::Receiver<Result<String, ApiError>>> {
        let mut state = self.refresh.lock().expect("refresh state lock poisoned");
        if let RefreshState::Refreshing(queue) = &mut *state {
            let (reply, rx) = oneshot::channel();
            queue.push(PendingRequest { reply });
            return Some(rx);
        }
        *state = RefreshState::Refreshing(Vec::new());
        None
    }

    /// Runs only in the caller that moved the state to `Refreshing`. Nothing
    /// is awaited between installing the new token and releasing the queue,
    /// so cancelling this caller afterwards cannot strand a waiter.
    async fn lead_refresh(&self) -> Result<String, ApiError> {
        let guard = RefreshGuard::new(&self.refresh);

        match self.call_refresh().await {
            Ok(refreshed) => {
                let credential = match self.credential() {
                    Some(current) => current.renewed(refreshed),
                    None => Credential {
                        access_token: refreshed.access_token,
                        expires_at: refreshed.expires_at,
                        roles: Vec::new(),
                    },
                };
                let token = credential.access_token.clone();
                info!(expires_at = %credential.expires_at, "access token refreshed");
                self.install(credential);

                let queued = guard.settle();
                if !queued.is_empty() {
                    debug!(count = queued.len(), "releasing queued requests");
                }
                for pending in queued {
                    // The waiter may have given up; nothing to deliver to.
                    let _ = pending.reply.send(Ok(token.clone()));
                }
                Ok(token)
            }
            Err(refresh_err) => {
                warn!(error = %refresh_err, "token refresh failed; ending session");
                self.end_session();
                for pending in guard.settle() {
                    let _ = pending.reply.send(Err(refresh_err.clone()));
                }
                Err(refresh_err)
            }
        }
    }

    async fn call_refresh(&self) -> Result<RefreshResponse, ApiError> {
        let request = self.attach(&ApiRequest::new(Method::POST, self.paths.refresh.clone()));
        let response = self.transport.execute(&request).await?;
        if !response.status.is_success() {
            return Err(ApiError::from_response(&request.method, response.status, &response.body));
        }
        response.json()
    }

    /// One round trip with an explicit token; non-2xx becomes an error.
    async fn execute_once(
        &self,
        attempt: &Attempt,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let request = attempt.request().with_bearer(token);
        let response = self.transport.execute(&request).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(&request.method, response.status, &response.body))
        }
    }

    fn is_refresh_call(&self, request: &ApiRequest) -> bool {
        request.path.trim_end_matches('/') == self.paths.refresh.trim_end_matches('/')
    }

    fn install(&self, credential: Credential) {
        if let Err(e) = self.credentials.save(&credential) {
            error!(error = %e, "failed to persist session");
        }
        self.current.send_replace(Some(credential));
    }

    fn end_session(&self) {
        self.current.send_replace(None);
        if let Err(e) = self.credentials.clear() {
            error!(error = %e, "failed to clear persisted session");
        }
        self.transport.clear_refresh_token();
    }
}
