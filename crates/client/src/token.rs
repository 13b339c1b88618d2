// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle: login, single-flight refresh, proactive refresh, logout.
//!
//! [`TokenManager`] is the only writer of the session store. It publishes the
//! authenticated user on a watch channel so observers always see the latest
//! state without polling.
//!
//! Any refresh failure, auth or transport, ends the session. There is no
//! retry before logout.
//!
//! Every session change bumps a generation counter. A refresh only applies
//! its result, or ends the session on failure, if the generation it started
//! under is still current; a logout or login that lands while the request is
//! on the wire wins.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::wire::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest};
use crate::config::ClientConfig;
use crate::error::{error_message, ClientError};
use crate::nav::Navigator;
use crate::session::claims::{decode_claims, AccessClaims};
use crate::session::store::SessionStore;
use crate::session::{Session, User, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

type RefreshFuture = Shared<BoxFuture<'static, Result<Session, ClientError>>>;

/// Handle for the pending proactive refresh.
///
/// Dropping the handle does not cancel the timer; call [`RefreshTimer::cancel`].
#[derive(Debug)]
pub struct RefreshTimer {
    cancel: CancellationToken,
    due_at_ms: i64,
}

impl RefreshTimer {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wall-clock time the refresh fires, in epoch millis.
    pub fn due_at_ms(&self) -> i64 {
        self.due_at_ms
    }
}

/// Owner of the session and the refresh machinery.
pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    refresh_lead: Duration,
    user_tx: watch::Sender<Option<User>>,
    ended_tx: broadcast::Sender<()>,
    /// Bumped on every login, refresh and logout.
    generation: Mutex<u64>,
    inflight: Mutex<Option<RefreshFuture>>,
    timer: Mutex<Option<RefreshTimer>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        config: &ClientConfig,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let (user_tx, _) = watch::channel(None);
        let (ended_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            http,
            base_url: config.base_url(),
            store,
            navigator,
            refresh_lead: config.refresh_lead(),
            user_tx,
            ended_tx,
            generation: Mutex::new(0),
            inflight: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Subscribe to the authenticated user. New receivers see the latest value.
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.user_tx.subscribe()
    }

    /// Fires once each time the session ends (logout or failed refresh).
    ///
    /// Unlike [`Self::subscribe`], events are never coalesced: a logout
    /// followed at once by a new login still delivers the logout.
    pub fn session_ended(&self) -> broadcast::Receiver<()> {
        self.ended_tx.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.user_tx.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    /// Decoded claims of the stored access token, if it decodes.
    pub fn claims(&self) -> Option<AccessClaims> {
        self.access_token().and_then(|t| decode_claims(&t).ok())
    }

    /// True iff a stored access token decodes and its `exp` is in the future.
    ///
    /// Pure query: an expired token is left in place.
    pub fn is_authenticated(&self) -> bool {
        self.claims().is_some_and(|c| c.is_valid_at(epoch_ms() / 1000))
    }

    /// When the proactive refresh is due, if one is scheduled.
    pub fn scheduled_refresh_at(&self) -> Option<i64> {
        self.timer.lock().as_ref().filter(|t| !t.is_cancelled()).map(RefreshTimer::due_at_ms)
    }

    /// Restore a session persisted by an earlier run.
    ///
    /// A valid session is published and scheduled. An expired access token
    /// with a refresh token schedules an immediate refresh. An undecodable
    /// access token clears the session.
    pub fn restore(self: &Arc<Self>) {
        let session = Session::load(self.store.as_ref());
        match session.access_token.as_deref().map(decode_claims) {
            Some(Ok(claims)) => {
                if claims.is_valid_at(epoch_ms() / 1000) {
                    self.user_tx.send_replace(session.user.clone());
                    info!(user = ?session.user.as_ref().map(|u| &u.username), "session restored");
                } else {
                    debug!("stored access token expired");
                }
                if session.refresh_token.is_some() {
                    self.schedule_refresh(claims.expires_at_ms());
                }
            }
            Some(Err(e)) => {
                warn!(err = %e, "discarding stored session");
                let mut generation = self.generation.lock();
                *generation += 1;
                Session::clear(self.store.as_ref());
                self.user_tx.send_replace(None);
            }
            None if session.refresh_token.is_some() => {
                debug!("only a refresh token is stored, refreshing now");
                self.schedule_refresh(0);
            }
            None => {}
        }
    }

    /// Log in with username (or email) and password.
    ///
    /// On failure the session is untouched and the server's status and
    /// message come back as [`ClientError::Authentication`].
    pub async fn login(
        self: &Arc<Self>,
        identifier: &str,
        password: &str,
    ) -> Result<Session, ClientError> {
        let body = LoginRequest { username: identifier, password };
        let resp = self.post_auth("/auth/login", &body).await?;
        let session = self.apply(None, resp)?;
        info!(user = %identifier, "logged in");
        Ok(session)
    }

    /// Create an account and log in as it.
    pub async fn signup(
        self: &Arc<Self>,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, ClientError> {
        let body = RegisterRequest { username, email, password };
        let resp = self.post_auth("/auth/register", &body).await?;
        let session = self.apply(None, resp)?;
        info!(user = %username, "registered");
        Ok(session)
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// Single-flight: while a refresh is running, every caller shares its
    /// result instead of issuing another request. The refresh runs on its own
    /// task, so it finishes even if all callers go away.
    pub async fn refresh(self: &Arc<Self>) -> Result<Session, ClientError> {
        let fut = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(fut) => {
                    debug!("joining in-flight refresh");
                    fut.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let started = *self.generation.lock();
                    let fut = async move { this.run_refresh(started).await }.boxed().shared();
                    *slot = Some(fut.clone());
                    tokio::spawn(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    async fn run_refresh(self: &Arc<Self>, started: u64) -> Result<Session, ClientError> {
        let result = match self.refresh_once().await {
            Ok(resp) => self.apply(Some(started), resp),
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(session) => {
                info!(user = ?session.user.as_ref().map(|u| &u.username), "session refreshed");
                Ok(session)
            }
            Err(ClientError::SessionChanged) => {
                debug!("session changed during refresh, discarding result");
                Err(ClientError::SessionChanged)
            }
            Err(e) => {
                // A refresh token the server refused is not worth revoking.
                let revoke = !matches!(
                    e,
                    ClientError::TokenExpired | ClientError::RefreshRejected { .. }
                );
                match self.end_session(Some(started), revoke) {
                    Ok(_) => {
                        warn!(err = %e, "refresh failed, ended session");
                        Err(e)
                    }
                    Err(changed) => {
                        debug!(err = %e, "refresh failed after the session changed");
                        Err(changed)
                    }
                }
            }
        };
        self.inflight.lock().take();
        result
    }

    async fn refresh_once(&self) -> Result<AuthResponse, ClientError> {
        let refresh_token = self.refresh_token().ok_or(ClientError::NoRefreshToken)?;
        let resp = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token: &refresh_token })
            .send()
            .await?;
        let status = resp.status();
        match status.as_u16() {
            401 => return Err(ClientError::TokenExpired),
            403 => return Err(ClientError::RefreshRejected { status: 403 }),
            _ if !status.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    message: error_message(status, &body),
                });
            }
            _ => {}
        }
        Ok(resp.json().await?)
    }

    /// End the session locally.
    ///
    /// Revocation of the refresh token is best-effort and runs in the
    /// background; await the returned handle to wait for it.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        info!("logging out");
        self.end_session(None, true).ok().flatten()
    }

    /// Clear the session, publish the logged-out state and navigate to login.
    ///
    /// With `expected` set, does nothing and returns
    /// [`ClientError::SessionChanged`] unless that generation is current.
    fn end_session(
        &self,
        expected: Option<u64>,
        revoke: bool,
    ) -> Result<Option<JoinHandle<()>>, ClientError> {
        let handle = {
            let mut generation = self.generation.lock();
            if expected.is_some_and(|g| g != *generation) {
                return Err(ClientError::SessionChanged);
            }
            *generation += 1;

            let refresh_token = self.refresh_token();
            if let Some(timer) = self.timer.lock().take() {
                timer.cancel();
            }
            Session::clear(self.store.as_ref());
            self.user_tx.send_replace(None);
            let _ = self.ended_tx.send(());

            match (revoke, refresh_token) {
                (true, Some(token)) => self.spawn_revoke(token),
                _ => None,
            }
        };
        self.navigator.go_to_login();
        Ok(handle)
    }

    fn spawn_revoke(&self, refresh_token: String) -> Option<JoinHandle<()>> {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, skipping token revocation");
            return None;
        };
        let http = self.http.clone();
        let url = self.url("/auth/logout");
        Some(rt.spawn(async move {
            let result = http
                .post(&url)
                .json(&RefreshRequest { refresh_token: &refresh_token })
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                warn!(err = %e, "failed to revoke refresh token");
            }
        }))
    }

    async fn post_auth<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthResponse, ClientError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Authentication {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }
        Ok(resp.json().await?)
    }

    /// Persist a fresh token pair, publish the user and reschedule.
    ///
    /// With `expected` set, the pair is discarded with
    /// [`ClientError::SessionChanged`] unless that generation is current.
    fn apply(
        self: &Arc<Self>,
        expected: Option<u64>,
        resp: AuthResponse,
    ) -> Result<Session, ClientError> {
        let claims = decode_claims(&resp.access_token)?;
        let mut generation = self.generation.lock();
        if expected.is_some_and(|g| g != *generation) {
            return Err(ClientError::SessionChanged);
        }
        *generation += 1;

        let session = Session::new(resp.access_token, resp.refresh_token, resp.user);
        session.save(self.store.as_ref());
        self.user_tx.send_replace(session.user.clone());
        self.schedule_refresh(claims.expires_at_ms());
        Ok(session)
    }

    /// Schedule a one-shot refresh `refresh_lead` before `expires_at_ms`.
    ///
    /// Replaces and cancels any pending timer.
    fn schedule_refresh(self: &Arc<Self>, expires_at_ms: i64) {
        let now = epoch_ms();
        let delay = refresh_delay(expires_at_ms, now, self.refresh_lead);
        let cancel = CancellationToken::new();
        let timer =
            RefreshTimer { cancel: cancel.clone(), due_at_ms: now + delay.as_millis() as i64 };
        debug!(delay_ms = delay.as_millis() as u64, "scheduling proactive refresh");

        if let Some(prev) = self.timer.lock().replace(timer) {
            prev.cancel();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(manager) = weak.upgrade() else {
                return;
            };
            debug!("proactive refresh firing");
            if let Err(e) = manager.refresh().await {
                debug!(err = %e, "proactive refresh failed");
            }
        });
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Delay until `lead` before `expires_at_ms`, never negative.
pub fn refresh_delay(expires_at_ms: i64, now_ms: i64, lead: Duration) -> Duration {
    let refresh_at = expires_at_ms.saturating_sub(lead.as_millis() as i64);
    Duration::from_millis(refresh_at.saturating_sub(now_ms).max(0) as u64)
}

/// Current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
