use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AuthConfig;
use crate::db::Storage;
use crate::error::AuthError;
use crate::models::api::LoginRequest;
use crate::models::{
    AuthToken, AuthenticatedUser, HeartbeatStatus, LogoutReason, SessionEvent, SessionId,
};
use crate::services::auth_api::AuthApi;
use crate::services::heartbeat::Heartbeat;
use crate::services::session_store::{SessionSnapshot, SessionStore};
use crate::utils::{Clock, SystemClock};

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthToken, Arc<AuthError>>>>;

const EVENT_CAPACITY: usize = 32;

/// Owner of the authenticated session: login, logout, token refresh and the
/// heartbeat.
///
/// Cloning is cheap and every clone refers to the same session. All writes
/// to the token, user and session id go through this type.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuthConfig,
    api: AuthApi,
    store: SessionStore,
    heartbeat: Heartbeat,
    /// The refresh currently in flight, tagged with the session epoch it
    /// started in.
    refresh: Mutex<Option<(u64, SharedRefresh)>>,
    /// Set once a closed session has been reported, until the next login.
    session_closed: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthService {
    pub fn new(config: AuthConfig, storage: Arc<dyn Storage>) -> Result<Self, AuthError> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AuthConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                api: AuthApi::new(http, config.clone()),
                store: SessionStore::new(storage, clock),
                heartbeat: Heartbeat::new(config.heartbeat_interval),
                refresh: Mutex::new(None),
                session_closed: AtomicBool::new(false),
                events,
                config,
            }),
        })
    }

    /* ---------- READ ACCESS ---------- */

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub(crate) fn http(&self) -> &Client {
        self.inner.api.http()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.snapshot()
    }

    pub fn current_token(&self) -> Option<AuthToken> {
        self.inner.store.token()
    }

    pub fn current_user(&self) -> Option<AuthenticatedUser> {
        self.inner.store.user()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.store.session_id()
    }

    /// `false` once a newer login elsewhere closed this session, even before
    /// the notice is acknowledged.
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.token().is_some() && !self.is_session_closed()
    }

    pub fn is_session_closed(&self) -> bool {
        self.inner.session_closed.load(Ordering::SeqCst)
    }

    /// `true` when there is no token or its `exp` is at or before now.
    pub fn is_token_expired(&self) -> bool {
        self.inner.store.is_token_expired()
    }

    /// `true` when there is no token or it expires within `threshold_secs`.
    pub fn is_token_expiring_soon(&self, threshold_secs: i64) -> bool {
        let threshold = Duration::try_seconds(threshold_secs).unwrap_or(if threshold_secs < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        });
        self.inner.store.is_token_expiring_soon(threshold)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.heartbeat.is_running()
    }

    /* ---------- SESSION LIFECYCLE ---------- */

    /// Loads the persisted session. Starts the heartbeat and returns `true`
    /// when an unexpired token and a user were found.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<bool, AuthError> {
        let snapshot = self.inner.store.load().await?;

        let Some(user) = snapshot.user else {
            debug!("No stored user, nothing to restore");
            return Ok(false);
        };
        if snapshot.token.is_none() || self.is_token_expired() {
            debug!(user_id = user.id, "Stored token missing or expired");
            return Ok(false);
        }

        self.inner.session_closed.store(false, Ordering::SeqCst);
        self.start_heartbeat();
        info!(user_id = user.id, "Session restored from storage");
        Ok(true)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedUser, AuthError> {
        let session_id = self.inner.store.ensure_session_id().await?;
        let request = LoginRequest {
            email,
            password,
            session_id: session_id.as_str(),
        };

        let response = match self.inner.api.login(&request).await {
            Ok(response) => response,
            Err(AuthError::Unverified { email }) => {
                info!(email = %email, "Login refused, account needs verification");
                self.emit(SessionEvent::VerificationRequired {
                    email: email.clone(),
                });
                return Err(AuthError::Unverified { email });
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                return Err(e);
            }
        };

        let token = AuthToken::parse(response.access_token)?;
        let user = response.user;
        self.inner
            .store
            .establish(token, user.clone(), SessionId::from(response.session_id))
            .await?;

        self.inner.session_closed.store(false, Ordering::SeqCst);
        info!(user_id = user.id, "Logged in");
        self.emit(SessionEvent::LoggedIn { user_id: user.id });
        self.start_heartbeat();

        Ok(user)
    }

    /// Tells the backend the session is over, then clears local state no
    /// matter how that call went.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.inner.heartbeat.stop();

        let snapshot = self.inner.store.snapshot();
        if snapshot.token.is_some() {
            if let Err(e) = self
                .inner
                .api
                .logout(snapshot.token.as_ref(), snapshot.session_id.as_ref())
                .await
            {
                warn!(error = %e, "Server-side logout failed, clearing local session anyway");
            }
        }

        self.end_session(LogoutReason::UserRequested).await;
    }

    /// The acknowledgement action of the "session closed" notice.
    pub async fn acknowledge_session_closed(&self) {
        self.end_session(LogoutReason::SessionClosed).await;
    }

    /* ---------- TOKEN REFRESH ---------- */

    /// Exchanges the current token for a new one.
    ///
    /// Concurrent callers share a single request to the refresh endpoint and
    /// all receive its result. A failed refresh ends the session before the
    /// error is returned.
    pub async fn refresh_token(&self) -> Result<AuthToken, AuthError> {
        if self.inner.store.token().is_none() {
            return Err(AuthError::NotAuthenticated);
        }

        let epoch = self.inner.store.epoch();
        let pending = {
            let mut slot = self.inner.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((started_in, pending)) if *started_in == epoch => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                _ => {
                    let weak = Arc::downgrade(&self.inner);
                    let pending = async move {
                        let Some(inner) = weak.upgrade() else {
                            return Err(Arc::new(AuthError::NotAuthenticated));
                        };
                        let this = AuthService { inner };
                        let result = this.perform_refresh(epoch).await.map_err(Arc::new);
                        let mut slot =
                            this.inner.refresh.lock().unwrap_or_else(PoisonError::into_inner);
                        // a refresh for a later session may have taken the slot
                        if slot.as_ref().is_some_and(|(started_in, _)| *started_in == epoch) {
                            slot.take();
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((epoch, pending.clone()));
                    pending
                }
            }
        };

        pending.await.map_err(AuthError::RefreshFailed)
    }

    #[instrument(skip(self))]
    async fn perform_refresh(&self, epoch: u64) -> Result<AuthToken, AuthError> {
        let snapshot = self.inner.store.snapshot();
        if self.inner.store.epoch() != epoch {
            return Err(AuthError::NotAuthenticated);
        }
        let Some(current) = snapshot.token else {
            return Err(AuthError::NotAuthenticated);
        };

        info!("Refreshing access token");
        let result = async {
            let response = self
                .inner
                .api
                .refresh(&current, snapshot.session_id.as_ref())
                .await?;
            let token = AuthToken::parse(response.access_token)?;
            let stored = self
                .inner
                .store
                .replace_token(
                    epoch,
                    token.clone(),
                    response.user,
                    response.session_id.map(SessionId::from),
                )
                .await?;
            if !stored {
                debug!("Session ended while refreshing, dropping new token");
                return Err(AuthError::NotAuthenticated);
            }
            Ok::<_, AuthError>(token)
        }
        .await;

        match result {
            Ok(token) => {
                self.emit(SessionEvent::TokenRefreshed);
                Ok(token)
            }
            Err(e) => {
                if self.inner.store.clear_if_current(epoch).await {
                    warn!(error = %e, "Token refresh failed, session ended");
                    self.after_clear(LogoutReason::RefreshFailed);
                } else {
                    debug!(error = %e, "Refresh outlived its session");
                }
                Err(e)
            }
        }
    }

    /* ---------- HEARTBEAT ---------- */

    /// Starts (or restarts) the heartbeat loop for the current session.
    pub fn start_heartbeat(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.heartbeat.start(move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match (AuthService { inner }).heartbeat_now().await {
                    HeartbeatStatus::SessionClosed | HeartbeatStatus::Skipped => ControlFlow::Break(()),
                    HeartbeatStatus::Alive | HeartbeatStatus::Failed => ControlFlow::Continue(()),
                }
            }
        });
        debug!(interval = ?self.inner.config.heartbeat_interval, "Heartbeat started");
    }

    pub fn stop_heartbeat(&self) {
        if self.inner.heartbeat.stop() {
            debug!("Heartbeat stopped");
        }
    }

    /// Sends one heartbeat. Only a "session closed" answer has consequences;
    /// any other failure is logged and ignored.
    #[instrument(skip(self))]
    pub async fn heartbeat_now(&self) -> HeartbeatStatus {
        let epoch = self.inner.store.epoch();
        let snapshot = self.inner.store.snapshot();
        let Some(session_id) = snapshot.session_id else {
            return HeartbeatStatus::Skipped;
        };

        match self
            .inner
            .api
            .heartbeat(snapshot.token.as_ref(), &session_id)
            .await
        {
            Ok(()) => HeartbeatStatus::Alive,
            Err(AuthError::SessionClosed) => {
                self.on_session_closed(epoch).await;
                HeartbeatStatus::SessionClosed
            }
            Err(e) => {
                debug!(error = %e, "Heartbeat failed");
                HeartbeatStatus::Failed
            }
        }
    }

    async fn on_session_closed(&self, epoch: u64) {
        match self.inner.store.clear_session_id(epoch).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Closed-session answer arrived after the session ended");
                return;
            }
            Err(e) => error!(error = %e, "Failed to clear closed session id"),
        }

        if self.inner.session_closed.swap(true, Ordering::SeqCst) {
            debug!("Closed session already reported");
            return;
        }

        warn!("Session was closed by a newer login elsewhere");
        self.inner.heartbeat.stop();
        self.emit(SessionEvent::SessionClosed);
    }

    /* ---------- PRIVATE HELPERS ---------- */

    async fn end_session(&self, reason: LogoutReason) {
        self.inner.store.clear().await;
        self.after_clear(reason);
    }

    fn after_clear(&self, reason: LogoutReason) {
        self.inner.heartbeat.stop();
        // answers for the old session are dropped by epoch from here on
        self.inner.session_closed.store(false, Ordering::SeqCst);
        info!(?reason, "Session ended");
        self.emit(SessionEvent::LoggedOut { reason });
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.inner.events.send(event);
    }
}
