use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

use crate::db::{keys, Storage};
use crate::error::StorageError;
use crate::models::{AuthToken, AuthenticatedUser, SessionId};
use crate::utils::Clock;

/// Everything that makes up the local session, read as one unit.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub token: Option<AuthToken>,
    pub user: Option<AuthenticatedUser>,
    pub session_id: Option<SessionId>,
}

/// Token and session id holder shared by the manager, interceptor and heartbeat.
///
/// Reads are lock-free from the caller's point of view: they clone the
/// current snapshot. Writes are serialized by `write_lock` and persist the
/// whole record before the snapshot is swapped, so a reader never sees a
/// new token next to a stale session id.
///
/// Every login, load and clear starts a new epoch. Work that began in an
/// older epoch, such as a slow refresh, can no longer write.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    state: RwLock<SessionSnapshot>,
    epoch: AtomicU64,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            state: RwLock::new(SessionSnapshot::default()),
            epoch: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn next_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).token.clone()
    }

    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).user.clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).session_id.clone()
    }

    pub fn is_token_expired(&self) -> bool {
        self.token()
            .is_none_or(|token| token.is_expired_at(self.clock.now()))
    }

    pub fn is_token_expiring_soon(&self, threshold: Duration) -> bool {
        self.token()
            .is_none_or(|token| token.expires_within(threshold, self.clock.now()))
    }

    /// Loads persisted state. A token that no longer parses is discarded, and
    /// a session id is generated when none is stored.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<SessionSnapshot, StorageError> {
        let _guard = self.write_lock.lock().await;

        let token = match self.storage.get(keys::ACCESS_TOKEN).await? {
            Some(raw) => match AuthToken::parse(raw) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(error = %e, "Discarding unparseable stored token");
                    self.storage.remove(keys::ACCESS_TOKEN).await?;
                    self.storage.remove(keys::AUTHENTICATED).await?;
                    None
                }
            },
            None => None,
        };

        let user = match self.storage.get(keys::USER).await? {
            Some(raw) => match serde_json::from_str::<AuthenticatedUser>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable stored user");
                    self.storage.remove(keys::USER).await?;
                    None
                }
            },
            None => None,
        };

        let session_id = match self.storage.get(keys::SESSION_ID).await? {
            Some(raw) => SessionId::from(raw),
            None => {
                let generated = SessionId::generate();
                self.storage.set(keys::SESSION_ID, generated.as_str()).await?;
                generated
            }
        };

        let snapshot = SessionSnapshot {
            token,
            user,
            session_id: Some(session_id),
        };
        self.next_epoch();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

        Ok(snapshot)
    }

    /// Returns the current session id, creating and persisting one if needed.
    pub async fn ensure_session_id(&self) -> Result<SessionId, StorageError> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.session_id() {
            return Ok(existing);
        }

        let generated = SessionId::generate();
        self.storage.set(keys::SESSION_ID, generated.as_str()).await?;
        self.state.write().unwrap_or_else(PoisonError::into_inner).session_id = Some(generated.clone());

        Ok(generated)
    }

    /// Stores the result of a successful login.
    pub(crate) async fn establish(
        &self,
        token: AuthToken,
        user: AuthenticatedUser,
        session_id: SessionId,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let user_json = serde_json::to_string(&user)?;
        self.storage.set(keys::ACCESS_TOKEN, token.as_str()).await?;
        self.storage.set(keys::USER, &user_json).await?;
        self.storage.set(keys::SESSION_ID, session_id.as_str()).await?;
        self.storage.set(keys::AUTHENTICATED, "true").await?;

        self.next_epoch();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = SessionSnapshot {
            token: Some(token),
            user: Some(user),
            session_id: Some(session_id),
        };

        Ok(())
    }

    /// Stores a refreshed token, plus user and session id when the backend
    /// sent new ones.
    ///
    /// Returns `false` without writing anything when the session was cleared
    /// or replaced since `epoch`.
    pub(crate) async fn replace_token(
        &self,
        epoch: u64,
        token: AuthToken,
        user: Option<AuthenticatedUser>,
        session_id: Option<SessionId>,
    ) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;

        if self.epoch() != epoch {
            return Ok(false);
        }

        self.storage.set(keys::ACCESS_TOKEN, token.as_str()).await?;
        if let Some(user) = &user {
            self.storage.set(keys::USER, &serde_json::to_string(user)?).await?;
        }
        if let Some(session_id) = &session_id {
            self.storage.set(keys::SESSION_ID, session_id.as_str()).await?;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.token = Some(token);
        if user.is_some() {
            state.user = user;
        }
        if session_id.is_some() {
            state.session_id = session_id;
        }

        Ok(true)
    }

    /// Forgets the session id of a closed session. Returns `false` when
    /// `epoch` is over and there is nothing of that session left to clear.
    pub(crate) async fn clear_session_id(&self, epoch: u64) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        if self.epoch() != epoch {
            return Ok(false);
        }

        self.state.write().unwrap_or_else(PoisonError::into_inner).session_id = None;
        self.storage.remove(keys::SESSION_ID).await?;
        Ok(true)
    }

    /// Drops every piece of local session state.
    ///
    /// The in-memory snapshot is emptied before storage is touched and
    /// storage failures are only logged: after this returns nothing looks
    /// logged in, whatever the backing store did.
    pub(crate) async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        self.clear_locked().await;
    }

    /// Like [`clear`](Self::clear), but only if no login, load or clear
    /// happened since `epoch`. Returns whether anything was cleared.
    pub(crate) async fn clear_if_current(&self, epoch: u64) -> bool {
        let _guard = self.write_lock.lock().await;
        if self.epoch() != epoch {
            return false;
        }
        self.clear_locked().await;
        true
    }

    async fn clear_locked(&self) {
        self.next_epoch();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = SessionSnapshot::default();

        for key in keys::CLEARED_ON_LOGOUT {
            if let Err(e) = self.storage.remove(key).await {
                error!(error = %e, key, "Failed to clear stored session value");
            }
        }
    }
}
