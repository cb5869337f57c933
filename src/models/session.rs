use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier the backend uses to tell concurrent logins apart.
///
/// Generated locally when none is stored, then replaced by the id the
/// backend issues on login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    RefreshFailed,
    SessionClosed,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: i64 },
    TokenRefreshed,
    /// Login was refused because the account is unverified; the UI should
    /// move to the verification flow.
    VerificationRequired { email: String },
    /// Another device logged in with this account. Show the blocking notice
    /// and call [`AuthService::acknowledge_session_closed`] once the user
    /// confirms it.
    ///
    /// [`AuthService::acknowledge_session_closed`]: crate::services::AuthService::acknowledge_session_closed
    SessionClosed,
    /// Local state is cleared; the UI should return to the login screen.
    LoggedOut { reason: LogoutReason },
}

/// Outcome of a single heartbeat ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Alive,
    SessionClosed,
    Failed,
    /// Nothing to ping with: no session id is stored.
    Skipped,
}
