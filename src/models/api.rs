use serde::{Deserialize, Serialize};

use super::user::AuthenticatedUser;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub session_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: AuthenticatedUser,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub user: Option<AuthenticatedUser>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub session_id: &'a str,
}

/// Error payload the backend attaches to 4xx/5xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_closed: bool,
}

pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
pub const ACCOUNT_UNVERIFIED: &str = "ACCOUNT_UNVERIFIED";
pub const ACCOUNT_BANNED: &str = "ACCOUNT_BANNED";
