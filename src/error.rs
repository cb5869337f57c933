use std::sync::Arc;

use reqwest::StatusCode;

/// Errors raised by the session manager and the auth endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Email or password rejected by the backend.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The account exists but its email address was never verified.
    #[error("account {email} has not been verified")]
    Unverified { email: String },

    /// The account is banned. `reason` is whatever the backend sent along.
    #[error("account is banned")]
    Banned { reason: Option<String> },

    /// A newer login elsewhere replaced this session.
    #[error("session was closed by a newer login")]
    SessionClosed,

    #[error("no authenticated session")]
    NotAuthenticated,

    /// The shared refresh attempt failed; every waiter sees the same cause.
    #[error("token refresh failed")]
    RefreshFailed(#[source] Arc<AuthError>),

    #[error("unexpected response {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid header value")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("invalid endpoint path")]
    Url(#[from] url::ParseError),

    #[error("malformed access token")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by [`ApiClient`](crate::middleware::ApiClient).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was still rejected after retrying with a fresh token.
    #[error("request rejected as unauthorized")]
    Unauthorized,

    /// The request was rejected and the session could not be renewed.
    /// The session has been cleared by the time this is returned.
    #[error("request rejected as unauthorized and the session could not be renewed")]
    SessionExpired(#[source] AuthError),

    /// A newer login elsewhere closed this session; nothing is sent until
    /// the user logs in again.
    #[error("session was closed by a newer login")]
    SessionClosed,

    /// A 401 arrived but the request body is a stream that cannot be resent.
    #[error("request body cannot be replayed")]
    NotReplayable,

    #[error("server responded with {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid header value")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("invalid request path")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("stored value is corrupt")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is not a valid URL")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{var} is not a valid number of seconds")]
    InvalidNumber {
        var: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
}
