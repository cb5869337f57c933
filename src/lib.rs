//! Authenticated-session client for the hospital administration backend.
//!
//! - [`AuthService`] owns login, logout, single-flight token refresh and the
//!   heartbeat that detects a newer login elsewhere.
//! - [`ApiClient`] attaches the bearer token and session id to every request
//!   and recovers from an expired token with one refresh-and-retry.
//! - [`Storage`] persists the session between runs ([`SqliteStorage`],
//!   [`MemoryStorage`]).
//!
//! The UI layer listens to [`SessionEvent`]s from [`AuthService::subscribe`]
//! to show the closed-session notice or return to the login screen.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::AuthConfig;
pub use db::{MemoryStorage, SqliteStorage, Storage};
pub use error::{ApiError, AuthError, ConfigError, StorageError};
pub use middleware::ApiClient;
pub use models::{
    AuthToken, AuthenticatedUser, HeartbeatStatus, LogoutReason, SessionEvent, SessionId,
};
pub use services::AuthService;
