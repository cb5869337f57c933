use std::env;
use std::time::Duration;

use dotenv::dotenv;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STORAGE_URL: &str = "sqlite://medadmin-session.db?mode=rwc";

/// Paths of the backend endpoints the session layer talks to directly.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login: String,
    pub logout: String,
    pub refresh: String,
    pub heartbeat: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            logout: "/auth/logout".to_string(),
            refresh: "/auth/refresh".to_string(),
            heartbeat: "/auth/heartbeat".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Root of the REST backend. Endpoint paths are joined onto it.
    pub base_url: Url,
    pub endpoints: Endpoints,
    /// Period of the heartbeat loop. The first beat fires immediately.
    pub heartbeat_interval: Duration,
    /// Requests refresh the token first when it expires within this window.
    pub refresh_leeway: Duration,
    pub request_timeout: Duration,
    /// Where [`SqliteStorage`](crate::db::SqliteStorage) keeps local state.
    pub storage_url: String,
}

impl AuthConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            endpoints: Endpoints::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            refresh_leeway: DEFAULT_REFRESH_LEEWAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            storage_url: DEFAULT_STORAGE_URL.to_string(),
        }
    }

    /// Reads the configuration from the environment, loading `.env` first.
    ///
    /// `API_BASE_URL` is required; `HEARTBEAT_INTERVAL_SECS`,
    /// `REFRESH_LEEWAY_SECS`, `REQUEST_TIMEOUT_SECS` and `SESSION_STORAGE_URL`
    /// fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let raw_url = env::var("API_BASE_URL").map_err(|_| ConfigError::Missing("API_BASE_URL"))?;
        let base_url = Url::parse(&raw_url).map_err(|source| ConfigError::InvalidUrl {
            var: "API_BASE_URL",
            source,
        })?;

        let mut config = Self::new(base_url);
        if let Some(interval) = seconds_from_env("HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = interval;
        }
        if let Some(leeway) = seconds_from_env("REFRESH_LEEWAY_SECS")? {
            config.refresh_leeway = leeway;
        }
        if let Some(timeout) = seconds_from_env("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }
        if let Ok(storage_url) = env::var("SESSION_STORAGE_URL") {
            config.storage_url = storage_url;
        }

        Ok(config)
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    pub fn with_storage_url(mut self, storage_url: impl Into<String>) -> Self {
        self.storage_url = storage_url.into();
        self
    }

    /// Resolves `path` under the base URL. A leading `/` does not escape the
    /// base path: with a base of `https://host/api` the login endpoint is
    /// `https://host/api/auth/login`.
    pub fn endpoint_url(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(path.trim_start_matches('/'))
    }

    /// Login, refresh and heartbeat never go through refresh-and-retry.
    pub fn is_auth_endpoint(&self, url: &Url) -> bool {
        let path = url.path();
        [
            &self.endpoints.login,
            &self.endpoints.refresh,
            &self.endpoints.heartbeat,
        ]
        .iter()
        .any(|endpoint| self.endpoint_url(endpoint).is_ok_and(|u| u.path() == path))
    }
}

fn seconds_from_env(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|source| ConfigError::InvalidNumber { var, source }),
        Err(_) => Ok(None),
    }
}
