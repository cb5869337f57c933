use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::middleware::attach_credentials;
use crate::models::api::{
    ErrorBody, HeartbeatRequest, LoginRequest, LoginResponse, RefreshResponse, ACCOUNT_BANNED,
    ACCOUNT_UNVERIFIED,
};
use crate::models::{AuthToken, SessionId};

/// Raw calls to the four session endpoints.
///
/// None of these go through refresh-and-retry: a 401 here is an answer,
/// not something to recover from.
#[derive(Clone)]
pub struct AuthApi {
    http: Client,
    config: AuthConfig,
}

impl AuthApi {
    pub fn new(http: Client, config: AuthConfig) -> Self {
        Self { http, config }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: &LoginRequest<'_>) -> Result<LoginResponse, AuthError> {
        let response = self
            .send(&self.config.endpoints.login, Some(request), None, None)
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<LoginResponse>().await?);
        }

        let body = read_error_body(response).await;
        debug!(%status, code = ?body.code, "Login rejected");

        match (status, body.code.as_deref()) {
            (StatusCode::FORBIDDEN, Some(ACCOUNT_UNVERIFIED)) => Err(AuthError::Unverified {
                email: request.email.to_string(),
            }),
            (StatusCode::FORBIDDEN, Some(ACCOUNT_BANNED)) => Err(AuthError::Banned {
                reason: body.message,
            }),
            (StatusCode::UNAUTHORIZED, _) => Err(AuthError::InvalidCredentials),
            _ => Err(unexpected(status, body)),
        }
    }

    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        token: &AuthToken,
        session_id: Option<&SessionId>,
    ) -> Result<RefreshResponse, AuthError> {
        let response = self
            .send::<()>(&self.config.endpoints.refresh, None, Some(token), session_id)
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<RefreshResponse>().await?);
        }

        let body = read_error_body(response).await;
        if status == StatusCode::UNAUTHORIZED && body.session_closed {
            return Err(AuthError::SessionClosed);
        }
        Err(unexpected(status, body))
    }

    /// Pings the heartbeat endpoint. A 401 flagged `session_closed` becomes
    /// [`AuthError::SessionClosed`]; every other failure is a plain error.
    #[instrument(skip(self, token))]
    pub async fn heartbeat(
        &self,
        token: Option<&AuthToken>,
        session_id: &SessionId,
    ) -> Result<(), AuthError> {
        let request = HeartbeatRequest {
            session_id: session_id.as_str(),
        };
        let response = self
            .send(&self.config.endpoints.heartbeat, Some(&request), token, Some(session_id))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = read_error_body(response).await;
        if status == StatusCode::UNAUTHORIZED && body.session_closed {
            return Err(AuthError::SessionClosed);
        }
        Err(unexpected(status, body))
    }

    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        token: Option<&AuthToken>,
        session_id: Option<&SessionId>,
    ) -> Result<(), AuthError> {
        let response = self
            .send::<()>(&self.config.endpoints.logout, None, token, session_id)
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(unexpected(status, read_error_body(response).await))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
        token: Option<&AuthToken>,
        session_id: Option<&SessionId>,
    ) -> Result<Response, AuthError> {
        let url = self.config.endpoint_url(path)?;

        let mut builder = self.http.request(Method::POST, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let mut request = builder.build()?;
        attach_credentials(request.headers_mut(), token, session_id)?;

        Ok(self.http.execute(request).await?)
    }
}

async fn read_error_body(response: Response) -> ErrorBody {
    match response.bytes().await {
        Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Error response body is not JSON");
            ErrorBody::default()
        }),
        _ => ErrorBody::default(),
    }
}

fn unexpected(status: StatusCode, body: ErrorBody) -> AuthError {
    AuthError::Status {
        status,
        message: body
            .message
            .or(body.code)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
    }
}
