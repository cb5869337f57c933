use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::credentials::attach_credentials;
use crate::error::ApiError;
use crate::models::AuthToken;
use crate::services::AuthService;

/// HTTP client for the REST backend that keeps requests authenticated.
///
/// Every request carries the bearer token and session id. A 401 triggers
/// the shared token refresh and a single retry; the login, refresh and
/// heartbeat endpoints are passed through untouched.
#[derive(Clone)]
pub struct ApiClient {
    auth: AuthService,
}

impl ApiClient {
    pub fn new(auth: AuthService) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Starts a request to `path`, relative to the configured base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.auth.config().endpoint_url(path)?;
        Ok(self.auth.http().request(method, url))
    }

    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.url().path()))]
    pub async fn send(&self, mut request: Request) -> Result<Response, ApiError> {
        if self.auth.config().is_auth_endpoint(request.url()) {
            let snapshot = self.auth.snapshot();
            attach_credentials(
                request.headers_mut(),
                snapshot.token.as_ref(),
                snapshot.session_id.as_ref(),
            )?;
            return Ok(self.auth.http().execute(request).await?);
        }

        if self.auth.is_session_closed() {
            return Err(ApiError::SessionClosed);
        }
        self.refresh_if_expiring().await?;

        let retry = request.try_clone();
        let sent_with = self.auth.current_token();
        let session_id = self.auth.session_id();
        attach_credentials(request.headers_mut(), sent_with.as_ref(), session_id.as_ref())?;

        let response = self.auth.http().execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry) = retry else {
            warn!("Unauthorized response for a request that cannot be replayed");
            return Err(ApiError::NotReplayable);
        };

        let token = self.renewed_token(sent_with.as_ref()).await?;
        let session_id = self.auth.session_id();
        attach_credentials(retry.headers_mut(), Some(&token), session_id.as_ref())?;

        debug!("Retrying with renewed token");
        let response = self.auth.http().execute(retry).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Retried request still unauthorized");
            return Err(ApiError::Unauthorized);
        }

        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::GET, path)?.build()?;
        json_body(self.send(request).await?).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path)?.json(body).build()?;
        json_body(self.send(request).await?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::PUT, path)?.json(body).build()?;
        json_body(self.send(request).await?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, path)?.build()?;
        error_for_status(self.send(request).await?).await?;
        Ok(())
    }

    /// Token to retry a 401 with. If the token the request went out with has
    /// already been replaced, the replacement is used as is; otherwise this
    /// waits on the shared refresh.
    async fn renewed_token(&self, sent_with: Option<&AuthToken>) -> Result<AuthToken, ApiError> {
        let current = self.auth.current_token();
        match (sent_with, current) {
            (_, None) => Err(ApiError::Unauthorized),
            (None, Some(current)) => Ok(current),
            (Some(sent), Some(current)) if sent != &current => {
                debug!("Token already renewed since the request was sent");
                Ok(current)
            }
            _ => self
                .auth
                .refresh_token()
                .await
                .map_err(ApiError::SessionExpired),
        }
    }

    async fn refresh_if_expiring(&self) -> Result<(), ApiError> {
        let leeway = i64::try_from(self.auth.config().refresh_leeway.as_secs()).unwrap_or(i64::MAX);
        if leeway == 0 || !self.auth.is_authenticated() || !self.auth.is_token_expiring_soon(leeway) {
            return Ok(());
        }

        debug!("Token about to expire, refreshing before sending");
        self.auth
            .refresh_token()
            .await
            .map(drop)
            .map_err(ApiError::SessionExpired)
    }
}

async fn error_for_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, message })
}

async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    Ok(error_for_status(response).await?.json::<T>().await?)
}
