use http::HeaderName;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION};

use crate::models::{AuthToken, SessionId};

pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Sets `Authorization: Bearer <token>` and the session id header, replacing
/// whatever a previous attempt put there.
pub fn attach_credentials(
    headers: &mut HeaderMap,
    token: Option<&AuthToken>,
    session_id: Option<&SessionId>,
) -> Result<(), InvalidHeaderValue> {
    match token {
        Some(token) => {
            let mut bearer = HeaderValue::try_from(format!("Bearer {}", token.as_str()))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
        }
        None => {
            headers.remove(AUTHORIZATION);
        }
    }

    match session_id {
        Some(session_id) => {
            headers.insert(SESSION_ID_HEADER, HeaderValue::try_from(session_id.as_str())?);
        }
        None => {
            headers.remove(SESSION_ID_HEADER);
        }
    }

    Ok(())
}
