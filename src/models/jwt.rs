// src/models/jwt.rs
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::jwt::decode_unverified;

/// The part of the access token payload the client cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub exp: i64,         // expiration time
    pub iat: Option<i64>, // issued at
}

/// A bearer token together with its decoded claims.
///
/// Expiry is always read from the token itself, so there is nothing that
/// can drift out of sync with the string that gets sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    access_token: String,
    claims: AccessClaims,
}

impl AuthToken {
    pub fn parse(access_token: impl Into<String>) -> Result<Self, jsonwebtoken::errors::Error> {
        let access_token = access_token.into();
        let claims = decode_unverified::<AccessClaims>(&access_token)?;

        Ok(Self {
            access_token,
            claims,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.access_token
    }

    pub fn claims(&self) -> &AccessClaims {
        &self.claims
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.claims.exp, 0).single()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.claims.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single())
    }

    /// `exp == now` already counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.claims.exp <= now.timestamp()
    }

    pub fn expires_within(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.claims.exp.saturating_sub(now.timestamp()) <= threshold.num_seconds()
    }
}
