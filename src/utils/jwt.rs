use std::collections::HashSet;

use jsonwebtoken::{decode, errors::Error as JwtError, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;

/// Decodes a JWT payload without checking its signature or expiry.
///
/// The client holds no signing key; the backend verifies every request.
/// Only the structure and the presence of `exp` are enforced here.
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    decode::<T>(token, &DecodingKey::from_secret(&[]), &validation).map(|data| data.claims)
}
