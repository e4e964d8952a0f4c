//! Bearer token validation.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Claims carried by an ingest token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Tenant id (UUID).
    pub sub: String,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Validate an HS256 access token and return its claims.
pub fn validate_access_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}
