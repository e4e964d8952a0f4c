//! Authentication for the ingest and span surfaces.
//!
//! Two machine credentials are accepted: `Authorization: ApiKey <key>`
//! (looked up by SHA-256 digest in the metadata store) and
//! `Authorization: Bearer <jwt>` (HS256, claims carry the tenant and roles).

pub mod error;
pub mod jwt;
pub mod middleware;

pub use error::{AuthError, AuthResult};
pub use middleware::{authenticate_header, require_auth, AuthTenant};

use sha2::{Digest, Sha256};

/// Roles allowed to export traces and read spans.
pub const INGEST_ROLES: [&str; 3] = ["trace", "developer", "admin"];

/// Digest an API key the way `api_keys.key_hash` stores it.
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_digest_is_stable_hex_sha256() {
        let digest = hash_api_key("tl_test_key");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_api_key("tl_test_key"));
        assert_ne!(digest, hash_api_key("tl_other_key"));
    }
}
