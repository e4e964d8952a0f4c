//! Authentication middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::validate_access_token;
use super::INGEST_ROLES;
use crate::api::AppState;
use crate::db::MetaStore;

/// Authenticated tenant injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthTenant {
    /// Tenant id.
    pub tenant: Uuid,
    /// Roles granted to the credential.
    pub roles: Vec<String>,
}

impl AuthTenant {
    /// Whether the role set permits trace export and span reads.
    #[must_use]
    pub fn can_ingest(&self) -> bool {
        self.roles
            .iter()
            .any(|role| INGEST_ROLES.contains(&role.as_str()))
    }
}

/// Resolve an Authorization header value to a tenant.
///
/// Shared by the HTTP middleware and the gRPC interceptor.
pub async fn authenticate_header(
    meta: &dyn MetaStore,
    jwt_secret: &str,
    header: Option<&str>,
) -> Result<AuthTenant, AuthError> {
    let header = header.ok_or(AuthError::MissingAuthHeader)?;

    if let Some(key) = header.strip_prefix("ApiKey ") {
        let record = meta
            .find_api_key(&super::hash_api_key(key.trim()))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?
            .ok_or(AuthError::InvalidApiKey)?;
        return Ok(AuthTenant {
            tenant: record.tenant,
            roles: record.roles,
        });
    }

    if let Some(token) = header.strip_prefix("Bearer ") {
        let claims = validate_access_token(token.trim(), jwt_secret)?;
        let tenant: Uuid = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        return Ok(AuthTenant {
            tenant,
            roles: claims.roles,
        });
    }

    Err(AuthError::InvalidAuthHeader)
}

/// Middleware requiring an authenticated tenant with an ingest-capable role.
///
/// Injects [`AuthTenant`] into request extensions for handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let auth =
        authenticate_header(state.meta.as_ref(), &state.config.jwt_secret, header).await?;
    if !auth.can_ingest() {
        return Err(AuthError::PermissionDenied);
    }

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}

/// Extractor for the authenticated tenant in handlers.
impl<S> axum::extract::FromRequestParts<S> for AuthTenant
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_gate_accepts_any_ingest_role() {
        let base = AuthTenant {
            tenant: Uuid::nil(),
            roles: vec![],
        };
        assert!(!base.can_ingest());
        for role in ["trace", "developer", "admin"] {
            let auth = AuthTenant {
                tenant: Uuid::nil(),
                roles: vec!["viewer".into(), role.into()],
            };
            assert!(auth.can_ingest());
        }
        let viewer = AuthTenant {
            tenant: Uuid::nil(),
            roles: vec!["viewer".into()],
        };
        assert!(!viewer.can_ingest());
    }
}
