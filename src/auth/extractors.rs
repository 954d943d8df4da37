use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState};

/// Signed-in user, taken from a valid session bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Either another handler of this service (bearer = service key) or a signed-in user.
#[derive(Debug, Clone)]
pub enum Caller {
    Service,
    User(AuthUser),
}

impl Caller {
    /// Services may act on any order; users only on their own.
    pub fn ensure_owns(&self, owner: Uuid) -> Result<(), AppError> {
        match self {
            Caller::Service => Ok(()),
            Caller::User(u) if u.id == owner => Ok(()),
            Caller::User(_) => Err(AppError::Forbidden("order belongs to another user".into())),
        }
    }
}

fn bearer(parts: &Parts) -> Result<&str, AppError> {
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?;

    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .ok_or_else(|| AppError::Unauthorized("invalid auth scheme".into()))
}

fn user_from_token(keys: &JwtKeys, token: &str) -> Result<AuthUser, AppError> {
    match keys.verify_user(token) {
        Ok(claims) => Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
        }),
        Err(_) => {
            warn!("invalid or expired token");
            Err(AppError::Unauthorized("invalid or expired token".into()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        user_from_token(&JwtKeys::from_ref(state), token)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        if is_service_key(token, &state.config.service_role_key) {
            return Ok(Caller::Service);
        }
        user_from_token(&JwtKeys::from_ref(state), token).map(Caller::User)
    }
}

/// Service-to-service calls only.
pub struct ServiceCaller;

#[async_trait]
impl FromRequestParts<AppState> for ServiceCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        if is_service_key(token, &state.config.service_role_key) {
            Ok(ServiceCaller)
        } else {
            Err(AppError::Forbidden("service key required".into()))
        }
    }
}

fn keyed_digest(key: &str, value: &str) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(value.as_bytes());
    mac
}

/// Compares keyed digests of both sides.
fn is_service_key(token: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    let expected = keyed_digest(key, key).finalize().into_bytes();
    keyed_digest(key, token).verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_key_comparison() {
        assert!(is_service_key("svc-123", "svc-123"));
        assert!(!is_service_key("svc-124", "svc-123"));
        assert!(!is_service_key("svc", "svc-123"));
        assert!(!is_service_key("svc-1234", "svc-123"));
        assert!(!is_service_key("", ""));
    }

    #[test]
    fn ownership_rules() {
        let owner = Uuid::new_v4();
        assert!(Caller::Service.ensure_owns(owner).is_ok());
        let me = Caller::User(AuthUser { id: owner, email: None });
        assert!(me.ensure_owns(owner).is_ok());
        let other = Caller::User(AuthUser { id: Uuid::new_v4(), email: None });
        assert!(matches!(other.ensure_owns(owner), Err(AppError::Forbidden(_))));
    }
}
