use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, TokenKind, UserClaims};
use crate::{config::JwtConfig, state::AppState};

pub const ACCESS_ISSUER: &str = "orbit";
pub const ACCESS_AUDIENCE: &str = "orbit-order-access";

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub user_audience: String,
    pub access_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        let JwtConfig {
            secret,
            audience,
            access_token_ttl_hours,
        } = cfg.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            user_audience: audience,
            access_ttl: Duration::from_secs((access_token_ttl_hours.max(1) as u64) * 3600),
        }
    }

    /// Validates a session token from the auth provider.
    pub fn verify_user(&self, token: &str) -> anyhow::Result<UserClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.user_audience));
        let data = decode::<UserClaims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "user token verified");
        Ok(data.claims)
    }

    pub fn sign_order_access(&self, order_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.access_ttl.as_secs() as i64);
        let claims = AccessClaims {
            sub: order_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: ACCESS_ISSUER.to_string(),
            aud: ACCESS_AUDIENCE.to_string(),
            kind: TokenKind::OrderAccess,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(%order_id, "order access token signed");
        Ok(token)
    }

    pub fn verify_order_access(&self, token: &str) -> anyhow::Result<AccessClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[ACCESS_AUDIENCE]);
        validation.set_issuer(&[ACCESS_ISSUER]);
        let data = decode::<AccessClaims>(token, &self.decoding, &validation)?;
        if data.claims.kind != TokenKind::OrderAccess {
            anyhow::bail!("not an order access token");
        }
        Ok(data.claims)
    }
}
