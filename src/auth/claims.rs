use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of a user session token issued by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: Uuid,                 // user ID
    pub exp: usize,                // expires at (unix timestamp)
    pub aud: String,               // audience, "authenticated" for signed-in users
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Type of token minted by this service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    OrderAccess,
}

/// Payload of the token emailed with a finished order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,      // order ID
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}
