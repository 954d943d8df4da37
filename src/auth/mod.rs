pub mod claims;
pub mod extractors;
pub mod jwt;

pub use extractors::{AuthUser, Caller, ServiceCaller};
pub use jwt::JwtKeys;
