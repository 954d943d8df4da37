use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Secret the auth provider signs user tokens with; also signs order access tokens.
    pub secret: String,
    pub audience: String,
    pub access_token_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub mcp_base_url: String,
    pub mock_mode: bool,
    pub order_lookup_retries: u32,
    pub order_lookup_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub service_role_key: String,
    pub public_base_url: String,
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub stripe: StripeConfig,
    pub email: EmailConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| get(key).with_context(|| format!("{} is required", key));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let app_port = or("APP_PORT", "8080");
        let jwt = JwtConfig {
            secret: required("SUPABASE_JWT_SECRET")?,
            audience: or("JWT_AUDIENCE", "authenticated"),
            access_token_ttl_hours: parse_or(&get, "ACCESS_TOKEN_TTL_HOURS", 24 * 7)?,
        };
        let storage = StorageConfig {
            endpoint: or("STORAGE_ENDPOINT", "http://localhost:9000"),
            bucket: or("STORAGE_BUCKET", "orbit-images"),
            access_key: or("STORAGE_ACCESS_KEY", ""),
            secret_key: or("STORAGE_SECRET_KEY", ""),
            region: or("STORAGE_REGION", "us-east-1"),
        };
        let stripe = StripeConfig {
            secret_key: or("STRIPE_SECRET_KEY", ""),
            webhook_secret: or("STRIPE_WEBHOOK_SECRET", ""),
            currency: or("STRIPE_CURRENCY", "usd").to_lowercase(),
            api_base: or("STRIPE_API_BASE", "https://api.stripe.com"),
        };
        let email = EmailConfig {
            api_key: or("RESEND_API_KEY", ""),
            from: or("EMAIL_FROM", "ORBIT <orders@orbit.local>"),
            api_base: or("RESEND_API_BASE", "https://api.resend.com"),
        };
        let pipeline = PipelineConfig {
            mcp_base_url: or("MCP_BASE_URL", "http://localhost:54321/functions/v1"),
            mock_mode: parse_or(&get, "MOCK_MODE", false)?,
            order_lookup_retries: parse_or(&get, "ORDER_LOOKUP_RETRIES", 3)?,
            order_lookup_delay_ms: parse_or(&get, "ORDER_LOOKUP_DELAY_MS", 2000)?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            service_role_key: required("SERVICE_ROLE_KEY")?,
            public_base_url: or("PUBLIC_BASE_URL", &format!("http://localhost:{}", app_port))
                .trim_end_matches('/')
                .to_string(),
            frontend_url: or("FRONTEND_URL", "http://localhost:5173")
                .trim_end_matches('/')
                .to_string(),
            jwt,
            storage,
            stripe,
            email,
            pipeline,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {} value `{}`: {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/orbit"),
        ("SUPABASE_JWT_SECRET", "jwt-secret"),
        ("SERVICE_ROLE_KEY", "service-key"),
    ];

    #[test]
    fn defaults_fill_optional_values() {
        let cfg = AppConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(cfg.jwt.audience, "authenticated");
        assert_eq!(cfg.jwt.access_token_ttl_hours, 168);
        assert_eq!(cfg.storage.bucket, "orbit-images");
        assert_eq!(cfg.stripe.currency, "usd");
        assert!(!cfg.pipeline.mock_mode);
        assert_eq!(cfg.pipeline.order_lookup_retries, 3);
        assert_eq!(cfg.public_base_url, "http://localhost:8080");
    }

    #[test]
    fn missing_required_key_is_reported() {
        let err = AppConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(err.to_string().contains("SERVICE_ROLE_KEY"));
    }

    #[test]
    fn invalid_number_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("ORDER_LOOKUP_RETRIES", "three"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("ORDER_LOOKUP_RETRIES"));
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let mut pairs = BASE.to_vec();
        pairs.push(("PUBLIC_BASE_URL", "https://api.orbit.test/"));
        pairs.push(("MOCK_MODE", "true"));
        let cfg = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.public_base_url, "https://api.orbit.test");
        assert!(cfg.pipeline.mock_mode);
    }
}
