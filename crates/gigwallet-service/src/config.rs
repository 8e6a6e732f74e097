//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use gigwallet_core::DEFAULT_CURRENCY;

use crate::gateway::StripeClient;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. The in-memory store is used when absent.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10).
    pub database_max_connections: u32,

    /// HS256 secret for user JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience (default: "gigwallet").
    pub auth_audience: String,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe secret API key.
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API root (default: `https://api.stripe.com/v1`).
    pub stripe_api_base: String,

    /// Ledger currency (default: "usd").
    pub default_currency: String,

    /// Bound on a single gateway call, in seconds (default: 10).
    pub gateway_timeout_seconds: u64,

    /// Maximum webhook signature age, in seconds (default: 300).
    pub webhook_tolerance_seconds: i64,

    /// Cron expression of the billing sweep, with seconds (default: daily at 03:00).
    pub billing_schedule: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_audience: env_or("AUTH_AUDIENCE", defaults.auth_audience),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: env_or("STRIPE_API_BASE", defaults.stripe_api_base),
            default_currency: env_or("DEFAULT_CURRENCY", defaults.default_currency)
                .to_lowercase(),
            gateway_timeout_seconds: env_or(
                "GATEWAY_TIMEOUT_SECONDS",
                defaults.gateway_timeout_seconds,
            ),
            webhook_tolerance_seconds: env_or(
                "WEBHOOK_TOLERANCE_SECONDS",
                defaults.webhook_tolerance_seconds,
            ),
            billing_schedule: env_or("BILLING_SCHEDULE", defaults.billing_schedule),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// Bound on a single gateway call.
    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds)
    }
}

/// Read and parse an environment variable, falling back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

/// Stripe secrets from the first readable secrets file, else the environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secrets_dir = std::env::var("SECRETS_DIR").unwrap_or_else(|_| ".secrets".into());
    let candidates = [
        Path::new(&secrets_dir).join("stripe.json"),
        Path::new("../.secrets").join("stripe.json"),
    ];

    if let Some((path, secrets)) = candidates
        .iter()
        .find_map(|path| load_secrets_file::<StripeSecrets>(path).map(|s| (path, s)))
    {
        tracing::info!(path = %path.display(), "Loaded Stripe secrets from file");
        return (Some(secrets.api_key), secrets.webhook_secret);
    }

    tracing::debug!("No Stripe secrets file, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

fn load_secrets_file<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(secrets) => Some(secrets),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed secrets file");
            None
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            auth_audience: "gigwallet".into(),
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: StripeClient::BASE_URL.into(),
            default_currency: DEFAULT_CURRENCY.into(),
            gateway_timeout_seconds: 10,
            webhook_tolerance_seconds: StripeClient::DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            billing_schedule: "0 0 3 * * *".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = ServiceConfig::default();
        assert_eq!(config.default_currency, "usd");
        assert_eq!(config.gateway_timeout(), Duration::from_secs(10));
        assert_eq!(config.webhook_tolerance_seconds, 300);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn unreadable_secrets_file_is_skipped() {
        let missing = Path::new("/nonexistent/gigwallet/stripe.json");
        assert!(load_secrets_file::<StripeSecrets>(missing).is_none());
    }

    #[test]
    fn missing_setting_falls_back_to_default() {
        assert_eq!(env_or("GIGWALLET_TEST_UNSET_SETTING", 42_u32), 42);
    }
}
