//! Configuration management for the box office.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Missing credentials are not an error here: the server falls back to the
//! in-memory collaborators and says so in the log.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and metrics servers
    pub server: ServerConfig,
    /// Order storage
    pub database: DatabaseConfig,
    /// Ticketing provider
    pub provider: ProviderConfig,
    /// Payment gateway
    pub payments: PaymentsConfig,
    /// Order lifecycle
    pub orders: OrdersConfig,
    /// Buyer confirmation email
    pub smtp: SmtpConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
}

/// Order storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` URL; `None` keeps orders in memory
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Ticketing provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL
    pub base_url: String,
    /// API key; `None` runs against the in-memory demo provider
    pub api_key: Option<String>,
    /// Bound on one issuance call, in seconds
    pub issuance_timeout_secs: u64,
    /// Background catalog refresh interval, in seconds
    pub inventory_refresh_secs: u64,
    /// Age after which a cached catalog is refetched on read, in seconds
    pub inventory_max_age_secs: u64,
}

/// Payment gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Stripe secret key; `None` uses the mock gateway
    pub stripe_secret_key: Option<String>,
    /// Connected merchant account receiving destination charges
    pub stripe_connected_account: Option<String>,
    /// Stripe API base URL
    pub stripe_base_url: String,
    /// Platform application fee, percent of the total
    pub platform_fee_percent: u32,
    /// Storefront URL for checkout redirects
    pub frontend_url: String,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Bound on session creation, in seconds
    pub session_timeout_secs: u64,
}

/// Order lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    /// Attempts after which a failure becomes permanent; `None` = unlimited
    pub max_issuance_attempts: Option<u32>,
}

/// SMTP configuration for buyer confirmations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host; `None` only logs confirmations
    pub host: Option<String>,
    /// Relay port (STARTTLS submission by default)
    pub port: u16,
    /// Login
    pub username: Option<String>,
    /// Password or app password
    pub password: Option<String>,
    /// Sender, `address` or `Name <address>`
    pub from: Option<String>,
}

impl SmtpConfig {
    /// Whether every setting needed to send mail is present
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.host.is_some() && self.username.is_some() && self.password.is_some() && self.from.is_some()
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secret = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse().ok());

        Self {
            server: ServerConfig {
                host: text("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8080),
                log_level: text("RUST_LOG", "info"),
                metrics_host: text("METRICS_HOST", "0.0.0.0"),
                metrics_port: parsed(&lookup, "METRICS_PORT", 9090),
            },
            database: DatabaseConfig {
                url: secret("DATABASE_URL"),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
            },
            provider: ProviderConfig {
                base_url: text("TICKETING_BASE_URL", "https://api.tickettailor.com/v1"),
                api_key: secret("TICKETING_API_KEY"),
                issuance_timeout_secs: parsed(&lookup, "ISSUANCE_TIMEOUT_SECS", 30),
                inventory_refresh_secs: parsed(&lookup, "INVENTORY_REFRESH_SECS", 60),
                inventory_max_age_secs: parsed(&lookup, "INVENTORY_MAX_AGE_SECS", 120),
            },
            payments: PaymentsConfig {
                stripe_secret_key: secret("STRIPE_SECRET_KEY"),
                stripe_connected_account: secret("STRIPE_CONNECTED_ACCOUNT"),
                stripe_base_url: text("STRIPE_BASE_URL", "https://api.stripe.com"),
                platform_fee_percent: parsed(&lookup, "PLATFORM_FEE_PERCENT", 10),
                frontend_url: text("FRONTEND_URL", "http://localhost:5173"),
                currency: text("CURRENCY", "usd").to_lowercase(),
                session_timeout_secs: parsed(&lookup, "PAYMENT_SESSION_TIMEOUT_SECS", 15),
            },
            orders: OrdersConfig {
                max_issuance_attempts: number("MAX_ISSUANCE_ATTEMPTS").filter(|limit| *limit > 0),
            },
            smtp: SmtpConfig {
                host: secret("SMTP_HOST"),
                port: parsed(&lookup, "SMTP_PORT", 587),
                username: secret("SMTP_USERNAME"),
                password: secret("SMTP_PASSWORD"),
                from: secret("SMTP_FROM"),
            },
        }
    }

    /// Address the HTTP server binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address the metrics exporter binds to
    #[must_use]
    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }
}

impl ProviderConfig {
    /// Issuance timeout as a `Duration`
    #[must_use]
    pub const fn issuance_timeout(&self) -> Duration {
        Duration::from_secs(self.issuance_timeout_secs)
    }

    /// Refresh interval as a `Duration`
    #[must_use]
    pub const fn inventory_refresh(&self) -> Duration {
        Duration::from_secs(self.inventory_refresh_secs)
    }

    /// Maximum catalog age as a `Duration`
    #[must_use]
    pub const fn inventory_max_age(&self) -> Duration {
        Duration::from_secs(self.inventory_max_age_secs)
    }
}

impl PaymentsConfig {
    /// Session creation timeout as a `Duration`
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.metrics_address(), "0.0.0.0:9090");
        assert!(config.database.url.is_none());
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.provider.issuance_timeout(), Duration::from_secs(30));
        assert_eq!(config.payments.platform_fee_percent, 10);
        assert_eq!(config.payments.currency, "usd");
        assert!(config.orders.max_issuance_attempts.is_none());
        assert_eq!(config.smtp.port, 587);
        assert!(!config.smtp.is_configured());
    }

    #[test]
    fn test_smtp_needs_every_setting() {
        let complete = [
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "secret"),
            ("SMTP_FROM", "Box Office <tickets@example.com>"),
        ];
        let config_all = config(&complete);
        assert!(config_all.smtp.is_configured());
        assert_eq!(config_all.smtp.port, 2525);

        let mut partial = complete.to_vec();
        partial.retain(|(key, _)| *key != "SMTP_PASSWORD");
        assert!(!config(&partial).smtp.is_configured());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config(&[
            ("PORT", "3000"),
            ("METRICS_PORT", "not-a-port"),
            ("TICKETING_API_KEY", "sk_live_abc"),
            ("STRIPE_SECRET_KEY", "   "),
            ("CURRENCY", "EUR"),
            ("MAX_ISSUANCE_ATTEMPTS", "5"),
        ]);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.provider.api_key.as_deref(), Some("sk_live_abc"));
        assert!(config.payments.stripe_secret_key.is_none());
        assert_eq!(config.payments.currency, "eur");
        assert_eq!(config.orders.max_issuance_attempts, Some(5));
    }

    #[test]
    fn test_zero_attempt_limit_means_unlimited() {
        assert!(config(&[("MAX_ISSUANCE_ATTEMPTS", "0")]).orders.max_issuance_attempts.is_none());
    }
}
