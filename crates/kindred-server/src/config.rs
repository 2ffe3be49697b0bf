use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use kindred_gateway::{DuplicateWindows, GatewayConfig};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub gateway: GatewayConfig,
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = GatewayConfig::default();
        let windows = DuplicateWindows::default();

        let gateway = GatewayConfig {
            typing_timeout: Duration::from_secs(var_or(
                "KINDRED_TYPING_TIMEOUT_SECS",
                defaults.typing_timeout.as_secs(),
            )?),
            offline_clear_delay: Duration::from_millis(var_or(
                "KINDRED_OFFLINE_CLEAR_DELAY_MS",
                defaults.offline_clear_delay.as_millis() as u64,
            )?),
            duplicate_windows: DuplicateWindows {
                exact: Duration::from_secs(var_or("KINDRED_DUP_EXACT_WINDOW_SECS", windows.exact.as_secs())?),
                short_content: Duration::from_secs(var_or(
                    "KINDRED_DUP_SHORT_WINDOW_SECS",
                    windows.short_content.as_secs(),
                )?),
                short_content_max_chars: var_or("KINDRED_DUP_SHORT_MAX_CHARS", windows.short_content_max_chars)?,
                throttle: Duration::from_secs(var_or(
                    "KINDRED_DUP_THROTTLE_WINDOW_SECS",
                    windows.throttle.as_secs(),
                )?),
            },
            call_signals_per_minute: var_or("KINDRED_CALL_SIGNALS_PER_MINUTE", defaults.call_signals_per_minute)?,
            undo_window: Duration::from_secs(var_or("KINDRED_UNDO_WINDOW_SECS", defaults.undo_window.as_secs())?),
            ..defaults
        };

        Ok(Self {
            host: std::env::var("KINDRED_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: var_or("KINDRED_PORT", 3000)?,
            db_path: std::env::var("KINDRED_DB_PATH")
                .unwrap_or_else(|_| "kindred.db".into())
                .into(),
            jwt_secret: std::env::var("KINDRED_JWT_SECRET").unwrap_or_default(),
            gateway,
        })
    }

    pub fn has_usable_secret(&self) -> bool {
        !self.jwt_secret.is_empty() && !PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(secret: &str) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            db_path: PathBuf::from(":memory:"),
            jwt_secret: secret.into(),
            gateway: GatewayConfig::default(),
        }
    }

    #[test]
    fn placeholder_secrets_are_rejected() {
        assert!(!with_secret("").has_usable_secret());
        assert!(!with_secret("dev-secret-change-me").has_usable_secret());
        assert!(with_secret("f3a9c1e07b").has_usable_secret());
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let port: u16 = var_or("KINDRED_TEST_SURELY_UNSET_PORT", 3000).unwrap();
        assert_eq!(port, 3000);
    }
}
