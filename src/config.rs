use crate::error::{AppError, Result};

/// Smallest stake accepted by the wager engine, in currency units.
pub const MIN_BET_AMOUNT: f64 = 10.0;

/// Channel capacity for the write-behind queue and state change broadcasts.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Storage keys for the persisted records.
pub mod keys {
    /// Every account record lives under `user_<email>`.
    pub const ACCOUNT_PREFIX: &str = "user_";
    pub const SESSION: &str = "currentUser";
    pub const BETTING_OPTIONS: &str = "bettingOptions";
    pub const LIVE_STREAMS: &str = "liveStreams";
    pub const TRANSACTIONS: &str = "transactions";
    pub const BETS: &str = "bets";
    pub const CURRENCY_SETTINGS: &str = "currencySettings";

    pub fn account(email: &str) -> String {
        format!("{ACCOUNT_PREFIX}{email}")
    }
}

/// Defaults seeded when no currency settings have been persisted yet.
pub mod currency_defaults {
    pub const CURRENCY: &str = "PHP";
    pub const SYMBOL: &str = "₱";
    pub const MIN_DEPOSIT: f64 = 50.0;
    pub const MAX_DEPOSIT: f64 = 50_000.0;
    pub const MIN_WITHDRAW: f64 = 50.0;
    pub const MAX_WITHDRAW: f64 = 25_000.0;
    pub const GCASH_NUMBER: &str = "09123456789";
}

/// Stream defaults used when a stream is created from a betting option.
pub const DEFAULT_STREAM_QUALITY: &str = "720p";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Admin login name (ADMIN_USERNAME)
    pub admin_username: String,
    /// Admin password in plaintext (ADMIN_PASSWORD). Hashed once at startup.
    pub admin_password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "betting.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            admin_username: std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_uses_prefix() {
        assert_eq!(keys::account("a@b.com"), "user_a@b.com");
        assert!(keys::account("x").starts_with(keys::ACCOUNT_PREFIX));
    }
}
