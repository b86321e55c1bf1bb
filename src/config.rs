// src/config.rs
use log::LevelFilter;
use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MARKET_URL: &str = "https://api.coingecko.com/api/v3/";

#[derive(Debug, Error)]
#[error("Invalid value for {key}: '{value}'")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub market_url: String,
    pub market_api_key: Option<String>,
    pub market_top_n: u32,
    pub scylla_node: String,
    pub keyspace: String,
    pub bind_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub opening_balance: Decimal,
    pub reset_user: bool,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            market_url: DEFAULT_MARKET_URL.to_string(),
            market_api_key: None,
            market_top_n: 20,
            scylla_node: "127.0.0.1:9042".to_string(),
            keyspace: "crypto_wallet".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            username: "Customer".to_string(),
            password: "password".to_string(),
            opening_balance: Decimal::ONE_THOUSAND,
            reset_user: false,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let keyspace = lookup("SCYLLA_KEYSPACE").unwrap_or(defaults.keyspace);
        // Interpolated into CQL statements.
        if keyspace.is_empty()
            || !keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError {
                key: "SCYLLA_KEYSPACE",
                value: keyspace,
            });
        }

        Ok(Config {
            market_url: lookup("COIN_GECKO_BASE_URL").unwrap_or(defaults.market_url),
            market_api_key: lookup("COIN_GECKO_API_KEY").filter(|k| !k.is_empty()),
            market_top_n: parse(&lookup, "MARKET_TOP_N", defaults.market_top_n)?,
            scylla_node: lookup("SCYLLA_NODE").unwrap_or(defaults.scylla_node),
            keyspace,
            bind_addr: parse(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            username: lookup("WALLET_USERNAME").unwrap_or(defaults.username),
            password: lookup("WALLET_PASSWORD").unwrap_or(defaults.password),
            opening_balance: parse(&lookup, "WALLET_OPENING_BALANCE", defaults.opening_balance)?,
            reset_user: parse(&lookup, "WALLET_RESET", defaults.reset_user)?,
            log_level: parse(&lookup, "LOG_LEVEL", defaults.log_level)?,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
        None => Ok(default),
    }
}
