//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The MySQL password is wrapped in secrecy::SecretString to keep it out of logs.

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

/// Log output format for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!("unknown LOG_FORMAT '{other}'"))),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: SecretString,
    pub mysql_database: String,
    pub mysql_connection_limit: u32,
    pub redis_host: String,
    pub redis_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub otel_endpoint: Option<String>,
    /// Quiet period after the last registry event before assigning.
    pub debounce_interval: Duration,
    /// Cadence of the inventory change check.
    pub poll_interval: Duration,
    /// Pause before the first inventory load.
    pub startup_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mysql_host: required_var("MYSQL_HOST")?,
            mysql_port: parsed_var("MYSQL_PORT", 3306)?,
            mysql_user: required_var("MYSQL_USER")?,
            mysql_password: SecretString::from(required_var("MYSQL_PASSWORD")?),
            mysql_database: required_var("MYSQL_DATABASE")?,
            mysql_connection_limit: parsed_var("MYSQL_CONNECTION_LIMIT", 5)?,
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: parsed_var("REDIS_PORT", 6379)?,
            log_level: std::env::var("LOGLEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: match std::env::var("LOG_FORMAT") {
                Ok(s) => s.parse()?,
                Err(_) => LogFormat::Compact,
            },
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            debounce_interval: Duration::from_millis(parsed_var("DEBOUNCE_INTERVAL_MS", 10_000)?),
            poll_interval: Duration::from_millis(parsed_var(
                "INVENTORY_POLL_INTERVAL_MS",
                120_000,
            )?),
            startup_delay: Duration::from_millis(parsed_var("STARTUP_DELAY_MS", 1_000)?),
        })
    }

    /// Redis connection URL built from host and port.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ('{raw}'): {e}"))),
        Err(_) => Ok(default),
    }
}
