//! Database connection pool and health check.
//!
//! The controller only reads from MySQL; it owns no schema and runs no
//! migrations.

pub mod inventory;

use crate::config::Config;
use crate::error::Result;
use secrecy::ExposeSecret;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

/// Database handle. Owns the connection pool used by the inventory queries.
pub struct Db {
    pool: MySqlPool,
}

impl Db {
    /// Connect to MySQL and create a connection pool.
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.mysql_host)
            .port(config.mysql_port)
            .username(&config.mysql_user)
            .password(config.mysql_password.expose_secret())
            .database(&config.mysql_database);
        let pool = MySqlPoolOptions::new()
            .max_connections(config.mysql_connection_limit)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Connect with a `mysql://` URL (tests, ad-hoc tooling).
    pub async fn connect_url(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
