use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::executor::StatementExecutor;
use crate::config::DatabaseConfig;

/// The shared connection a sandbox opens and closes.
///
/// Implementations own whatever connection state they need; the sandbox only
/// sequences `connect` and `disconnect` around its config changes.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> Result<(), sqlx::Error>;

    /// Close the connection if one is open
    async fn disconnect(&self);

    /// Round-trip a trivial query over the open connection
    async fn health_check(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

pub(crate) fn connect_options(config: &DatabaseConfig, database: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(&config.password)
        .database(database)
}

/// Pool-backed connector for PostgreSQL
#[derive(Debug, Default)]
pub struct PgConnector {
    pool: Mutex<Option<PgPool>>,
}

impl PgConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool for the currently connected database
    pub fn pool(&self) -> Option<PgPool> {
        self.pool.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.pool.lock().is_some()
    }
}

#[async_trait]
impl DatabaseConnector for PgConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<(), sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(connect_options(config, &config.database))
            .await?;

        info!(database = %config.database, host = %config.host, "Connected to database");

        // Replacing an open pool closes the old one in the background
        if let Some(previous) = self.pool.lock().replace(pool) {
            tokio::spawn(async move { previous.close().await });
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!("Database pool closed");
        }
    }

    async fn health_check(&self) -> Result<(), sqlx::Error> {
        let pool = self.pool().ok_or(sqlx::Error::PoolClosed)?;
        let row = sqlx::query("SELECT 1 as health").fetch_one(&pool).await?;

        let health: i32 = row.get("health");
        if health != 1 {
            return Err(sqlx::Error::Protocol(format!(
                "health check returned {health}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for PgConnector {
    async fn execute_raw(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let pool = self.pool().ok_or(sqlx::Error::PoolClosed)?;
        pool.execute_raw(sql).await
    }
}
