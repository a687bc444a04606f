//! Creating and dropping whole databases.
//!
//! Names come from configuration or test code and are trusted; they are quoted
//! as identifiers but not otherwise validated.

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::connection::connect_options;
use crate::config::DatabaseConfig;

/// PostgreSQL `duplicate_database`
const DUPLICATE_DATABASE: &str = "42P04";

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("database {name} already exists")]
    AlreadyExists { name: String },

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Process-level database commands
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Create `name`; an existing database yields [`AdminError::AlreadyExists`]
    async fn create_database(&self, name: &str) -> Result<(), AdminError>;

    /// Drop `name`
    async fn drop_database(&self, name: &str) -> Result<(), AdminError>;
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Issues CREATE/DROP DATABASE over a connection to the maintenance database
#[derive(Debug, Clone)]
pub struct PgAdmin {
    options: PgConnectOptions,
}

impl PgAdmin {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            options: connect_options(config, &config.maintenance_database),
        }
    }

    async fn execute(&self, statement: &str) -> Result<(), sqlx::Error> {
        let mut conn = self.options.connect().await?;
        let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(statement)).await;
        conn.close().await?;
        result.map(|_| ())
    }
}

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn create_database(&self, name: &str) -> Result<(), AdminError> {
        debug!(database = %name, "CREATE DATABASE");
        match self
            .execute(&format!("CREATE DATABASE {}", quote_identifier(name)))
            .await
        {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) =>
            {
                Err(AdminError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_database(&self, name: &str) -> Result<(), AdminError> {
        debug!(database = %name, "DROP DATABASE");
        self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))
            .await?;
        Ok(())
    }
}

/// Runs the `createdb` / `dropdb` client programs.
///
/// Connection settings are passed through the standard libpq environment
/// variables so the programs reach the same server as the sandbox.
#[derive(Debug, Clone)]
pub struct ShellAdmin {
    config: DatabaseConfig,
}

impl ShellAdmin {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    async fn run(&self, program: &str, name: &str) -> Result<String, AdminError> {
        let output = Command::new(program)
            .arg(name)
            .env("PGHOST", &self.config.host)
            .env("PGPORT", self.config.port.to_string())
            .env("PGUSER", &self.config.username)
            .env("PGPASSWORD", &self.config.password)
            .output()
            .await
            .map_err(|source| AdminError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            Ok(stderr)
        } else {
            Err(AdminError::Command {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}

#[async_trait]
impl DatabaseAdmin for ShellAdmin {
    async fn create_database(&self, name: &str) -> Result<(), AdminError> {
        match self.run("createdb", name).await {
            Ok(_) => Ok(()),
            Err(AdminError::Command { stderr, .. }) if stderr.contains("already exists") => {
                Err(AdminError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn drop_database(&self, name: &str) -> Result<(), AdminError> {
        self.run("dropdb", name).await.map(|_| ())
    }
}
