//! # Test Environment Configuration
//!
//! Typed configuration for the database under test, the server's status
//! endpoint and the readiness poller.
//!
//! ## Sources
//!
//! Layered with the `config` crate, lowest precedence first:
//!
//! - Built-in defaults ([`TestEnvConfig::default`])
//! - An optional file: `config/testenv.{toml,yaml,json}` or an explicit path
//! - Environment variables prefixed `TESTENV`, nested with `__`
//!   (e.g. `TESTENV__SERVER__HTTP_PORT=5000`)
//! - `DATABASE_URL`, which replaces the database connection components
//!
//! ```rust,no_run
//! use chain_testenv::config::TestEnvConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TestEnvConfig::load()?;
//! println!("polling {}", config.server.base_url());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TestEnvError};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TestEnvConfig {
    /// Environment name (test, development, production)
    pub environment: String,

    /// Connection settings for the database under test
    pub database: DatabaseConfig,

    /// Where the server under test listens
    pub server: ServerConfig,

    /// Readiness poll budget
    pub readiness: ReadinessConfig,

    /// Sandbox naming and provisioning strategy
    pub sandbox: SandboxConfig,
}

impl Default for TestEnvConfig {
    fn default() -> Self {
        Self {
            environment: "test".to_string(),
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            readiness: ReadinessConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl TestEnvConfig {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<Self> {
        loader::ConfigLoader::new().load()
    }

    /// Load configuration from an explicit file plus the environment
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self> {
        loader::ConfigLoader::new().with_file(path.as_ref()).load()
    }

    /// Reject values that would make the harness misbehave silently
    pub fn validate(&self) -> Result<()> {
        if self.database.host.trim().is_empty() {
            return Err(TestEnvError::configuration("database.host must not be empty"));
        }
        if self.database.port == 0 {
            return Err(TestEnvError::configuration("database.port must be non-zero"));
        }
        if self.database.database.trim().is_empty() {
            return Err(TestEnvError::configuration(
                "database.database must not be empty",
            ));
        }
        if self.server.address.trim().is_empty() {
            return Err(TestEnvError::configuration("server.address must not be empty"));
        }
        if self.server.http_port == 0 {
            return Err(TestEnvError::configuration("server.http_port must be non-zero"));
        }
        if self.readiness.interval_ms == 0 {
            return Err(TestEnvError::configuration(
                "readiness.interval_ms must be non-zero",
            ));
        }
        Ok(())
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self);
        loader::sanitize_json_recursive(&mut value, &["password", "secret", "token"]);
        value
    }
}

/// PostgreSQL connection settings.
///
/// `database` is the field a [`crate::sandbox::DatabaseSandbox`] repoints while
/// it is active.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Database used for CREATE/DROP DATABASE statements
    pub maintenance_database: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "chain_test".to_string(),
            maintenance_database: "postgres".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL for the currently configured database
    pub fn database_url(&self) -> String {
        self.url_for(&self.database)
    }

    /// Connection URL for the maintenance database
    pub fn maintenance_url(&self) -> String {
        self.url_for(&self.maintenance_database)
    }

    fn url_for(&self, database: &str) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, database
        )
    }

    /// Replace host, port, credentials and database name with the parts of a URL
    pub fn apply_url(&mut self, database_url: &str) -> Result<()> {
        let url = url::Url::parse(database_url)
            .map_err(|e| TestEnvError::configuration(format!("invalid DATABASE_URL: {e}")))?;

        if let Some(host) = url.host_str() {
            self.host = host.to_string();
        }
        if let Some(port) = url.port() {
            self.port = port;
        }
        if !url.username().is_empty() {
            self.username = url.username().to_string();
        }
        if let Some(password) = url.password() {
            self.password = password.to_string();
        }
        let database = url.path().trim_start_matches('/');
        if !database.is_empty() {
            self.database = database.to_string();
        }
        Ok(())
    }
}

/// Address of the server under test
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            http_port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.http_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub retries: u32,
    pub interval_ms: u64,
    /// Per-request timeout; unset leaves the transport default in place
    pub request_timeout_ms: Option<u64>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            interval_ms: 1000,
            request_timeout_ms: None,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// How sandbox databases are created and dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStrategy {
    /// CREATE/DROP DATABASE over a maintenance connection
    Sql,
    /// The `createdb` / `dropdb` client programs
    Shell,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub name_prefix: String,
    pub admin: AdminStrategy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name_prefix: "chain_test".to_string(),
            admin: AdminStrategy::Sql,
        }
    }
}
