//! Shared fakes for integration tests that run without PostgreSQL.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use chain_testenv::config::{DatabaseConfig, TestEnvConfig};
use chain_testenv::database::{AdminError, DatabaseAdmin, DatabaseConnector, StatementExecutor};
use chain_testenv::logging::DiagnosticLogger;
use chain_testenv::{CleanupRegistry, SandboxServices, TestEnvironment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateDatabase(String),
    DropDatabase(String),
    Connect(String),
    Disconnect,
}

/// Records every admin/connector call in one ordered log.
///
/// Like PostgreSQL, it refuses to drop the database that is currently connected.
#[derive(Default)]
pub struct FakeServer {
    pub events: Mutex<Vec<Event>>,
    pub failing_drops: Mutex<Vec<String>>,
    pub connected: Mutex<Option<String>>,
}

impl FakeServer {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn drops(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::DropDatabase(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DatabaseAdmin for FakeServer {
    async fn create_database(&self, name: &str) -> Result<(), AdminError> {
        self.events
            .lock()
            .push(Event::CreateDatabase(name.to_string()));
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), AdminError> {
        self.events.lock().push(Event::DropDatabase(name.to_string()));
        if self.connected.lock().as_deref() == Some(name) {
            return Err(AdminError::Command {
                program: "dropdb".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("database \"{name}\" is being accessed by other users"),
            });
        }
        if self.failing_drops.lock().iter().any(|n| n == name) {
            return Err(AdminError::Command {
                program: "dropdb".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "database is being accessed by other users".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseConnector for FakeServer {
    async fn connect(&self, config: &DatabaseConfig) -> Result<(), sqlx::Error> {
        self.events
            .lock()
            .push(Event::Connect(config.database.clone()));
        *self.connected.lock() = Some(config.database.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.lock().take().is_some() {
            self.events.lock().push(Event::Disconnect);
        }
    }
}

/// In-memory tables keyed by name
#[derive(Default)]
pub struct FakeTables {
    pub rows: Mutex<HashMap<String, u64>>,
}

impl FakeTables {
    pub fn with(tables: &[(&str, u64)]) -> Self {
        let fake = Self::default();
        for (name, count) in tables {
            fake.rows.lock().insert(name.to_string(), *count);
        }
        fake
    }
}

#[async_trait]
impl StatementExecutor for FakeTables {
    async fn execute_raw(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let table = sql.trim_start_matches("DELETE FROM ");
        match self.rows.lock().get_mut(table) {
            Some(count) => Ok(std::mem::take(count)),
            None => Err(sqlx::Error::Protocol(format!(
                "relation \"{table}\" does not exist"
            ))),
        }
    }
}

#[derive(Default)]
pub struct CapturingLogger {
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl DiagnosticLogger for CapturingLogger {
    fn info(&self, message: &str) {
        self.infos.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

pub struct Harness {
    pub env: TestEnvironment,
    pub server: Arc<FakeServer>,
    pub tables: Arc<FakeTables>,
    pub logger: Arc<CapturingLogger>,
}

/// A TestEnvironment wired to fakes
pub fn harness(tables: &[(&str, u64)]) -> Harness {
    let server = Arc::new(FakeServer::default());
    let tables = Arc::new(FakeTables::with(tables));
    let logger = Arc::new(CapturingLogger::default());

    let services = SandboxServices::new(CleanupRegistry::new(), server.clone(), server.clone())
        .with_logger(logger.clone());
    let env = TestEnvironment::with_services(TestEnvConfig::default(), services, tables.clone());

    Harness {
        env,
        server,
        tables,
        logger,
    }
}
