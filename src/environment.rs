//! # Test Environment
//!
//! Harness root for an integration test run. It owns the configuration and the
//! cleanup registry, and hands out sandboxes, readiness pollers and table cleanup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chain_testenv::TestEnvironment;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let env = TestEnvironment::setup()?;
//! let mut db_config = env.config().database.clone();
//!
//! let mut sandbox = env.unique_sandbox(&mut db_config);
//! sandbox.create().await?;
//! // ... load schema, start the server against sandbox.config() ...
//! env.wait_until_ready().await?;
//!
//! env.clear_table("blocks").await?;
//!
//! sandbox.destroy().await;
//! env.finalize().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cleaner;
use crate::config::{AdminStrategy, DatabaseConfig, TestEnvConfig};
use crate::database::{DatabaseAdmin, PgAdmin, PgConnector, ShellAdmin, StatementExecutor};
use crate::error::Result;
use crate::logging::{init_structured_logging, DiagnosticLogger};
use crate::readiness::{ReadinessPoller, Ready};
use crate::sandbox::{
    unique_database_name, CleanupRegistry, CleanupReport, DatabaseSandbox, SandboxServices,
};

/// Exit code used after a Ctrl-C triggered cleanup
const SIGINT_EXIT_CODE: i32 = 130;

pub struct TestEnvironment {
    config: TestEnvConfig,
    services: SandboxServices,
    executor: Arc<dyn StatementExecutor>,
}

impl TestEnvironment {
    /// Initialize logging, load configuration and build a PostgreSQL-backed harness
    pub fn setup() -> Result<Self> {
        init_structured_logging();
        let config = TestEnvConfig::load()?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: TestEnvConfig) -> Self {
        let admin: Arc<dyn DatabaseAdmin> = match config.sandbox.admin {
            AdminStrategy::Sql => Arc::new(PgAdmin::new(&config.database)),
            AdminStrategy::Shell => Arc::new(ShellAdmin::new(&config.database)),
        };
        let connector = Arc::new(PgConnector::new());

        info!(
            environment = %config.environment,
            server = %config.server.base_url(),
            admin = ?config.sandbox.admin,
            "Test environment ready"
        );

        let services = SandboxServices::new(CleanupRegistry::new(), admin, connector.clone());
        Self {
            config,
            services,
            executor: connector,
        }
    }

    /// Build a harness around caller-supplied collaborators
    pub fn with_services(
        config: TestEnvConfig,
        services: SandboxServices,
        executor: Arc<dyn StatementExecutor>,
    ) -> Self {
        Self {
            config,
            services,
            executor,
        }
    }

    pub fn config(&self) -> &TestEnvConfig {
        &self.config
    }

    pub fn registry(&self) -> &CleanupRegistry {
        &self.services.registry
    }

    pub fn logger(&self) -> &dyn DiagnosticLogger {
        self.services.logger.as_ref()
    }

    /// Sandbox over `config` named `test_database_name`, or the configured name
    pub fn sandbox<'a>(
        &self,
        config: &'a mut DatabaseConfig,
        test_database_name: Option<&str>,
    ) -> DatabaseSandbox<'a> {
        DatabaseSandbox::new(config, test_database_name, &self.services)
    }

    /// Sandbox with a freshly generated name from the configured prefix
    pub fn unique_sandbox<'a>(&self, config: &'a mut DatabaseConfig) -> DatabaseSandbox<'a> {
        let name = unique_database_name(&self.config.sandbox.name_prefix);
        self.sandbox(config, Some(&name))
    }

    /// Poller for `base_url`, defaulting to the configured server
    pub fn poller(&self, base_url: Option<&str>) -> Result<ReadinessPoller> {
        ReadinessPoller::http(base_url, &self.config.server, &self.config.readiness)
    }

    /// Wait for the configured server using the configured budget
    pub async fn wait_until_ready(&self) -> Result<Ready> {
        Ok(self.poller(None)?.wait_until_ready().await?)
    }

    pub async fn clear_table(&self, table: &str) -> Result<u64> {
        cleaner::clear_table(self.executor.as_ref(), Some(self.logger()), table).await
    }

    pub async fn clear_tables(&self, tables: &[&str]) -> Result<u64> {
        cleaner::clear_tables(self.executor.as_ref(), Some(self.logger()), tables).await
    }

    /// Drop every sandbox database registered so far.
    ///
    /// The shared connection is closed first. PostgreSQL refuses to drop a
    /// database with open sessions, and a sandbox that never called `destroy`
    /// still holds one.
    pub async fn finalize(&self) -> CleanupReport {
        self.services.connector.disconnect().await;
        self.services.registry.finalize().await
    }

    /// Run the cleanup sweep when the process receives Ctrl-C, then exit
    pub fn finalize_on_ctrl_c(&self) -> JoinHandle<()> {
        let registry = self.services.registry.clone();
        let connector = self.services.connector.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Unable to listen for Ctrl-C; signal cleanup disabled");
                return;
            }
            warn!("Interrupted, dropping sandbox databases before exit");
            connector.disconnect().await;
            registry.finalize().await;
            std::process::exit(SIGINT_EXIT_CODE);
        })
    }
}

impl std::fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEnvironment")
            .field("config", &self.config.debug_config())
            .field("registry", &self.services.registry)
            .finish()
    }
}
