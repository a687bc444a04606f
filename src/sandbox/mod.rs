//! # Database Sandbox
//!
//! A disposable database for one test session.
//!
//! ## Lifecycle
//!
//! ```text
//! new()      -> Inactive   name registered for the final cleanup sweep
//! create()   -> Active     config repointed, database created, connected
//! destroy()  -> Inactive   disconnected, config restored
//! finalize()               (registry) every registered database dropped
//! ```
//!
//! The sandbox borrows the caller's [`DatabaseConfig`] mutably and edits its
//! `database` field in place, so nothing else can read the config while a
//! sandbox holds it. Dropping the database is deferred to the
//! [`CleanupRegistry`] so a sandbox can be inspected after its suite finishes.

pub mod registry;

pub use registry::{CleanupRegistry, CleanupReport};

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::database::{AdminError, DatabaseAdmin, DatabaseConnector};
use crate::error::{ProvisioningStage, Result, TestEnvError};
use crate::logging::{log_database_operation, DiagnosticLogger, TracingLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Config points at the database it was constructed with
    Inactive,
    /// Config points at the sandbox database and the connector is connected
    Active,
}

/// Collaborators shared by every sandbox in a harness
#[derive(Clone)]
pub struct SandboxServices {
    pub registry: CleanupRegistry,
    pub admin: Arc<dyn DatabaseAdmin>,
    pub connector: Arc<dyn DatabaseConnector>,
    pub logger: Arc<dyn DiagnosticLogger>,
}

impl SandboxServices {
    pub fn new(
        registry: CleanupRegistry,
        admin: Arc<dyn DatabaseAdmin>,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Self {
        Self {
            registry,
            admin,
            connector,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn DiagnosticLogger>) -> Self {
        self.logger = logger;
        self
    }
}

pub struct DatabaseSandbox<'a> {
    config: &'a mut DatabaseConfig,
    original_database_name: String,
    test_database_name: String,
    state: SandboxState,
    services: SandboxServices,
}

impl<'a> DatabaseSandbox<'a> {
    /// Register a sandbox over `config`.
    ///
    /// Without a `test_database_name` the sandbox reuses the configured
    /// database. The name is registered for cleanup immediately, and the
    /// registry's finalizer is installed if it has none yet.
    pub fn new(
        config: &'a mut DatabaseConfig,
        test_database_name: Option<&str>,
        services: &SandboxServices,
    ) -> Self {
        let original_database_name = config.database.clone();
        let test_database_name = test_database_name
            .map(str::to_string)
            .unwrap_or_else(|| original_database_name.clone());

        services.registry.register(test_database_name.clone());
        services.registry.install_finalizer(services.admin.clone());

        debug!(
            original = %original_database_name,
            sandbox = %test_database_name,
            "Sandbox registered"
        );

        Self {
            config,
            original_database_name,
            test_database_name,
            state: SandboxState::Inactive,
            services: services.clone(),
        }
    }

    /// Point the config at the sandbox database, create it and connect.
    ///
    /// An existing database with the sandbox name is reused. On failure the
    /// config is restored and the sandbox stays inactive; nothing is retried.
    pub async fn create(&mut self) -> Result<()> {
        if self.state == SandboxState::Active {
            return Ok(());
        }

        self.config.database = self.test_database_name.clone();

        match self
            .services
            .admin
            .create_database(&self.test_database_name)
            .await
        {
            Ok(()) => {}
            Err(AdminError::AlreadyExists { .. }) => {
                debug!(database = %self.test_database_name, "Sandbox database already exists, reusing it");
            }
            Err(e) => {
                self.restore_config();
                return Err(TestEnvError::provisioning(
                    &self.test_database_name,
                    ProvisioningStage::CreateDatabase,
                    e.to_string(),
                ));
            }
        }

        if let Err(e) = self.services.connector.connect(&*self.config).await {
            self.restore_config();
            return Err(TestEnvError::provisioning(
                &self.test_database_name,
                ProvisioningStage::Connect,
                e.to_string(),
            ));
        }

        if let Err(e) = self.services.connector.health_check().await {
            self.services.connector.disconnect().await;
            self.restore_config();
            return Err(TestEnvError::provisioning(
                &self.test_database_name,
                ProvisioningStage::Connect,
                format!("health check failed: {e}"),
            ));
        }

        self.state = SandboxState::Active;
        log_database_operation(
            "create_sandbox",
            Some(&self.test_database_name),
            None,
            "active",
            None,
        );
        Ok(())
    }

    /// Disconnect and point the config back at the original database.
    ///
    /// The sandbox database itself is left for the registry to drop. Safe to
    /// call more than once.
    pub async fn destroy(&mut self) {
        if self.state == SandboxState::Active {
            self.services.connector.disconnect().await;
        }

        self.services.logger.info(&format!(
            "restoring original database - {}",
            self.original_database_name
        ));
        self.restore_config();
        self.state = SandboxState::Inactive;
    }

    fn restore_config(&mut self) {
        self.config.database = self.original_database_name.clone();
    }

    pub fn config(&self) -> &DatabaseConfig {
        &*self.config
    }

    pub fn original_database_name(&self) -> &str {
        &self.original_database_name
    }

    pub fn test_database_name(&self) -> &str {
        &self.test_database_name
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SandboxState::Active
    }
}

impl Drop for DatabaseSandbox<'_> {
    fn drop(&mut self) {
        if self.state == SandboxState::Active {
            warn!(
                database = %self.test_database_name,
                "Sandbox dropped while active; restoring config but the connection stays open"
            );
            self.restore_config();
        }
    }
}

impl std::fmt::Debug for DatabaseSandbox<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSandbox")
            .field("original_database_name", &self.original_database_name)
            .field("test_database_name", &self.test_database_name)
            .field("state", &self.state)
            .finish()
    }
}

/// Fresh, lowercase database name: `<prefix>_<utc timestamp>_<8 hex chars>`
pub fn unique_database_name(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{timestamp}_{}", &suffix[..8]).to_lowercase()
}
