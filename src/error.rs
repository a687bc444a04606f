//! # Test Environment Error Types
//!
//! Structured errors for table cleanup, sandbox provisioning, readiness polling
//! and configuration loading.

use thiserror::Error;

/// Stage of sandbox provisioning that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    CreateDatabase,
    Connect,
}

impl std::fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningStage::CreateDatabase => write!(f, "create database"),
            ProvisioningStage::Connect => write!(f, "connect"),
        }
    }
}

/// Terminal failure states of a readiness poll.
///
/// The display strings are part of the contract: callers match on them to tell
/// "server refused" apart from "server never responded".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    /// The server answered but reported a failed load
    #[error("Failed to load blockchain")]
    Failed,

    /// Retry budget ran out before the server reported ready
    #[error("Server is not responding")]
    Exhausted,

    /// The caller aborted the poll
    #[error("Readiness poll cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum TestEnvError {
    #[error("Failed to clear database table: {table}: {source}")]
    TableClear {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to provision sandbox database {database} ({stage}): {message}")]
    Provisioning {
        database: String,
        stage: ProvisioningStage,
        message: String,
    },

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl TestEnvError {
    pub fn provisioning(
        database: impl Into<String>,
        stage: ProvisioningStage,
        message: impl Into<String>,
    ) -> Self {
        Self::Provisioning {
            database: database.into(),
            stage,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Name of the table or database the error is about, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            TestEnvError::TableClear { table, .. } => Some(table),
            TestEnvError::Provisioning { database, .. } => Some(database),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for TestEnvError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TestEnvError>;
