#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Chain Test Environment
//!
//! Support layer for integration-testing a node that persists to PostgreSQL
//! and reports its boot progress over HTTP.
//!
//! ## Overview
//!
//! The crate prepares a safe, ready environment for a test suite; it does not
//! implement the server, its schema or any assertions. It covers three jobs:
//!
//! - **Table cleanup**: delete every row of a table between test cases
//! - **Database sandboxes**: a disposable database per test run, with a final
//!   best-effort sweep that drops every sandbox the run created
//! - **Readiness polling**: block until `GET /api/loader/status` reports the
//!   node loaded, with a fixed interval and a bounded retry budget
//!
//! ## Module Organization
//!
//! - [`cleaner`] - Table cleanup
//! - [`sandbox`] - Sandbox lifecycle and the cleanup registry
//! - [`readiness`] - Status endpoint polling
//! - [`environment`] - Harness root tying the pieces together
//! - [`database`] - Trait seams over PostgreSQL and their sqlx implementations
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # unit and mock-backed integration tests
//! DATABASE_URL=postgresql://... cargo test -- --ignored   # PostgreSQL-backed tests
//! ```

pub mod cleaner;
pub mod config;
pub mod database;
pub mod environment;
pub mod error;
pub mod logging;
pub mod readiness;
pub mod sandbox;

pub use cleaner::{clear_table, clear_tables};
pub use crate::config::{DatabaseConfig, ReadinessConfig, ServerConfig, TestEnvConfig};
pub use environment::TestEnvironment;
pub use error::{ProvisioningStage, ReadinessError, Result, TestEnvError};
pub use readiness::{HttpStatusProbe, LoaderStatus, ReadinessPoller, Ready, StatusProbe};
pub use sandbox::{
    unique_database_name, CleanupRegistry, CleanupReport, DatabaseSandbox, SandboxServices,
    SandboxState,
};
