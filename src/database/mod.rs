//! # Database Collaborators
//!
//! Trait seams for everything the harness asks of PostgreSQL, with sqlx-backed
//! implementations.
//!
//! ## Key Components
//!
//! - [`connection`] - The shared connection a sandbox opens and closes
//! - [`admin`] - CREATE/DROP DATABASE, over SQL or the `createdb`/`dropdb` programs
//! - [`executor`] - Raw statement execution used by table cleanup

pub mod admin;
pub mod connection;
pub mod executor;

pub use admin::{AdminError, DatabaseAdmin, PgAdmin, ShellAdmin};
pub use connection::{DatabaseConnector, PgConnector};
pub use executor::StatementExecutor;
