//! # Table Cleanup
//!
//! Deletes every row of a table between test cases. Table names are
//! interpolated into the statement as-is, so they must come from test code,
//! never from user input. This is destructive; point it at disposable data only.

use tracing::debug;

use crate::database::StatementExecutor;
use crate::error::{Result, TestEnvError};
use crate::logging::{log_error, DiagnosticLogger, StderrLogger};

/// Delete all rows from `table`, returning how many were removed.
///
/// On failure a diagnostic naming the table goes to `logger`, or to stderr when
/// no logger is given, and the database error is returned to the caller.
pub async fn clear_table<E>(
    executor: &E,
    logger: Option<&dyn DiagnosticLogger>,
    table: &str,
) -> Result<u64>
where
    E: StatementExecutor + ?Sized,
{
    match executor.execute_raw(&format!("DELETE FROM {table}")).await {
        Ok(rows) => {
            debug!(table = %table, rows_deleted = rows, "Cleared table");
            Ok(rows)
        }
        Err(source) => {
            let message = format!("Failed to clear database table: {table}");
            logger.unwrap_or(&StderrLogger).error(&message);
            log_error("cleaner", "clear_table", &source.to_string(), Some(table));
            Err(TestEnvError::TableClear {
                table: table.to_string(),
                source,
            })
        }
    }
}

/// Clear several tables in order, stopping at the first failure.
///
/// List child tables before their parents when foreign keys are involved.
pub async fn clear_tables<E>(
    executor: &E,
    logger: Option<&dyn DiagnosticLogger>,
    tables: &[&str],
) -> Result<u64>
where
    E: StatementExecutor + ?Sized,
{
    let mut total = 0;
    for table in tables {
        total += clear_table(executor, logger, table).await?;
    }
    Ok(total)
}
