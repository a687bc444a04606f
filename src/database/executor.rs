use async_trait::async_trait;
use sqlx::PgPool;

/// Anything that can run a raw, parameterless statement
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute `sql` and report the affected row count
    async fn execute_raw(&self, sql: &str) -> Result<u64, sqlx::Error>;
}

#[async_trait]
impl StatementExecutor for PgPool {
    async fn execute_raw(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::raw_sql(sql).execute(self).await?;
        Ok(result.rows_affected())
    }
}
