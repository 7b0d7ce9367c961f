use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection, RunError};
use tokio::runtime::Handle;

use super::manager::PgManager;
use super::query::{build_result_set, execute_on_client};
use crate::error::TxMiddlewareError;
use crate::handle::{RawHandle, TxHandle};
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::RowValues;

/// Pooled Postgres handle. Cloning shares the pool.
#[derive(Clone)]
pub struct PgHandle {
    pool: Pool<PgManager>,
    manager: PgManager,
}

impl PgHandle {
    /// A handle over a lazily built pool; nothing is contacted until the first checkout.
    #[must_use]
    pub fn new(manager: PgManager) -> Self {
        Self {
            pool: manager.clone().build_pool(),
            manager,
        }
    }

    /// A handle whose server has already answered one `SELECT 1`.
    ///
    /// # Errors
    /// The driver error from the verifying connect or ping.
    pub async fn connect(manager: PgManager) -> Result<Self, TxMiddlewareError> {
        manager.verify().await?;
        Ok(Self::new(manager))
    }

    /// Check a client out of the pool.
    ///
    /// bb8 reports every failed connect as a checkout timeout. When that happens one direct
    /// connect is attempted so the caller sees the driver's error instead.
    pub(crate) async fn checkout(
        &self,
    ) -> Result<PooledConnection<'static, PgManager>, TxMiddlewareError> {
        match self.pool.get_owned().await {
            Ok(conn) => Ok(conn),
            Err(RunError::User(err)) => Err(err.into()),
            Err(RunError::TimedOut) => match ManageConnection::connect(&self.manager).await {
                Err(err) => Err(err.into()),
                Ok(_) => Err(TxMiddlewareError::Pool(RunError::TimedOut)),
            },
        }
    }
}

#[async_trait]
impl RawHandle for PgHandle {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, TxMiddlewareError> {
        let conn = self.checkout().await?;
        conn.simple_query("BEGIN").await?;
        Ok(PgTx { conn: Some(conn) })
    }

    async fn select(
        &self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        let conn = self.checkout().await?;
        build_result_set(&conn, query, params).await
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }
}

/// An explicit `BEGIN` on a client checked out of the pool for the transaction's lifetime.
///
/// Dropping an unfinished transaction spawns a `ROLLBACK` on the current runtime before the
/// client goes back to the pool.
pub struct PgTx {
    conn: Option<PooledConnection<'static, PgManager>>,
}

async fn rollback_quietly(conn: &PooledConnection<'static, PgManager>) {
    if let Err(e) = conn.simple_query("ROLLBACK").await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

impl PgTx {
    fn conn(&self) -> Result<&PooledConnection<'static, PgManager>, TxMiddlewareError> {
        self.conn.as_ref().ok_or(TxMiddlewareError::TransactionNotStarted)
    }

    fn take_conn(&mut self) -> Result<PooledConnection<'static, PgManager>, TxMiddlewareError> {
        self.conn.take().ok_or(TxMiddlewareError::TransactionNotStarted)
    }

    async fn finish(mut self, sql: &str) -> Result<(), TxMiddlewareError> {
        let conn = self.take_conn()?;
        if let Err(err) = conn.simple_query(sql).await {
            // The client must not go back to the pool inside a transaction.
            rollback_quietly(&conn).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TxHandle for PgTx {
    /// Postgres answers `COMMIT` in an aborted transaction with a silent rollback, so the
    /// transaction is pinged first; an aborted one fails with `25P02` and is rolled back.
    async fn commit(mut self) -> Result<(), TxMiddlewareError> {
        if let Err(err) = self.conn()?.simple_query("SELECT 1").await {
            let conn = self.take_conn()?;
            tracing::debug!(error = %err, "commit refused, transaction is aborted");
            rollback_quietly(&conn).await;
            return Err(err.into());
        }
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<(), TxMiddlewareError> {
        self.finish("ROLLBACK").await
    }

    async fn execute(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, TxMiddlewareError> {
        execute_on_client(self.conn()?, query, params).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), TxMiddlewareError> {
        self.conn()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        build_result_set(self.conn()?, query, params).await
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            tracing::debug!("rolling back dropped postgres transaction");
            handle.spawn(async move {
                rollback_quietly(&conn).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn unreachable_manager() -> PgManager {
        // Nothing listens on port 1.
        let mut cfg = tokio_postgres::Config::new();
        cfg.host("127.0.0.1")
            .port(1)
            .user("u")
            .dbname("d")
            .connect_timeout(Duration::from_secs(1));
        PgManager::new(cfg)
    }

    #[tokio::test]
    async fn begin_reports_the_connect_error() {
        let handle = PgHandle::new(unreachable_manager());
        let err = handle.begin().await.err().unwrap();
        assert!(
            matches!(err, TxMiddlewareError::Postgres(_)),
            "expected a driver error, got {err:?}"
        );
    }

    #[tokio::test]
    async fn select_reports_the_connect_error() {
        let handle = PgHandle::new(unreachable_manager());
        let err = handle.select("SELECT 1", &[]).await.err().unwrap();
        assert!(matches!(err, TxMiddlewareError::Postgres(_)));
    }

    #[tokio::test]
    async fn verified_connect_fails_without_a_pool_timeout() {
        let started = std::time::Instant::now();
        let err = PgHandle::connect(unreachable_manager())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TxMiddlewareError::Postgres(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
