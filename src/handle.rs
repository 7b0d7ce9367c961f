//! The seam between the transaction state machine and the database driver.
//!
//! [`RawHandle`] is the pooled, non-transactional side of a session; [`TxHandle`] is one
//! open native transaction. The Postgres implementations live in [`crate::postgres`].

use async_trait::async_trait;

use crate::error::TxMiddlewareError;
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::RowValues;

/// A database handle able to open native transactions and run ad-hoc reads.
#[async_trait]
pub trait RawHandle: Send + Sync {
    /// The native transaction type produced by [`RawHandle::begin`].
    type Tx: TxHandle;

    /// Open a native transaction.
    async fn begin(&self) -> Result<Self::Tx, TxMiddlewareError>;

    /// Run a parameterized read outside of any transaction.
    async fn select(
        &self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError>;

    /// Placeholder syntax this handle's dialect expects.
    fn placeholder_style(&self) -> PlaceholderStyle;
}

/// One open native transaction.
#[async_trait]
pub trait TxHandle: Send {
    /// Commit, consuming the transaction.
    async fn commit(self) -> Result<(), TxMiddlewareError>;

    /// Roll back, consuming the transaction.
    async fn rollback(self) -> Result<(), TxMiddlewareError>;

    /// Execute a parameterized statement and return the affected row count.
    async fn execute(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, TxMiddlewareError>;

    /// Execute one or more unparameterized statements.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), TxMiddlewareError>;

    /// Run a parameterized read inside the transaction.
    async fn select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError>;

    fn placeholder_style(&self) -> PlaceholderStyle;
}
