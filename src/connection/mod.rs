//! A single logical database session with optional savepoint-based nesting.
//!
//! The first [`Connection::begin`] opens a native transaction. With nesting enabled, each
//! further `begin` pushes a savepoint named after the current stack length
//! (`savepoint_0`, `savepoint_1`, …); `commit` and `rollback` always act on the innermost
//! level, so the stack unwinds strictly last-in first-out.
//!
//! ```no_run
//! use pg_txn_middleware::prelude::*;
//!
//! # async fn demo(mut conn: Connection) -> Result<(), TxMiddlewareError> {
//! conn.enable_nested_transactions()?;
//! conn.begin().await?;
//! conn.execute("INSERT INTO t VALUES ($1)", &[RowValues::Int(6)]).await?;
//! conn.begin().await?; // SAVEPOINT savepoint_0
//! conn.execute("INSERT INTO t VALUES ($1)", &[RowValues::Int(7)]).await?;
//! conn.rollback().await?; // only 7 is discarded
//! conn.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! A `Connection` is single-writer: every mutating call takes `&mut self`. Share one across
//! tasks only behind your own lock.

mod router;
mod state;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::TxMiddlewareError;
use crate::handle::{RawHandle, TxHandle};
use crate::postgres::PgHandle;

use state::TxState;

/// Transaction-aware wrapper around a raw database handle.
pub struct Connection<H: RawHandle = PgHandle> {
    handle: H,
    state: TxState<H::Tx>,
    nested_transactions: bool,
}

/// Savepoint name for a given stack position. Deterministic so a depth always maps to the
/// same name.
#[must_use]
pub fn savepoint_name(index: usize) -> String {
    format!("savepoint_{index}")
}

impl<H: RawHandle> Connection<H> {
    #[must_use]
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            state: TxState::Idle,
            nested_transactions: false,
        }
    }

    /// The raw handle this connection owns.
    #[must_use]
    pub fn handle(&self) -> &H {
        &self.handle
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.is_open()
    }

    /// 0 when idle, 1 inside a top-level transaction, plus one per open savepoint.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    /// Open savepoint names, outermost first.
    #[must_use]
    pub fn savepoints(&self) -> &[String] {
        self.state.savepoints()
    }

    #[must_use]
    pub fn nested_transactions_enabled(&self) -> bool {
        self.nested_transactions
    }

    /// Allow `begin` inside an open transaction to create savepoints.
    ///
    /// # Errors
    /// `NestedTransactionsAlreadyEnabled` if nesting is already on.
    pub fn enable_nested_transactions(&mut self) -> Result<(), TxMiddlewareError> {
        if self.nested_transactions {
            return Err(TxMiddlewareError::NestedTransactionsAlreadyEnabled);
        }
        self.nested_transactions = true;
        Ok(())
    }

    /// Turn nesting off again. Refused while any savepoint is still open.
    ///
    /// # Errors
    /// `SavePointsStillOpen` if the savepoint stack is non-empty, otherwise
    /// `NestedTransactionsNotEnabled` if nesting is already off.
    pub fn disable_nested_transactions(&mut self) -> Result<(), TxMiddlewareError> {
        if !self.state.savepoints().is_empty() {
            return Err(TxMiddlewareError::SavePointsStillOpen);
        }
        if !self.nested_transactions {
            return Err(TxMiddlewareError::NestedTransactionsNotEnabled);
        }
        self.nested_transactions = false;
        Ok(())
    }

    /// Open a transaction, or a savepoint when one is already open and nesting is enabled.
    ///
    /// # Errors
    /// `TransactionAlreadyStarted` if a transaction is open and nesting is disabled; the
    /// driver error, unchanged, if `BEGIN` or `SAVEPOINT` fails. The savepoint stack only
    /// grows after the server has accepted the savepoint.
    pub async fn begin(&mut self) -> Result<(), TxMiddlewareError> {
        let TxState::Open { tx, savepoints } = &mut self.state else {
            let tx = self.handle.begin().await?;
            self.state = TxState::Open {
                tx,
                savepoints: Vec::new(),
            };
            tracing::debug!(depth = 1, "transaction started");
            return Ok(());
        };

        if !self.nested_transactions {
            return Err(TxMiddlewareError::TransactionAlreadyStarted);
        }

        let name = savepoint_name(savepoints.len());
        tx.execute_batch(&format!("SAVEPOINT {name}")).await?;
        savepoints.push(name);
        tracing::debug!(depth = savepoints.len() + 1, "savepoint created");
        Ok(())
    }

    /// Release the innermost savepoint, or commit the transaction when none are open.
    ///
    /// # Errors
    /// `TransactionNotStarted` when idle. `NestedTransactionsNotEnabled` if savepoints are
    /// open while nesting is off, which means the connection state is corrupt. Driver errors
    /// are returned unchanged; a failed `COMMIT` still ends the transaction.
    pub async fn commit(&mut self) -> Result<(), TxMiddlewareError> {
        match &mut self.state {
            TxState::Idle => Err(TxMiddlewareError::TransactionNotStarted),
            TxState::Open { tx, savepoints } => {
                let Some(name) = savepoints.last() else {
                    return self.finish(true).await;
                };
                if !self.nested_transactions {
                    tracing::error!(
                        savepoints = savepoints.len(),
                        "savepoints open while nested transactions are disabled"
                    );
                    return Err(TxMiddlewareError::NestedTransactionsNotEnabled);
                }
                tx.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
                    .await?;
                savepoints.pop();
                tracing::debug!(depth = savepoints.len() + 1, "savepoint released");
                Ok(())
            }
        }
    }

    /// Roll back to (and release) the innermost savepoint, or roll back the whole
    /// transaction when none are open.
    ///
    /// # Errors
    /// `TransactionNotStarted` when idle; driver errors unchanged. A savepoint stays on the
    /// stack if rolling back to it fails.
    pub async fn rollback(&mut self) -> Result<(), TxMiddlewareError> {
        match &mut self.state {
            TxState::Idle => Err(TxMiddlewareError::TransactionNotStarted),
            TxState::Open { tx, savepoints } => {
                let Some(name) = savepoints.last() else {
                    return self.finish(false).await;
                };
                tx.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}"))
                    .await?;
                tx.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
                    .await?;
                savepoints.pop();
                tracing::debug!(depth = savepoints.len() + 1, "rolled back to savepoint");
                Ok(())
            }
        }
    }

    /// Roll back level by level until no transaction is open.
    ///
    /// Stops at the first failure and leaves whatever depth was reached; this is a
    /// best-effort drain, not an atomic operation. Idle connections are left as they are.
    ///
    /// # Errors
    /// The first error returned by [`Connection::rollback`].
    pub async fn rollback_all(&mut self) -> Result<(), TxMiddlewareError> {
        while self.in_transaction() {
            self.rollback().await?;
        }
        Ok(())
    }

    async fn finish(&mut self, commit: bool) -> Result<(), TxMiddlewareError> {
        let Some(tx) = self.state.take_tx() else {
            return Err(TxMiddlewareError::TransactionNotStarted);
        };
        if commit {
            tx.commit().await?;
            tracing::debug!(depth = 0, "transaction committed");
        } else {
            tx.rollback().await?;
            tracing::debug!(depth = 0, "transaction rolled back");
        }
        Ok(())
    }
}

impl<H: RawHandle> std::fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("depth", &self.depth())
            .field("savepoints", &self.savepoints())
            .field("nested_transactions", &self.nested_transactions)
            .finish_non_exhaustive()
    }
}
