//! Statement routing: reads go to whichever context is active, writes need a transaction.

use std::borrow::Cow;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Connection;
use crate::error::TxMiddlewareError;
use crate::handle::{RawHandle, TxHandle};
use crate::results::{CustomDbRow, ResultSet};
use crate::translation::{bind_named, rebind};
use crate::types::RowValues;

impl<H: RawHandle> Connection<H> {
    /// Run a read inside the open transaction, or directly on the handle when idle.
    ///
    /// # Errors
    /// Driver errors, unchanged.
    pub async fn select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        match self.state.tx_mut() {
            Some(tx) => tx.select(query, params).await,
            None => self.handle.select(query, params).await,
        }
    }

    /// [`Connection::select`] that gives up when `cancel` fires.
    ///
    /// Cancellation never touches the transaction state: an open transaction stays open
    /// and must still be committed or rolled back by the caller.
    ///
    /// # Errors
    /// `Cancelled` if the token fires first, otherwise as [`Connection::select`].
    pub async fn select_cancellable(
        &mut self,
        cancel: &CancellationToken,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TxMiddlewareError::Cancelled),
            res = self.select(query, params) => res,
        }
    }

    /// [`Connection::select`] bounded by a deadline.
    ///
    /// # Errors
    /// `Timeout` if the read does not finish within `limit`, otherwise as
    /// [`Connection::select`].
    pub async fn select_with_timeout(
        &mut self,
        limit: Duration,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        tokio::time::timeout(limit, self.select(query, params))
            .await
            .map_err(|_| TxMiddlewareError::Timeout)?
    }

    /// Execute a write inside the open transaction and return the affected row count.
    ///
    /// # Errors
    /// Driver errors, unchanged.
    ///
    /// # Panics
    /// Panics if no transaction is open: writes outside an explicit transaction are a
    /// programming error.
    pub async fn execute(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, TxMiddlewareError> {
        self.require_tx().execute(query, params).await
    }

    /// Execute a write that uses `:name` parameters.
    ///
    /// # Errors
    /// `ParameterError` for a name missing from `params`; driver errors unchanged.
    ///
    /// # Panics
    /// Panics if no transaction is open.
    pub async fn execute_named(
        &mut self,
        query: &str,
        params: &[(&str, RowValues)],
    ) -> Result<usize, TxMiddlewareError> {
        let tx = self.require_tx();
        let (query, values) = bind_named(query, params)?;
        tx.execute(&query, &values).await
    }

    /// Execute one or more unparameterized statements inside the open transaction.
    ///
    /// # Errors
    /// Driver errors, unchanged.
    ///
    /// # Panics
    /// Panics if no transaction is open.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), TxMiddlewareError> {
        self.require_tx().execute_batch(sql).await
    }

    /// Run a statement inside the open transaction and return its first row.
    ///
    /// # Errors
    /// `NoRows` if the statement produced no rows; driver errors unchanged.
    ///
    /// # Panics
    /// Panics if no transaction is open.
    pub async fn query_row(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<CustomDbRow, TxMiddlewareError> {
        self.require_tx()
            .select(query, params)
            .await?
            .into_first()
            .ok_or(TxMiddlewareError::NoRows)
    }

    /// Rewrite `?` placeholders into the syntax of the active context.
    #[must_use]
    pub fn rebind<'q>(&self, query: &'q str) -> Cow<'q, str> {
        let style = match &self.state {
            super::state::TxState::Open { tx, .. } => tx.placeholder_style(),
            super::state::TxState::Idle => self.handle.placeholder_style(),
        };
        rebind(query, style)
    }

    fn require_tx(&mut self) -> &mut H::Tx {
        match self.state.tx_mut() {
            Some(tx) => tx,
            None => panic!(
                "{}: writes require an explicit transaction",
                TxMiddlewareError::TransactionNotStarted
            ),
        }
    }
}
