use thiserror::Error;

/// Errors produced by the connection layer.
///
/// Driver and pool errors are carried `transparent`ly so callers can still inspect
/// the server's SQLSTATE through [`tokio_postgres::Error::as_db_error`].
#[derive(Debug, Error)]
pub enum TxMiddlewareError {
    #[error("transaction not started")]
    TransactionNotStarted,

    #[error("transaction already started")]
    TransactionAlreadyStarted,

    #[error("nested transactions not enabled")]
    NestedTransactionsNotEnabled,

    #[error("nested transactions already enabled")]
    NestedTransactionsAlreadyEnabled,

    #[error("savepoints still open")]
    SavePointsStillOpen,

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Pool(#[from] bb8::RunError<tokio_postgres::Error>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("query returned no rows")]
    NoRows,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("no change")]
    MigrationNoChange,

    #[error("dirty database version {0}, fix and force version")]
    MigrationDirty(i64),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl TxMiddlewareError {
    /// True for the state-machine guard errors (as opposed to driver or I/O failures).
    #[must_use]
    pub fn is_guard_violation(&self) -> bool {
        matches!(
            self,
            Self::TransactionNotStarted
                | Self::TransactionAlreadyStarted
                | Self::NestedTransactionsNotEnabled
                | Self::NestedTransactionsAlreadyEnabled
                | Self::SavePointsStillOpen
        )
    }
}
