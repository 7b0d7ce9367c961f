//! Async Postgres connection layer with savepoint-based nested transactions.
//!
//! A [`Connection`] wraps a pooled `tokio-postgres` handle and tracks one native
//! transaction plus a stack of savepoints. Around it: environment configuration
//! ([`Config`]), a retrying bootstrapper ([`bootstrap`]), `.pgpass` lookup ([`pgpass`]),
//! and versioned SQL migrations ([`migrate`]).
//!
//! ```no_run
//! use pg_txn_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), TxMiddlewareError> {
//! let mut conn = Config::from_env()?.connect().await?;
//! conn.begin().await?;
//! conn.execute("INSERT INTO t (id) VALUES ($1)", &[RowValues::Int(1)]).await?;
//! conn.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod logging;
pub mod migrate;
pub mod pgpass;
pub mod postgres;
pub mod prelude;
pub mod results;
pub mod translation;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use bootstrap::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use config::{Config, SslMode};
pub use connection::Connection;
pub use error::TxMiddlewareError;
pub use handle::{RawHandle, TxHandle};
pub use migrate::{MigrationSource, Migrator};
pub use results::{CustomDbRow, ResultSet};
pub use translation::PlaceholderStyle;
pub use types::RowValues;
