//! Convenient imports for common functionality.

pub use crate::bootstrap::{Backoff, RetryPolicy};
pub use crate::config::{Config, SslMode};
pub use crate::connection::Connection;
pub use crate::error::TxMiddlewareError;
pub use crate::migrate::{MigrationSource, Migrator};
pub use crate::postgres::PgHandle;
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::translation::{PlaceholderStyle, bind_named, rebind};
pub use crate::types::RowValues;
