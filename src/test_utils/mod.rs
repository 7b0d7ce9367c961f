//! Embedded `PostgreSQL` for integration tests.

use postgresql_embedded::PostgreSQL;

use crate::config::{Config, SslMode};
use crate::connection::Connection;
use crate::error::TxMiddlewareError;
use crate::postgres::PgHandle;

/// A running embedded server plus the config that reaches its test database.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub config: Config,
}

/// Start an embedded server and create `database` on it.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, or the database cannot be
/// created.
pub async fn setup_postgres_embedded(
    database: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error + Send + Sync>> {
    let mut postgresql = PostgreSQL::default();
    postgresql.setup().await?;
    postgresql.start().await?;
    postgresql.create_database(database).await?;

    let settings = postgresql.settings();
    let config = Config::new(
        settings.username.clone(),
        settings.password.clone(),
        settings.host.clone(),
        settings.port,
        database,
        SslMode::Disable,
    )
    .with_fail_fast(true);
    tracing::info!(port = settings.port, database, "embedded postgres started");

    Ok(EmbeddedPostgres { postgresql, config })
}

impl EmbeddedPostgres {
    /// A fresh fail-fast [`Connection`] to the test database.
    ///
    /// # Errors
    /// Pool or driver errors from the first connection attempt.
    pub async fn connect(&self) -> Result<Connection<PgHandle>, TxMiddlewareError> {
        self.config.connect().await
    }

    /// Stop the server.
    ///
    /// # Errors
    /// Returns an error if the server does not shut down cleanly.
    pub async fn stop(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.postgresql.stop().await?;
        Ok(())
    }
}
