use std::future::Future;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::{Client, NoTls};

use super::tls::PgConnector;
use crate::error::TxMiddlewareError;

const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// bb8 manager for Postgres clients.
#[derive(Clone)]
pub struct PgManager {
    config: tokio_postgres::Config,
    connector: PgConnector,
}

impl PgManager {
    /// A manager that connects in plaintext.
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self::with_connector(config, PgConnector::Plain)
    }

    #[must_use]
    pub fn with_connector(config: tokio_postgres::Config, connector: PgConnector) -> Self {
        Self { config, connector }
    }

    #[must_use]
    pub fn connector(&self) -> &PgConnector {
        &self.connector
    }

    /// Open one client outside any pool and check that it answers `SELECT 1`.
    ///
    /// # Errors
    /// The driver error from connecting or from the ping.
    pub async fn verify(&self) -> Result<(), TxMiddlewareError> {
        let client = ManageConnection::connect(self).await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Build a pool from this manager.
    ///
    /// The pool is built lazily; the first checkout is what actually reaches the server.
    /// Checkouts wait at most the configured connect timeout.
    #[must_use]
    pub fn build_pool(self) -> Pool<PgManager> {
        let checkout_timeout = self
            .config
            .get_connect_timeout()
            .copied()
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_CHECKOUT_TIMEOUT);
        Pool::builder()
            .connection_timeout(checkout_timeout)
            .build_unchecked(self)
    }
}

fn spawn_connection<S, T>(connection: tokio_postgres::Connection<S, T>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "postgres connection closed");
        }
    });
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        let connector = self.connector.clone();
        async move {
            tracing::debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                tls = connector.is_tls(),
                "postgres connect start"
            );
            let client = match connector {
                PgConnector::Plain => {
                    let (client, connection) = cfg.connect(NoTls).await?;
                    spawn_connection(connection);
                    client
                }
                PgConnector::Tls(tls) => {
                    let (client, connection) = cfg.connect(tls).await?;
                    spawn_connection(connection);
                    client
                }
            };
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}
