//! Versioned SQL migrations.
//!
//! State lives in a single-row `schema_migrations (version, dirty)` table. A migration is
//! marked dirty before its script runs and clean afterwards, so a script that fails halfway
//! leaves the version dirty and blocks further runs until someone repairs it by hand.

mod source;

pub use source::{Direction, Migration, MigrationSource};

use tokio_postgres::Client;

use crate::connection::Connection;
use crate::error::TxMiddlewareError;
use crate::postgres::PgHandle;

/// Key for the session advisory lock held while migrating.
const LOCK_KEY: i64 = 0x7067_7478_6d69_6772;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations \
     (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)";

/// Runs migrations from one source against one pool.
pub struct Migrator {
    handle: PgHandle,
    migrations: Vec<Migration>,
}

impl Connection<PgHandle> {
    /// A [`Migrator`] sharing this connection's pool.
    ///
    /// Migrations run on their own pooled client, outside any transaction this connection
    /// has open.
    ///
    /// # Errors
    /// Errors from [`MigrationSource::load`].
    pub fn migrator(&self, source: &MigrationSource) -> Result<Migrator, TxMiddlewareError> {
        Migrator::new(self.handle().clone(), source)
    }
}

impl Migrator {
    /// # Errors
    /// Errors from [`MigrationSource::load`].
    pub fn new(handle: PgHandle, source: &MigrationSource) -> Result<Self, TxMiddlewareError> {
        let migrations = source.load()?;
        tracing::debug!(count = migrations.len(), "migrations loaded");
        Ok(Self { handle, migrations })
    }

    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Current `(version, dirty)`, or `None` before the first migration.
    ///
    /// # Errors
    /// Pool or driver errors, unchanged.
    pub async fn version(&self) -> Result<Option<(i64, bool)>, TxMiddlewareError> {
        let client = self.handle.checkout().await?;
        client.batch_execute(CREATE_TABLE).await?;
        read_version(&client).await
    }

    /// Apply every migration newer than the current version, oldest first.
    ///
    /// # Errors
    /// `MigrationNoChange` if nothing is pending; `MigrationDirty` if the current version
    /// is dirty; `MigrationError` if a pending version has no up script; driver errors
    /// from the scripts, unchanged.
    pub async fn up(&self) -> Result<(), TxMiddlewareError> {
        let mut client = self.handle.checkout().await?;
        lock(&client).await?;
        let res = self.run_up(&mut client).await;
        finish_locked(&client, res).await
    }

    /// Revert every applied migration, newest first.
    ///
    /// # Errors
    /// `MigrationNoChange` if nothing is applied; `MigrationDirty` if the current version is
    /// dirty; `MigrationError` if the current version is unknown to the source or a version
    /// has no down script; driver errors from the scripts, unchanged.
    pub async fn down(&self) -> Result<(), TxMiddlewareError> {
        let mut client = self.handle.checkout().await?;
        lock(&client).await?;
        let res = self.run_down(&mut client).await;
        finish_locked(&client, res).await
    }

    async fn run_up(&self, client: &mut Client) -> Result<(), TxMiddlewareError> {
        let current = clean_version(client).await?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| current.is_none_or(|v| m.version > v))
            .collect();
        if pending.is_empty() {
            return Err(TxMiddlewareError::MigrationNoChange);
        }

        for migration in pending {
            let sql = migration.up.as_deref().ok_or_else(|| {
                TxMiddlewareError::MigrationError(format!(
                    "no up migration for version {}",
                    migration.version
                ))
            })?;
            write_version(client, Some((migration.version, true))).await?;
            client.batch_execute(sql).await?;
            write_version(client, Some((migration.version, false))).await?;
            tracing::info!(
                version = migration.version,
                title = %migration.title,
                "migration applied"
            );
        }
        Ok(())
    }

    async fn run_down(&self, client: &mut Client) -> Result<(), TxMiddlewareError> {
        let Some(current) = clean_version(client).await? else {
            return Err(TxMiddlewareError::MigrationNoChange);
        };
        if !self.migrations.iter().any(|m| m.version == current) {
            return Err(TxMiddlewareError::MigrationError(format!(
                "no migration found for version {current}"
            )));
        }

        let applied: Vec<&Migration> = self
            .migrations
            .iter()
            .rev()
            .filter(|m| m.version <= current)
            .collect();
        for (idx, migration) in applied.iter().enumerate() {
            let sql = migration.down.as_deref().ok_or_else(|| {
                TxMiddlewareError::MigrationError(format!(
                    "no down migration for version {}",
                    migration.version
                ))
            })?;
            write_version(client, Some((migration.version, true))).await?;
            client.batch_execute(sql).await?;
            let previous = applied.get(idx + 1).map(|m| (m.version, false));
            write_version(client, previous).await?;
            tracing::info!(
                version = migration.version,
                title = %migration.title,
                "migration reverted"
            );
        }
        Ok(())
    }
}

async fn lock(client: &Client) -> Result<(), TxMiddlewareError> {
    client
        .execute("SELECT pg_advisory_lock($1)", &[&LOCK_KEY])
        .await?;
    Ok(())
}

/// Release the advisory lock, then return `res`. An error from the run wins over an error
/// from unlocking.
async fn finish_locked(
    client: &Client,
    res: Result<(), TxMiddlewareError>,
) -> Result<(), TxMiddlewareError> {
    let unlocked = client
        .execute("SELECT pg_advisory_unlock($1)", &[&LOCK_KEY])
        .await;
    res?;
    unlocked?;
    Ok(())
}

async fn read_version(client: &Client) -> Result<Option<(i64, bool)>, TxMiddlewareError> {
    let row = client
        .query_opt("SELECT version, dirty FROM schema_migrations LIMIT 1", &[])
        .await?;
    match row {
        Some(row) => Ok(Some((row.try_get(0)?, row.try_get(1)?))),
        None => Ok(None),
    }
}

/// Current version, refusing to go on from a dirty one.
async fn clean_version(client: &Client) -> Result<Option<i64>, TxMiddlewareError> {
    client.batch_execute(CREATE_TABLE).await?;
    match read_version(client).await? {
        Some((version, true)) => Err(TxMiddlewareError::MigrationDirty(version)),
        Some((version, false)) => Ok(Some(version)),
        None => Ok(None),
    }
}

async fn write_version(
    client: &mut Client,
    version: Option<(i64, bool)>,
) -> Result<(), TxMiddlewareError> {
    let tx = client.transaction().await?;
    tx.execute("DELETE FROM schema_migrations", &[]).await?;
    if let Some((version, dirty)) = version {
        tx.execute(
            "INSERT INTO schema_migrations (version, dirty) VALUES ($1, $2)",
            &[&version, &dirty],
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
