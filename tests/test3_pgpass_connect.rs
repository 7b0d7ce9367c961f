#![cfg(feature = "test-utils")]

use std::io::Write;

use pg_txn_middleware::bootstrap::{RetryPolicy, TokioSleeper, connect_with};
use pg_txn_middleware::pgpass;
use pg_txn_middleware::prelude::*;
use pg_txn_middleware::test_utils::setup_postgres_embedded;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::test]
async fn test3_connect_from_pgpass_entry() -> TestResult {
    let pg = setup_postgres_embedded("pgpass_db").await?;
    let real = &pg.config;

    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "# generated for this test")?;
    writeln!(file, "elsewhere.example:5432:other:nobody:nothing")?;
    writeln!(
        file,
        "{}:{}:{}:{}:{}",
        real.host,
        real.port,
        real.database,
        real.user,
        real.password.replace('\\', "\\\\").replace(':', "\\:")
    )?;

    let entry = pgpass::lookup_in(file.path(), &real.host, None)?
        .ok_or("pgpass entry not found")?;
    let config = entry.to_config()?.with_fail_fast(true);
    assert_eq!(config.port, real.port);

    let policy = RetryPolicy::for_config(&config);
    let mut conn = connect_with(&config, &policy, &TokioSleeper).await?;
    let row = conn
        .select("SELECT current_database() AS db", &[])
        .await?
        .into_first()
        .ok_or(TxMiddlewareError::NoRows)?;
    assert_eq!(row.get("db").and_then(RowValues::as_text), Some("pgpass_db"));

    drop(conn);
    pg.stop().await
}
