use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pg_txn_middleware::logging::{self, LogSink};
use pg_txn_middleware::prelude::*;
use pg_txn_middleware::pgpass;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run Postgres migrations with DB_* environment config")]
struct Args {
    /// Migration directory, as a path or `file://` URI.
    #[arg(long, default_value = "migrations")]
    source: String,
    /// Overrides `DB_SSLMODE`.
    #[arg(long, value_enum)]
    sslmode: Option<SslMode>,
    /// PEM trust roots for `verify-ca` / `verify-full`. Overrides `DB_SSLROOTCERT`.
    #[arg(long)]
    sslrootcert: Option<PathBuf>,
    /// Exit on the first connection error instead of retrying.
    #[arg(long)]
    fail_fast: bool,
    /// Take credentials from the pgpass entry matching this host instead of `DB_*`.
    #[arg(long)]
    pgpass_host: Option<String>,
    /// Domain appended to a bare `--pgpass-host` when matching.
    #[arg(long, requires = "pgpass_host")]
    trusted_domain: Option<String>,
    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Apply all pending migrations.
    Up,
    /// Revert all applied migrations.
    Down,
    /// Print the current version.
    Version,
}

fn load_config(args: &Args) -> Result<Config, TxMiddlewareError> {
    let mut config = match &args.pgpass_host {
        Some(host) => pgpass::lookup(host, args.trusted_domain.as_deref())?.ok_or_else(|| {
            TxMiddlewareError::ConfigError(format!("no pgpass entry for host '{host}'"))
        })?,
        None => Config::from_env()?,
    };
    if let Some(mode) = args.sslmode {
        config.ssl_mode = mode;
    }
    if let Some(path) = &args.sslrootcert {
        config.ssl_root_cert = Some(path.clone());
    }
    if args.fail_fast {
        config.fail_fast = true;
    }
    if let Some(path) = &args.log {
        config.log_sink = LogSink::File(path.clone());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<(), TxMiddlewareError> {
    let config = load_config(&args)?;
    logging::install(&config.log_sink)?;
    tracing::debug!(?config, "loaded config");

    let conn = config.connect().await?;
    let migrator = conn.migrator(&MigrationSource::from_uri(&args.source)?)?;

    let outcome = match args.command {
        Command::Up => migrator.up().await,
        Command::Down => migrator.down().await,
        Command::Version => {
            match migrator.version().await? {
                Some((version, false)) => println!("{version}"),
                Some((version, true)) => println!("{version} (dirty)"),
                None => println!("no migration"),
            }
            Ok(())
        }
    };
    match outcome {
        Err(TxMiddlewareError::MigrationNoChange) => {
            println!("no change");
            Ok(())
        }
        other => other,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
