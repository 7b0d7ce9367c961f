//! Credential lookup in a libpq password file (`~/.pgpass`).
//!
//! Each non-comment line is `hostname:port:database:username:password`; `\:` and `\\`
//! escape a literal colon or backslash.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, DEFAULT_PORT, SslMode, parse_port};
use crate::error::TxMiddlewareError;

const FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgpassEntry {
    pub hostname: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl PgpassEntry {
    /// Config for this entry. A `*` port falls back to 5432.
    ///
    /// # Errors
    /// `ConfigError` if the port field is neither `*` nor a valid port number.
    pub fn to_config(&self) -> Result<Config, TxMiddlewareError> {
        let port = if self.port == "*" {
            DEFAULT_PORT
        } else {
            parse_port(&self.port)?
        };
        Ok(Config::new(
            &self.username,
            &self.password,
            &self.hostname,
            port,
            &self.database,
            SslMode::default(),
        ))
    }
}

/// `$PGPASSFILE` if set, otherwise `$HOME/.pgpass`.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("PGPASSFILE").filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".pgpass"))
}

/// Parse password-file contents. Malformed lines are skipped with a warning.
#[must_use]
pub fn parse(contents: &str) -> Vec<PgpassEntry> {
    let mut entries = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let Ok([hostname, port, database, username, password]) =
            <[String; FIELDS]>::try_from(split_fields(line))
        else {
            tracing::warn!(line = idx + 1, "skipping malformed pgpass line");
            continue;
        };
        entries.push(PgpassEntry {
            hostname,
            port,
            database,
            username,
            password,
        });
    }
    entries
}

fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(FIELDS);
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Whether a pgpass `host` satisfies `query`: an exact match, or `query` is a bare name
/// that becomes `host` once `trusted_domain` is appended.
#[must_use]
pub fn host_matches(query: &str, host: &str, trusted_domain: Option<&str>) -> bool {
    if query == host {
        return true;
    }
    match trusted_domain {
        Some(domain) if !query.is_empty() => host
            .strip_suffix(domain)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|bare| bare == query),
        _ => false,
    }
}

/// First entry in `path` whose host matches `host_query`.
///
/// # Errors
/// Io error if the file cannot be read.
pub fn lookup_in(
    path: &Path,
    host_query: &str,
    trusted_domain: Option<&str>,
) -> Result<Option<PgpassEntry>, TxMiddlewareError> {
    let contents = fs::read_to_string(path)?;
    let found = parse(&contents)
        .into_iter()
        .find(|e| host_matches(host_query, &e.hostname, trusted_domain));
    tracing::debug!(host = host_query, found = found.is_some(), "pgpass lookup");
    Ok(found)
}

/// [`lookup_in`] on the [`default_path`], converted to a [`Config`].
///
/// # Errors
/// Io error if no password file location can be determined or the file cannot be read;
/// `ConfigError` if the matching entry has an invalid port.
pub fn lookup(
    host_query: &str,
    trusted_domain: Option<&str>,
) -> Result<Option<Config>, TxMiddlewareError> {
    let path = default_path().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "neither PGPASSFILE nor HOME is set",
        )
    })?;
    lookup_in(&path, host_query, trusted_domain)?
        .map(|entry| entry.to_config())
        .transpose()
}
