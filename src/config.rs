use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::TxMiddlewareError;
use crate::logging::LogSink;
use crate::postgres::{PgConnector, PgManager};

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// SSL/TLS mode, spelled the way libpq spells `sslmode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plaintext only.
    #[default]
    Disable,
    /// Encrypt, but accept whatever certificate the server presents.
    Require,
    /// Encrypt and check the certificate against the trust roots; ignore the hostname.
    VerifyCa,
    /// `VerifyCa` plus a hostname check.
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub fn requires_tls(self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl FromStr for SslMode {
    type Err = TxMiddlewareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(TxMiddlewareError::ConfigError(format!(
                "invalid sslmode '{s}': expected disable, require, verify-ca, or verify-full"
            ))),
        }
    }
}

/// Everything needed to bootstrap a [`Connection`](crate::Connection).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// PEM trust roots for the verifying modes; the system store when unset.
    #[serde(default)]
    pub ssl_root_cert: Option<PathBuf>,
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Return the first connection error instead of retrying forever.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub log_sink: LogSink,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl Config {
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        ssl_mode: SslMode,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port,
            database: database.into(),
            ssl_mode,
            ssl_root_cert: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            fail_fast: false,
            log_sink: LogSink::default(),
        }
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ssl_root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_root_cert = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    /// Load from `DB_USER`, `DB_PASS`, `DB_HOST`, `DB_PORT`, `DB_DATABASE`, and the optional
    /// `DB_SSLMODE`, `DB_SSLROOTCERT`, `DB_CONNECT_TIMEOUT` (seconds), `DB_FAIL_FAST`.
    ///
    /// # Errors
    /// `ConfigError` if a value is present but cannot be parsed.
    pub fn from_env() -> Result<Self, TxMiddlewareError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`Config::from_env`] over an arbitrary key lookup.
    ///
    /// Missing credentials and host fields become empty strings, matching what libpq does
    /// with unset variables; the server decides whether that is acceptable.
    ///
    /// # Errors
    /// `ConfigError` if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TxMiddlewareError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("DB_PORT") {
            Some(raw) => parse_port(&raw)?,
            None => DEFAULT_PORT,
        };
        let ssl_mode = match non_empty("DB_SSLMODE") {
            Some(raw) => raw.trim().parse()?,
            None => SslMode::default(),
        };
        let connect_timeout = match non_empty("DB_CONNECT_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| {
                    TxMiddlewareError::ConfigError(format!("invalid DB_CONNECT_TIMEOUT '{raw}': {e}"))
                })?,
            None => DEFAULT_CONNECT_TIMEOUT,
        };
        let fail_fast = match non_empty("DB_FAIL_FAST") {
            Some(raw) => parse_bool(&raw)?,
            None => false,
        };

        Ok(Self {
            user: get("DB_USER"),
            password: get("DB_PASS"),
            host: get("DB_HOST"),
            port,
            database: get("DB_DATABASE"),
            ssl_mode,
            ssl_root_cert: non_empty("DB_SSLROOTCERT").map(|raw| PathBuf::from(raw.trim())),
            connect_timeout,
            fail_fast,
            log_sink: LogSink::default(),
        })
    }

    /// libpq key/value connection string. Contains the password; do not log it.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let mut out = format!(
            "host={} port={} user={} dbname={} password={} sslmode={} connect_timeout={}",
            quote_value(&self.host),
            self.port,
            quote_value(&self.user),
            quote_value(&self.database),
            quote_value(&self.password),
            self.ssl_mode,
            self.connect_timeout.as_secs()
        );
        if let Some(path) = &self.ssl_root_cert {
            out.push_str(" sslrootcert=");
            out.push_str(&quote_value(&path.to_string_lossy()));
        }
        out
    }

    /// Driver configuration for this config.
    ///
    /// Every TLS mode maps to the driver's `Require`; certificate checks happen in the
    /// connector built by [`Config::manager`].
    #[must_use]
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.user(&self.user)
            .password(&self.password)
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .connect_timeout(self.connect_timeout)
            .ssl_mode(if self.ssl_mode.requires_tls() {
                tokio_postgres::config::SslMode::Require
            } else {
                tokio_postgres::config::SslMode::Disable
            });
        cfg
    }

    /// Pool manager with the connector `ssl_mode` calls for.
    ///
    /// # Errors
    /// `ConfigError` or `Io` if the TLS trust roots cannot be loaded.
    pub fn manager(&self) -> Result<PgManager, TxMiddlewareError> {
        let connector = PgConnector::for_mode(self.ssl_mode, self.ssl_root_cert.as_deref())?;
        Ok(PgManager::with_connector(self.to_pg_config(), connector))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("ssl_root_cert", &self.ssl_root_cert)
            .field("connect_timeout", &self.connect_timeout)
            .field("fail_fast", &self.fail_fast)
            .field("log_sink", &self.log_sink)
            .finish()
    }
}

pub(crate) fn parse_port(raw: &str) -> Result<u16, TxMiddlewareError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|e| TxMiddlewareError::ConfigError(format!("invalid port '{raw}': {e}")))
}

fn parse_bool(raw: &str) -> Result<bool, TxMiddlewareError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TxMiddlewareError::ConfigError(format!(
            "invalid boolean '{other}'"
        ))),
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn loads_from_environment_keys() {
        let cfg = Config::from_lookup(lookup(&[
            ("DB_USER", "bbb"),
            ("DB_PASS", "ccc"),
            ("DB_HOST", "db.example.org"),
            ("DB_PORT", "6543"),
            ("DB_DATABASE", "aaa"),
            ("DB_SSLMODE", "verify-full"),
            ("DB_FAIL_FAST", "true"),
        ]))
        .unwrap();

        assert_eq!(cfg.user, "bbb");
        assert_eq!(cfg.password, "ccc");
        assert_eq!(cfg.host, "db.example.org");
        assert_eq!(cfg.port, 6543);
        assert_eq!(cfg.database, "aaa");
        assert_eq!(cfg.ssl_mode, SslMode::VerifyFull);
        assert!(cfg.fail_fast);
        assert_eq!(cfg.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn defaults_apply_when_optional_keys_missing() {
        let cfg = Config::from_lookup(lookup(&[("DB_HOST", "localhost")])).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.ssl_mode, SslMode::Disable);
        assert!(!cfg.fail_fast);
        assert_eq!(cfg.log_sink, LogSink::Stderr);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("DB_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DB_SSLMODE", "prefer")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DB_FAIL_FAST", "maybe")])).is_err());
    }

    #[test]
    fn sslmode_round_trips_libpq_spelling() {
        for mode in ["disable", "require", "verify-ca", "verify-full"] {
            let parsed: SslMode = mode.parse().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = Config::new("u", "hunter2", "h", 5432, "d", SslMode::Disable);
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn connection_string_quotes_awkward_values() {
        let cfg = Config::new("u", "p w'x", "h", 5432, "d", SslMode::Require);
        assert_eq!(
            cfg.connection_string(),
            "host=h port=5432 user=u dbname=d password='p w\\'x' sslmode=require connect_timeout=5"
        );
    }

    #[test]
    fn pg_config_carries_fields() {
        let cfg = Config::new("u", "p", "h", 6000, "d", SslMode::VerifyCa);
        let pg = cfg.to_pg_config();
        assert_eq!(pg.get_user(), Some("u"));
        assert_eq!(pg.get_dbname(), Some("d"));
        assert_eq!(pg.get_ports(), &[6000]);
        assert_eq!(pg.get_ssl_mode(), tokio_postgres::config::SslMode::Require);
    }

    #[test]
    fn root_cert_comes_from_environment() {
        let cfg = Config::from_lookup(lookup(&[
            ("DB_SSLMODE", "verify-ca"),
            ("DB_SSLROOTCERT", "/etc/pg/root.crt"),
        ]))
        .unwrap();
        assert_eq!(cfg.ssl_root_cert, Some(PathBuf::from("/etc/pg/root.crt")));
        assert!(cfg.connection_string().ends_with("sslrootcert=/etc/pg/root.crt"));
    }

    #[test]
    fn manager_connector_follows_ssl_mode() {
        let plain = Config::new("u", "p", "h", 5432, "d", SslMode::Disable);
        assert!(!plain.manager().unwrap().connector().is_tls());

        let encrypted = Config::new("u", "p", "h", 5432, "d", SslMode::Require);
        assert!(encrypted.manager().unwrap().connector().is_tls());

        let unreadable = Config::new("u", "p", "h", 5432, "d", SslMode::VerifyFull)
            .with_ssl_root_cert("/nonexistent/root.crt");
        assert!(unreadable.manager().is_err());
    }
}
