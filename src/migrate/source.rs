use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TxMiddlewareError;

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)_(.*)\.(up|down)\.sql$").expect("migration file name pattern")
});

/// Where migration files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationSource {
    /// A directory of `<version>_<title>.up.sql` / `.down.sql` files.
    Directory(PathBuf),
    /// `(file name, contents)` pairs compiled into the binary, usually via `include_str!`.
    Embedded(&'static [(&'static str, &'static str)]),
}

impl MigrationSource {
    /// `file://<path>` or a plain path.
    ///
    /// # Errors
    /// `MigrationError` for any other URI scheme.
    pub fn from_uri(uri: &str) -> Result<Self, TxMiddlewareError> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(Self::Directory(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(TxMiddlewareError::MigrationError(format!(
                "unsupported migration source scheme '{scheme}'"
            )));
        }
        Ok(Self::Directory(PathBuf::from(uri)))
    }

    /// Every migration in the source, ascending by version.
    ///
    /// # Errors
    /// Io error if a directory cannot be read; `MigrationError` if two files claim the same
    /// version and direction.
    pub fn load(&self) -> Result<Vec<Migration>, TxMiddlewareError> {
        let mut by_version: BTreeMap<i64, Migration> = BTreeMap::new();
        match self {
            Self::Directory(dir) => {
                for (name, path) in sql_files(dir)? {
                    if let Some(parsed) = parse_file_name(&name)? {
                        let sql = fs::read_to_string(&path)?;
                        insert(&mut by_version, parsed, sql)?;
                    }
                }
            }
            Self::Embedded(files) => {
                for (name, sql) in *files {
                    if let Some(parsed) = parse_file_name(name)? {
                        insert(&mut by_version, parsed, (*sql).to_string())?;
                    }
                }
            }
        }
        Ok(by_version.into_values().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One version, with whichever of its up/down scripts exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub title: String,
    pub up: Option<String>,
    pub down: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedName {
    version: i64,
    title: String,
    direction: Direction,
}

fn sql_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, TxMiddlewareError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push((name.to_string(), entry.path()));
        }
    }
    Ok(files)
}

/// `None` for files that are not migrations at all.
fn parse_file_name(name: &str) -> Result<Option<ParsedName>, TxMiddlewareError> {
    let Some(caps) = FILE_NAME.captures(name) else {
        tracing::debug!(file = name, "ignoring non-migration file");
        return Ok(None);
    };
    let version = caps[1].parse::<i64>().map_err(|e| {
        TxMiddlewareError::MigrationError(format!("bad version in '{name}': {e}"))
    })?;
    let direction = if &caps[3] == "up" {
        Direction::Up
    } else {
        Direction::Down
    };
    Ok(Some(ParsedName {
        version,
        title: caps[2].to_string(),
        direction,
    }))
}

fn insert(
    by_version: &mut BTreeMap<i64, Migration>,
    parsed: ParsedName,
    sql: String,
) -> Result<(), TxMiddlewareError> {
    let migration = by_version
        .entry(parsed.version)
        .or_insert_with(|| Migration {
            version: parsed.version,
            title: parsed.title,
            up: None,
            down: None,
        });
    let slot = match parsed.direction {
        Direction::Up => &mut migration.up,
        Direction::Down => &mut migration.down,
    };
    if slot.is_some() {
        return Err(TxMiddlewareError::MigrationError(format!(
            "duplicate {:?} migration for version {}",
            parsed.direction, parsed.version
        )));
    }
    *slot = Some(sql);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        let parsed = parse_file_name("0001_create_accounts.up.sql").unwrap().unwrap();
        assert_eq!(
            parsed,
            ParsedName {
                version: 1,
                title: "create_accounts".into(),
                direction: Direction::Up,
            }
        );
        assert_eq!(
            parse_file_name("12_x.down.sql").unwrap().unwrap().direction,
            Direction::Down
        );
        assert!(parse_file_name("README.md").unwrap().is_none());
        assert!(parse_file_name("1_x.sideways.sql").unwrap().is_none());
        assert!(parse_file_name("99999999999999999999_x.up.sql").is_err());
    }

    #[test]
    fn embedded_pairs_and_sorts() {
        static FILES: &[(&str, &str)] = &[
            ("2_b.up.sql", "CREATE TABLE b ();"),
            ("1_a.up.sql", "CREATE TABLE a ();"),
            ("1_a.down.sql", "DROP TABLE a;"),
            ("notes.txt", "ignored"),
        ];
        let migrations = MigrationSource::Embedded(FILES).load().unwrap();
        let versions: Vec<i64> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, [1, 2]);
        assert_eq!(migrations[0].down.as_deref(), Some("DROP TABLE a;"));
        assert!(migrations[1].down.is_none());
    }

    #[test]
    fn duplicate_direction_is_rejected() {
        static FILES: &[(&str, &str)] = &[("1_a.up.sql", "x"), ("1_other.up.sql", "y")];
        let err = MigrationSource::Embedded(FILES).load().unwrap_err();
        assert!(matches!(err, TxMiddlewareError::MigrationError(_)));
    }

    #[test]
    fn directory_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_init.up.sql"), "CREATE TABLE t ();").unwrap();
        fs::write(dir.path().join("1_init.down.sql"), "DROP TABLE t;").unwrap();
        fs::create_dir(dir.path().join("2_dir.up.sql")).unwrap();

        let uri = format!("file://{}", dir.path().display());
        let migrations = MigrationSource::from_uri(&uri).unwrap().load().unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].title, "init");
    }

    #[test]
    fn uri_schemes() {
        assert_eq!(
            MigrationSource::from_uri("migrations").unwrap(),
            MigrationSource::Directory(PathBuf::from("migrations"))
        );
        assert!(MigrationSource::from_uri("s3://bucket/path").is_err());
    }
}
