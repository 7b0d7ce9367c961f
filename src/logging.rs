//! `tracing` subscriber setup. The library itself only emits events; binaries and tests call
//! [`install`] once to see them.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriter;

use crate::error::TxMiddlewareError;

/// Where formatted log lines go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum LogSink {
    #[default]
    Stderr,
    Stdout,
    /// Append to a file, created if missing.
    File(PathBuf),
}

#[derive(Clone)]
enum Target {
    Stderr,
    Stdout,
    File(Arc<Mutex<File>>),
}

/// `MakeWriter` over a [`LogSink`].
#[derive(Clone)]
pub struct LogWriter {
    target: Target,
}

impl LogWriter {
    /// # Errors
    /// Io error if a file sink cannot be opened.
    pub fn new(sink: &LogSink) -> io::Result<Self> {
        let target = match sink {
            LogSink::Stderr => Target::Stderr,
            LogSink::Stdout => Target::Stdout,
            LogSink::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Target::File(Arc::new(Mutex::new(file)))
            }
        };
        Ok(Self { target })
    }
}

pub struct LogWriterGuard {
    target: Target,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            target: self.target.clone(),
        }
    }
}

fn poisoned() -> io::Error {
    io::Error::other("log file lock poisoned")
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.target {
            Target::Stderr => io::stderr().write_all(buf)?,
            Target::Stdout => io::stdout().write_all(buf)?,
            Target::File(file) => file.lock().map_err(|_| poisoned())?.write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.target {
            Target::Stderr => io::stderr().flush(),
            Target::Stdout => io::stdout().flush(),
            Target::File(file) => file.lock().map_err(|_| poisoned())?.flush(),
        }
    }
}

/// Install a global fmt subscriber writing to `sink`, filtered by `RUST_LOG` (default
/// `info`).
///
/// A second call is a no-op; whichever subscriber was installed first keeps running.
///
/// # Errors
/// Io error if a file sink cannot be opened.
pub fn install(sink: &LogSink) -> Result<(), TxMiddlewareError> {
    let writer = LogWriter::new(sink)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let with_ansi = matches!(sink, LogSink::Stderr | LogSink::Stdout);
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
