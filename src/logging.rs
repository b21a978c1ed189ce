//! Log setup shared by the binaries.

use crate::{Result, SyncError};
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// Where log lines go when no log file is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    /// standard output.
    Stdout,
    /// standard error, keeps stdout free for program output.
    Stderr,
}

/// Split a log file path into its directory and file name.
///
/// A bare file name lives in the current directory.
pub fn log_file_parts(path: &str) -> Result<(PathBuf, String)> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            SyncError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid log path {:?}", path),
            ))
        })?;
    let dir_name = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir_name, file_name.to_string()))
}

/// Install the global tracing subscriber.
///
/// Logs go to a daily rolling file at `log_path`, or to `console` when it's None.  Lines are
/// written by a background thread, keep the returned guard alive until the program ends, and
/// drop it before exiting so buffered lines are flushed.
pub fn init_logging(log_path: Option<&str>, console: Console) -> Result<WorkerGuard> {
    let (non_blocking, guard) = match log_path {
        Some(path) => {
            let (dir_name, file_name) = log_file_parts(path)?;
            let file_appender = tracing_appender::rolling::daily(dir_name, file_name);
            tracing_appender::non_blocking(file_appender)
        }
        None => match console {
            Console::Stdout => tracing_appender::non_blocking(io::stdout()),
            Console::Stderr => tracing_appender::non_blocking(io::stderr()),
        },
    };
    tracing_subscriber::fmt().with_writer(non_blocking).init();
    Ok(guard)
}
