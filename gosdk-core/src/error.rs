//! Error taxonomy shared by the cache, loader and process runner.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the public API.
pub type Result<T> = std::result::Result<T, GoSdkError>;

/// Typed failures surfaced to callers.
///
/// Every variant names the stage that failed and carries the offending
/// path, URL or exit code where one exists.
#[derive(Debug, Error)]
pub enum GoSdkError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("There is no cached Go SDK and the session is offline: {}", .0.display())]
    OfflineNoCache(PathBuf),

    #[error("Gave up waiting for lock {} after {waited:?}", path.display())]
    LockWaitExceeded { path: PathBuf, waited: Duration },

    #[error("Interrupted while {0}")]
    Interrupted(String),

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("{kind} checksum mismatch for {}: expected {expected}, actual {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        kind: String,
        expected: String,
        actual: String,
    },

    #[error("Can't recognize any Go SDK listing format in response from {0}")]
    IndexParseFailed(String),

    #[error("Can't find Go SDK archive for {base_name} at {site}")]
    SdkNotFound { base_name: String, site: String },

    #[error("Can't unpack archive {}: {source:#}", archive.display())]
    ExtractFailed {
        archive: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Can't move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Can't find executable '{name}' in {}", folder.display())]
    ExecutableNotFound { name: String, folder: PathBuf },

    #[error("File is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    #[error("Can't start process {}: {source}", command.display())]
    SpawnFailed {
        command: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Process timed out after {0:?}")]
    ProcessTimeout(Duration),

    #[error("Process exit code: {actual} (expected {expected})")]
    UnexpectedExitCode { expected: i32, actual: i32 },

    #[error("{} must be within the project directory {}", path.display(), root.display())]
    ProjectBoundaryViolation { path: PathBuf, root: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GoSdkError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Builds a download failure from a transport error.
    pub fn download(url: &str, err: impl std::fmt::Display) -> Self {
        Self::DownloadFailed {
            url: url.to_string(),
            status: None,
            reason: err.to_string(),
        }
    }
}
