//! gosdk-wrapper Core Library
//!
//! This crate provides the core functionality for gosdk-wrapper, a tool that
//! fetches, caches and runs Go SDKs. It includes:
//!
//! - Index parsing for the known Go SDK listing formats
//! - An HTTP loader with proxy, timeout and progress support
//! - Checksum verification (MD5, SHA-256, `x-goog-hash`)
//! - Archive extraction for zip, tar and tar.gz
//! - A lock-guarded SDK cache shared between processes
//! - A child process runner with log tees, timeouts and cancellation
//! - Folder deletion and permission housekeeping

pub mod config;
pub mod error;
pub mod folders;
pub mod process;
pub mod sdk;

// Re-exports for convenience
pub use config::{ExecSettings, FolderSettings, SdkSettings, Session, Settings};
pub use error::{GoSdkError, Result};

// Re-export SDK cache
pub use sdk::{
    release_abandoned_locks, ArchiveSource, ArtifactResolver, CacheExports, HttpLoader,
    LocalRepositoryResolver, SdkCache, SdkSpec,
};

// Re-export process runner
pub use process::{find_executable, run, EnvEdits, ExitStatusInfo, ProcessSpec};

// Re-export folder housekeeping
pub use folders::{delete_folders, make_writable_files, FileSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_exports_are_accessible() {
        fn _check_types(
            _settings: &Settings,
            _session: &Session,
            _cache: &SdkCache,
            _exports: &CacheExports,
            _spec: &ProcessSpec,
            _status: &ExitStatusInfo,
            _file_set: &FileSet,
            _resolver: &LocalRepositoryResolver,
        ) {
        }
    }
}
