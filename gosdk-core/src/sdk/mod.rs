//! Go SDK acquisition.
//!
//! Everything between a version string and an unpacked SDK folder: index
//! parsing, downloads, checksum checks, archive extraction and the
//! lock-guarded cache that ties them together.

pub mod archive;
pub mod checksum;
pub mod hash_header;
pub mod http;
pub mod index;
pub mod platform;
pub mod progress;
pub mod resolver;
pub mod types;

// Cache orchestration
pub mod cache;
pub mod lock;

// Re-exports - types
pub use types::{safe_file_name, SdkFile, SdkRecord, SdkSite, SdkSpec};

// Re-exports - integrity
pub use checksum::ChecksumKind;
pub use hash_header::VendorHashHeader;

// Re-exports - network
pub use http::{
    ArchiveSource, DownloadProgress, HttpLoader, HttpOptions, ProxySettings, ResponseHeaders,
};

// Re-exports - archives
pub use archive::{ArchiveType, UnpackListener};

// Re-exports - artifacts
pub use resolver::{ArtifactCoordinate, ArtifactResolver, LocalRepositoryResolver};

// Re-exports - cache
pub use cache::{CacheExports, SdkCache};
pub use lock::{release_abandoned_locks, LockOptions, SlotLock};
