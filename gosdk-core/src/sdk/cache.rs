//! The Go SDK cache: locate, download, verify, unpack and publish.
//!
//! `SdkCache` is the main entry point. It owns the store folder and keeps
//! one slot per SDK base name. A slot is only ever published complete: the
//! archive is unpacked into a scratch folder next to it and renamed into
//! place while the slot lock is held.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
#[cfg(unix)]
use walkdir::WalkDir;

use super::archive::{self, ArchiveType, UnpackListener};
use super::checksum::ChecksumKind;
use super::hash_header::VendorHashHeader;
use super::http::{ArchiveSource, DownloadProgress, SDK_INDEX_MIMES};
use super::index;
use super::lock::SlotLock;
use super::progress::draw_download_progress;
use super::resolver::{ArtifactCoordinate, ArtifactResolver};
use super::types::{safe_file_name, SdkFile, SdkSpec};
use crate::config::{SdkSettings, Session, DEFAULT_GO_PATH_FOLDER_NAME};
use crate::error::{GoSdkError, Result};
use crate::process::find_all_executables;

/// File name used for archives fetched from a direct link.
pub const DIRECT_LINK_FILE_NAME: &str = "directLinkGoSdk";

/// Name of the go tool looked up for [`CacheExports`].
pub const GO_COMMAND: &str = "go";

// ============================================================================
// Exports
// ============================================================================

/// Paths a cached SDK exposes to other build steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheExports {
    pub sdk_path: PathBuf,
    pub default_go_path: PathBuf,
    pub go_command_path: PathBuf,
}

impl CacheExports {
    /// `KEY`/value pairs suitable for printing as `KEY=value`.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("GOSDK_PATH", self.sdk_path.display().to_string()),
            ("GOSDK_DEFAULT_GOPATH", self.default_go_path.display().to_string()),
            ("GOSDK_GO_COMMAND", self.go_command_path.display().to_string()),
        ]
    }
}

// ============================================================================
// Archive Sources
// ============================================================================

/// Where the archive for a slot comes from.
#[derive(Debug)]
enum ArchiveLocation {
    Remote {
        url: String,
        file_name: String,
        record: Option<SdkFile>,
    },
    Local(PathBuf),
}

/// An archive on disk, ready to verify.
#[derive(Debug)]
struct ObtainedArchive {
    path: PathBuf,
    /// Downloaded by us, so ours to delete.
    temporary: bool,
    headers: Option<HeaderMap>,
    record: Option<SdkFile>,
}

#[derive(Debug, Default)]
struct LoggingListener {
    entries: usize,
}

impl UnpackListener for LoggingListener {
    fn on_archive_type(&mut self, archive_type: ArchiveType) {
        debug!("Archive type: {}", archive_type);
    }

    fn on_entry(&mut self, name: &str, size: Option<u64>) {
        match size {
            Some(size) => debug!("Archive entry: {} ({})", name, size),
            None => debug!("Archive entry: {}", name),
        }
        self.entries += 1;
    }

    fn on_completed(&mut self) {
        debug!("Completed decompressing");
    }
}

// ============================================================================
// SDK Cache
// ============================================================================

/// Keeps Go SDKs under a store folder, one slot per base name.
///
/// Safe to share between tasks and processes: every slot is guarded by a
/// [`SlotLock`].
pub struct SdkCache {
    settings: SdkSettings,
    store: PathBuf,
    source: Arc<dyn ArchiveSource>,
    resolver: Option<Arc<dyn ArtifactResolver>>,
    session: Session,
}

impl SdkCache {
    /// Creates a cache over the configured store folder.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Config`] if the store folder can't be determined.
    pub fn new(
        settings: SdkSettings,
        source: Arc<dyn ArchiveSource>,
        session: Session,
    ) -> Result<Self> {
        let store = settings.store_folder()?;
        debug!("SDK store folder: {}", store.display());
        Ok(Self {
            settings,
            store,
            source,
            resolver: None,
            session,
        })
    }

    /// Adds the resolver used for `sdk_artifact` coordinates.
    pub fn with_resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    pub fn settings(&self) -> &SdkSettings {
        &self.settings
    }

    /// Folder used as `GOPATH` when the environment defines none.
    pub fn default_go_path(&self) -> PathBuf {
        self.store.join(DEFAULT_GO_PATH_FOLDER_NAME)
    }

    fn is_offline(&self) -> bool {
        self.settings.offline || self.session.offline
    }

    /// The slot name for `spec`, honouring `sdk_archive_base_name`.
    pub fn base_name(&self, spec: &SdkSpec) -> Result<String> {
        if let Some(forced) = non_blank(self.settings.sdk_archive_base_name.as_deref()) {
            debug!("Forced SDK base name: {}", forced);
            return Ok(safe_file_name(forced));
        }
        if spec.version.trim().is_empty() {
            return Err(GoSdkError::Config("Go version must not be blank".to_string()));
        }
        Ok(spec.base_name())
    }

    /// The SDK root for `spec`: the pre-installed folder if one is
    /// configured, otherwise the cached slot.
    ///
    /// # Errors
    ///
    /// A configured pre-installed folder that doesn't exist fails with
    /// [`GoSdkError::Config`] before anything else is tried.
    pub async fn resolve_sdk_root(&self, spec: &SdkSpec) -> Result<PathBuf> {
        if let Some(folder) = &self.settings.preinstalled_sdk_folder {
            if folder.is_dir() {
                info!("Using pre-installed Go SDK: {}", folder.display());
                return Ok(folder.clone());
            }
            return Err(GoSdkError::Config(format!(
                "Pre-installed Go SDK folder not found: {}",
                folder.display()
            )));
        }
        self.ensure_cached(spec).await
    }

    /// Makes sure the SDK for `spec` is in the store and returns its folder.
    ///
    /// Concurrent callers for the same base name, in this process or
    /// another, are serialized by the slot lock; only the first one loads.
    pub async fn ensure_cached(&self, spec: &SdkSpec) -> Result<PathBuf> {
        let base_name = self.base_name(spec)?;
        tokio::fs::create_dir_all(&self.store)
            .await
            .map_err(|e| GoSdkError::io(&self.store, e))?;

        let lock = SlotLock::acquire(
            &self.store,
            &base_name,
            &self.settings.lock_options(),
            &self.session.cancel,
        )
        .await?;

        let result = self.ensure_locked(spec, &base_name).await;
        match (result, lock.release().await) {
            (Ok(slot), Ok(())) => Ok(slot),
            (Ok(_), Err(release_error)) => Err(release_error),
            (Err(e), Err(release_error)) => {
                warn!("Can't release lock: {}", release_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn ensure_locked(&self, spec: &SdkSpec, base_name: &str) -> Result<PathBuf> {
        let slot = self.store.join(base_name);
        if slot.is_dir() {
            info!(base_name = %base_name, "Found cached Go SDK: {}", slot.display());
            return Ok(slot);
        }
        if self.is_offline() {
            return Err(GoSdkError::OfflineNoCache(slot));
        }
        if slot.exists() {
            warn!("Removing non-folder entry in place of SDK: {}", slot.display());
            tokio::fs::remove_file(&slot)
                .await
                .map_err(|e| GoSdkError::io(&slot, e))?;
        }

        if self.session.is_cancelled() {
            return Err(GoSdkError::Interrupted(format!("loading {}", base_name)));
        }

        info!(base_name = %base_name, "Loading Go SDK");
        let archive = self.obtain_archive(spec, base_name).await?;
        let result = self.install(&archive, base_name, &slot).await;
        self.discard_archive(&archive).await;
        result?;

        info!(base_name = %base_name, "Go SDK cached: {}", slot.display());
        Ok(slot)
    }

    // ========================================================================
    // Locating
    // ========================================================================

    async fn locate_archive(&self, spec: &SdkSpec, base_name: &str) -> Result<ArchiveLocation> {
        let settings = &self.settings;

        if let Some(url) = non_blank(settings.sdk_download_url.as_deref()) {
            warn!("Using directly provided download link: {}", url);
            let file_name = non_blank(settings.sdk_archive_file_name.as_deref())
                .unwrap_or(DIRECT_LINK_FILE_NAME);
            return Ok(ArchiveLocation::Remote {
                url: url.to_string(),
                file_name: file_name.to_string(),
                record: None,
            });
        }

        if let Some(coordinate) = non_blank(settings.sdk_artifact.as_deref()) {
            let coordinate = ArtifactCoordinate::parse(coordinate)?;
            let resolver = self.resolver.as_ref().ok_or_else(|| {
                GoSdkError::Config(format!(
                    "No artifact resolver available for {}",
                    coordinate
                ))
            })?;
            let path = resolver.resolve(&coordinate).await?;
            info!("Resolved SDK artifact {} as {}", coordinate, path.display());
            return Ok(ArchiveLocation::Local(path));
        }

        let site = settings.site_url();
        if let Some(file_name) = non_blank(settings.sdk_archive_file_name.as_deref()) {
            info!("Using provided archive name: {}", file_name);
            return Ok(ArchiveLocation::Remote {
                url: format!("{}{}", site, file_name),
                file_name: file_name.to_string(),
                record: None,
            });
        }

        let prefix: String = url::form_urlencoded::byte_serialize(base_name.as_bytes()).collect();
        let index_url = format!("{}?prefix={}", site, prefix);
        debug!("Loading SDK listing: {}", index_url);
        let text = self.fetch_listing(&index_url).await?;

        let records = index::find_records(&site, &text)
            .ok_or_else(|| GoSdkError::IndexParseFailed(index_url.clone()))?;
        let candidates = [format!("{}.tar.gz", base_name), format!("{}.zip", base_name)];

        let listed: Vec<&SdkFile> = records.iter().flat_map(|r| r.files.iter()).collect();
        if let Some(file) = listed.iter().find(|f| candidates.contains(&f.file_name)) {
            info!("Found listed archive: {}", file.file_name);
            return Ok(ArchiveLocation::Remote {
                url: file.link.clone(),
                file_name: file.file_name.clone(),
                record: Some((*file).clone()),
            });
        }

        warn!(
            "Can't find any of {:?} among {} listed files",
            candidates,
            listed.len()
        );
        if settings.sdk_archive_file_auto_extension {
            let file_name = format!("{}.{}", base_name, spec.default_archive_extension());
            warn!("Trying supposed archive name: {}", file_name);
            return Ok(ArchiveLocation::Remote {
                url: format!("{}{}", site, file_name),
                file_name,
                record: None,
            });
        }

        Err(GoSdkError::SdkNotFound {
            base_name: base_name.to_string(),
            site,
        })
    }

    async fn obtain_archive(&self, spec: &SdkSpec, base_name: &str) -> Result<ObtainedArchive> {
        match self.locate_archive(spec, base_name).await? {
            ArchiveLocation::Local(path) => Ok(ObtainedArchive {
                path,
                temporary: false,
                headers: None,
                record: None,
            }),
            ArchiveLocation::Remote {
                url,
                file_name,
                record,
            } => {
                let folder = self.settings.download_folder(&self.store);
                tokio::fs::create_dir_all(&folder)
                    .await
                    .map_err(|e| GoSdkError::io(&folder, e))?;
                let dest = folder.join(temp_archive_name(&file_name));

                let headers = self.download(&url, &dest).await?;
                debug!("Response headers: {:?}", headers);
                Ok(ObtainedArchive {
                    path: dest,
                    temporary: true,
                    headers: Some(headers),
                    record,
                })
            }
        }
    }

    async fn fetch_listing(&self, url: &str) -> Result<String> {
        tokio::select! {
            _ = self.session.cancel.cancelled() => {
                Err(GoSdkError::Interrupted(format!("loading listing {}", url)))
            }
            result = self.source.get_text(url, SDK_INDEX_MIMES) => result,
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<HeaderMap> {
        info!("Loading from: {}", url);
        let hide = self.settings.hide_load_indicator;
        let on_progress = move |progress: DownloadProgress| {
            if !hide {
                draw_download_progress(&progress);
            }
        };

        tokio::select! {
            _ = self.session.cancel.cancelled() => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(GoSdkError::Interrupted(format!("downloading {}", url)))
            }
            result = self.source.download(url, dest, &on_progress) => result,
        }
    }

    // ========================================================================
    // Installing
    // ========================================================================

    /// Checks the archive against explicit, listed or header checksums,
    /// in that order of preference.
    async fn verify(&self, archive: &ObtainedArchive) -> Result<()> {
        let mut expected = Vec::new();
        if let Some(md5) = non_blank(self.settings.expected_archive_md5.as_deref()) {
            expected.push((ChecksumKind::Md5, md5.to_string()));
        }
        if let Some(sha256) = non_blank(self.settings.expected_archive_sha256.as_deref()) {
            expected.push((ChecksumKind::Sha256, sha256.to_string()));
        }
        if expected.is_empty() {
            if let Some(record) = &archive.record {
                expected.extend(record.checksums.iter().map(|(k, v)| (*k, v.clone())));
            }
        }

        let header = archive
            .headers
            .as_ref()
            .map(VendorHashHeader::from_headers)
            .filter(VendorHashHeader::is_valid);

        if expected.is_empty() && header.is_none() {
            warn!("No checksum available for {}", archive.path.display());
            return Ok(());
        }

        let path = archive.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if expected.is_empty() {
                if let Some(header) = header {
                    info!("Validating archive against x-goog-hash header");
                    header.verify_file(&path)?;
                }
            } else {
                for (kind, value) in &expected {
                    info!("Validating archive {} checksum", kind);
                    kind.verify_file(&path, value)?;
                }
            }
            info!("Checksum is ok");
            Ok(())
        })
        .await
        .map_err(|e| GoSdkError::Interrupted(format!("verifying archive: {}", e)))?
    }

    async fn install(&self, archive: &ObtainedArchive, base_name: &str, slot: &Path) -> Result<()> {
        self.verify(archive).await?;

        let unpack_dir = self.store.join(format!(".unpack{}", base_name));
        if unpack_dir.exists() {
            warn!("Removing stale unpack folder: {}", unpack_dir.display());
            tokio::fs::remove_dir_all(&unpack_dir)
                .await
                .map_err(|e| GoSdkError::io(&unpack_dir, e))?;
        }

        let result = self.unpack_and_publish(&archive.path, &unpack_dir, slot).await;

        if unpack_dir.exists() {
            debug!("Deleting unpack folder: {}", unpack_dir.display());
            if let Err(e) = tokio::fs::remove_dir_all(&unpack_dir).await {
                warn!("Can't delete unpack folder {}: {}", unpack_dir.display(), e);
            }
        }
        result
    }

    async fn unpack_and_publish(&self, archive: &Path, unpack_dir: &Path, slot: &Path) -> Result<()> {
        info!("Unpacking archive into: {}", unpack_dir.display());
        let archive_path = archive.to_path_buf();
        let dest = unpack_dir.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || {
            let mut listener = LoggingListener::default();
            archive::unpack(&archive_path, &dest, &mut listener)
        })
        .await
        .map_err(|e| GoSdkError::ExtractFailed {
            archive: archive.to_path_buf(),
            source: anyhow::anyhow!("extraction task failed: {}", e),
        })?
        .map_err(|source| GoSdkError::ExtractFailed {
            archive: archive.to_path_buf(),
            source,
        })?;
        info!("Archive unpacked, {} entries", entries);

        let go_folder = unpack_dir.join("go");
        let source = if go_folder.is_dir() {
            go_folder
        } else {
            unpack_dir.to_path_buf()
        };

        let tree = source.clone();
        let updated = tokio::task::spawn_blocking(move || make_owner_executable(&tree))
            .await
            .unwrap_or(0);
        debug!("Set execute flag on {} files", updated);

        info!("Moving {} to {}", source.display(), slot.display());
        tokio::fs::rename(&source, slot)
            .await
            .map_err(|e| GoSdkError::MoveFailed {
                from: source.clone(),
                to: slot.to_path_buf(),
                source: e,
            })
    }

    async fn discard_archive(&self, archive: &ObtainedArchive) {
        if !archive.temporary {
            return;
        }
        if self.settings.keep_downloaded_archive {
            warn!("Downloaded archive kept: {}", archive.path.display());
            return;
        }
        debug!("Deleting temporary archive: {}", archive.path.display());
        if let Err(e) = tokio::fs::remove_file(&archive.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Can't delete {}: {}", archive.path.display(), e);
            }
        }
    }

    // ========================================================================
    // Exports
    // ========================================================================

    /// Paths exported for an SDK root; the go tool must be found exactly once.
    pub fn exports(&self, sdk_root: &Path) -> Result<CacheExports> {
        let mut candidates = find_all_executables(GO_COMMAND, sdk_root)?;
        let go_command_path = match candidates.len() {
            0 => {
                return Err(GoSdkError::ExecutableNotFound {
                    name: GO_COMMAND.to_string(),
                    folder: sdk_root.to_path_buf(),
                })
            }
            1 => candidates.remove(0),
            _ => {
                let listed: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                return Err(GoSdkError::Config(format!(
                    "Found multiple candidates as go executable file in {}: {}",
                    sdk_root.display(),
                    listed.join(";")
                )));
            }
        };

        Ok(CacheExports {
            sdk_path: absolute(sdk_root),
            default_go_path: absolute(&self.default_go_path()),
            go_command_path: absolute(&go_command_path),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `.tmp_<millis base 36>_<safe name>`.
fn temp_archive_name(file_name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis().unsigned_abs();
    format!(".tmp_{}_{}", to_base36(millis), safe_file_name(file_name))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Adds owner-execute to regular files that lack it. Returns the count.
#[cfg(unix)]
fn make_owner_executable(folder: &Path) -> usize {
    use std::os::unix::fs::PermissionsExt;

    let mut updated = 0;
    for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mode = metadata.permissions().mode();
        if mode & 0o100 != 0 {
            continue;
        }
        debug!("Setting executable flag for file: {}", path.display());
        match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o100)) {
            Ok(()) => updated += 1,
            Err(e) => warn!("Can't set execute permission for {}: {}", path.display(), e),
        }
    }
    updated
}

#[cfg(not(unix))]
fn make_owner_executable(_folder: &Path) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::resolver::LocalRepositoryResolver;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use reqwest::header::HeaderValue;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const SITE: &str = "https://storage.googleapis.com/golang/";
    const BASE: &str = "go1.22.1.linux-amd64";

    fn sdk_tar_gz() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, mode, data) in [
            ("go/bin/go", 0o644, &b"#!/bin/sh\necho go\n"[..]),
            ("go/VERSION", 0o644, &b"go1.22.1\n"[..]),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(mode);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn sdk_zip_without_wrapper() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("bin/go", options).unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer.start_file("VERSION", options).unwrap();
        writer.write_all(b"go1.21.0\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn bucket_listing(entries: &[(&str, &str)]) -> String {
        let contents: String = entries
            .iter()
            .map(|(key, etag)| {
                format!("<Contents><Key>{}</Key><ETag>\"{}\"</ETag></Contents>", key, etag)
            })
            .collect();
        format!(
            "<?xml version='1.0' encoding='UTF-8'?><ListBucketResult xmlns='http://doc.s3.amazonaws.com/2006-03-01'><Name>golang</Name>{}</ListBucketResult>",
            contents
        )
    }

    /// Serves one archive and an optional listing; records every request.
    struct MockSource {
        archive: Vec<u8>,
        listing: Option<String>,
        headers: HeaderMap,
        delay: Duration,
        hang_listing: bool,
        downloads: AtomicUsize,
        requests: Mutex<Vec<String>>,
    }

    impl MockSource {
        fn new(archive: Vec<u8>, listing: Option<String>) -> Self {
            Self {
                archive,
                listing,
                headers: HeaderMap::new(),
                delay: Duration::ZERO,
                hang_listing: false,
                downloads: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArchiveSource for MockSource {
        async fn get_text(&self, url: &str, _accepted: &[&str]) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            if self.hang_listing {
                std::future::pending::<()>().await;
            }
            self.listing.clone().ok_or_else(|| GoSdkError::DownloadFailed {
                url: url.to_string(),
                status: Some(404),
                reason: "Not Found".to_string(),
            })
        }

        async fn download(
            &self,
            url: &str,
            dest: &Path,
            on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        ) -> Result<HeaderMap> {
            self.requests.lock().unwrap().push(url.to_string());
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(dest, &self.archive)
                .await
                .map_err(|e| GoSdkError::io(dest, e))?;
            on_progress(DownloadProgress {
                bytes_downloaded: self.archive.len() as u64,
                total_bytes: Some(self.archive.len() as u64),
                percent: Some(100),
            });
            Ok(self.headers.clone())
        }
    }

    fn settings(store: &Path) -> SdkSettings {
        SdkSettings {
            go_version: "1.22.1".to_string(),
            os: Some("linux".to_string()),
            arch: Some("amd64".to_string()),
            store_folder: Some(store.to_path_buf()),
            hide_load_indicator: true,
            ..Default::default()
        }
    }

    fn cache(settings: SdkSettings, source: &Arc<MockSource>) -> SdkCache {
        let source: Arc<dyn ArchiveSource> = source.clone();
        SdkCache::new(settings, source, Session::default()).unwrap()
    }

    fn leftovers(store: &Path) -> Vec<String> {
        std::fs::read_dir(store)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".tmp_") || name.starts_with(".lock.") || name.starts_with(".unpack"))
            .collect()
    }

    #[tokio::test]
    async fn test_listing_download_and_cache_hit() {
        let temp_dir = TempDir::new().unwrap();
        let archive = sdk_tar_gz();
        let md5 = ChecksumKind::Md5.digest(&archive);
        let listing = bucket_listing(&[
            ("go1.22.1.linux-amd64.tar.gz", md5.as_str()),
            ("go1.22.1.windows-amd64.zip", "00"),
        ]);
        let source = Arc::new(MockSource::new(archive, Some(listing)));
        let sdk = settings(temp_dir.path());
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        let slot = cache.ensure_cached(&spec).await.unwrap();
        assert_eq!(slot, temp_dir.path().join(BASE));
        assert_eq!(
            std::fs::read_to_string(slot.join("VERSION")).unwrap(),
            "go1.22.1\n"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(slot.join("bin/go")).unwrap().permissions().mode();
            assert_ne!(mode & 0o100, 0);
        }

        assert_eq!(
            source.requests(),
            vec![
                format!("{}?prefix={}", SITE, BASE),
                format!("{}{}.tar.gz", SITE, BASE),
            ]
        );
        assert!(leftovers(temp_dir.path()).is_empty());

        let again = cache.ensure_cached(&spec).await.unwrap();
        assert_eq!(again, slot);
        assert_eq!(source.downloads(), 1);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_listing_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockSource::new(sdk_tar_gz(), None);
        source.hang_listing = true;
        let source: Arc<dyn ArchiveSource> = Arc::new(source);
        let session = Session::default();
        let sdk = settings(temp_dir.path());
        let spec = sdk.sdk_spec();
        let cache = SdkCache::new(sdk, source, session.clone()).unwrap();

        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), cache.ensure_cached(&spec))
            .await
            .expect("listing fetch ignored cancellation");
        assert!(matches!(result, Err(GoSdkError::Interrupted(_))));
        assert!(leftovers(temp_dir.path()).is_empty());
        assert!(!temp_dir.path().join(BASE).exists());
    }

    #[tokio::test]
    async fn test_cancelled_session_loads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(sdk_tar_gz(), None));
        let session = Session::default();
        session.cancel.cancel();
        let sdk = settings(temp_dir.path());
        let spec = sdk.sdk_spec();
        let dyn_source: Arc<dyn ArchiveSource> = source.clone();
        let cache = SdkCache::new(sdk, dyn_source, session).unwrap();

        let result = cache.ensure_cached(&spec).await;
        assert!(matches!(result, Err(GoSdkError::Interrupted(_))));
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_offline_uses_only_cache() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(sdk_tar_gz(), None));
        let mut sdk = settings(temp_dir.path());
        sdk.offline = true;
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        let err = cache.ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::OfflineNoCache(_)));
        assert!(source.requests().is_empty());
        assert!(leftovers(temp_dir.path()).is_empty());

        std::fs::create_dir_all(temp_dir.path().join(BASE).join("bin")).unwrap();
        assert_eq!(
            cache.ensure_cached(&spec).await.unwrap(),
            temp_dir.path().join(BASE)
        );
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_preinstalled_folder_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(sdk_tar_gz(), None));
        let mut sdk = settings(temp_dir.path());
        sdk.preinstalled_sdk_folder = Some(temp_dir.path().join("no-such-sdk"));
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        let err = cache.resolve_sdk_root(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::Config(_)));
        assert!(source.requests().is_empty());

        let installed = temp_dir.path().join("installed-sdk");
        std::fs::create_dir_all(&installed).unwrap();
        let mut sdk = settings(temp_dir.path());
        sdk.preinstalled_sdk_folder = Some(installed.clone());
        let cache = self::cache(sdk, &source);
        assert_eq!(cache.resolve_sdk_root(&spec).await.unwrap(), installed);
        assert!(source.requests().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_download_once() {
        let temp_dir = TempDir::new().unwrap();
        let archive = sdk_tar_gz();
        let md5 = ChecksumKind::Md5.digest(&archive);
        let listing = bucket_listing(&[("go1.22.1.linux-amd64.tar.gz", md5.as_str())]);
        let mut mock = MockSource::new(archive, Some(listing));
        mock.delay = Duration::from_millis(200);
        let source = Arc::new(mock);
        let sdk = settings(temp_dir.path());
        let spec = sdk.sdk_spec();
        let cache = Arc::new(cache(sdk, &source));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let spec = spec.clone();
                tokio::spawn(async move { cache.ensure_cached(&spec).await })
            })
            .collect();

        for task in tasks {
            let slot = task.await.unwrap().unwrap();
            assert_eq!(slot, temp_dir.path().join(BASE));
        }
        assert_eq!(source.downloads(), 1);
        assert!(leftovers(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_publishes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(sdk_tar_gz(), None));
        let mut sdk = settings(temp_dir.path());
        sdk.sdk_archive_file_name = Some("go1.22.1.linux-amd64.tar.gz".to_string());
        sdk.expected_archive_sha256 = Some("0".repeat(64));
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        let err = cache.ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::ChecksumMismatch { .. }));
        assert_eq!(source.requests(), vec![format!("{}{}.tar.gz", SITE, BASE)]);
        assert!(!temp_dir.path().join(BASE).exists());
        assert!(leftovers(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_header_checksum_is_used_without_others() {
        let temp_dir = TempDir::new().unwrap();
        let mut mock = MockSource::new(sdk_tar_gz(), None);
        mock.headers.insert(
            "x-goog-hash",
            HeaderValue::from_static("md5=1B2M2Y8AsgTpgAmY7PhCfg=="),
        );
        let source = Arc::new(mock);
        let mut sdk = settings(temp_dir.path());
        sdk.sdk_archive_file_name = Some("go1.22.1.linux-amd64.tar.gz".to_string());
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        let err = cache.ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::ChecksumMismatch { ref kind, .. } if kind == "MD5"));
        assert!(leftovers(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_auto_extension_guess() {
        let temp_dir = TempDir::new().unwrap();
        let listing = bucket_listing(&[("go1.21.0.linux-amd64.tar.gz", "00")]);
        let source = Arc::new(MockSource::new(sdk_tar_gz(), Some(listing.clone())));
        let mut sdk = settings(temp_dir.path());
        sdk.os = Some("windows".to_string());
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        cache.ensure_cached(&spec).await.unwrap();
        assert_eq!(
            source.requests()[1],
            format!("{}go1.22.1.windows-amd64.zip", SITE)
        );

        let store = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(sdk_tar_gz(), Some(listing)));
        let mut sdk = settings(store.path());
        sdk.sdk_archive_file_auto_extension = false;
        let spec = sdk.sdk_spec();
        let cache = self::cache(sdk, &source);
        let err = cache.ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::SdkNotFound { .. }));
        assert_eq!(source.downloads(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_listing() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(
            sdk_tar_gz(),
            Some("<Error><Code>AccessDenied</Code></Error>".to_string()),
        ));
        let sdk = settings(temp_dir.path());
        let spec = sdk.sdk_spec();
        let err = cache(sdk, &source).ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::IndexParseFailed(_)));
    }

    #[tokio::test]
    async fn test_direct_link_keeps_archive() {
        let temp_dir = TempDir::new().unwrap();
        let downloads = temp_dir.path().join("downloads");
        let source = Arc::new(MockSource::new(sdk_tar_gz(), None));
        let mut sdk = settings(temp_dir.path());
        sdk.sdk_download_url = Some("https://mirror.local/sdk/custom.tgz".to_string());
        sdk.download_archive_folder = Some(downloads.clone());
        sdk.keep_downloaded_archive = true;
        let spec = sdk.sdk_spec();
        let cache = cache(sdk, &source);

        cache.ensure_cached(&spec).await.unwrap();
        assert_eq!(source.requests(), vec!["https://mirror.local/sdk/custom.tgz"]);

        let kept: Vec<String> = std::fs::read_dir(&downloads)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].starts_with(".tmp_"));
        assert!(kept[0].ends_with("_directLinkGoSdk"));
    }

    #[tokio::test]
    async fn test_artifact_source() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("store");
        let repo = temp_dir.path().join("repo");
        let artifact = repo.join("org/golang/go-sdk/1.21.0/go-sdk-1.21.0.zip");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, sdk_zip_without_wrapper()).unwrap();

        let source = Arc::new(MockSource::new(Vec::new(), None));
        let mut sdk = settings(&store);
        sdk.go_version = "1.21.0".to_string();
        sdk.sdk_artifact = Some("org.golang:go-sdk:1.21.0".to_string());
        let spec = sdk.sdk_spec();

        let err = cache(sdk.clone(), &source).ensure_cached(&spec).await.unwrap_err();
        assert!(matches!(err, GoSdkError::Config(_)));

        let cache = cache(sdk, &source).with_resolver(Arc::new(LocalRepositoryResolver::new(&repo)));
        let slot = cache.ensure_cached(&spec).await.unwrap();
        assert!(slot.join("bin/go").is_file());
        assert!(artifact.is_file());
        assert!(source.requests().is_empty());

        let exports = cache.exports(&slot).unwrap();
        assert_eq!(exports.go_command_path, absolute(&slot.join("bin/go")));
        assert_eq!(exports.default_go_path, absolute(&store.join(".go_path")));
        let pairs = exports.to_pairs();
        assert_eq!(pairs[0].0, "GOSDK_PATH");
    }

    #[tokio::test]
    async fn test_exports_requires_single_go_command() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(Vec::new(), None));
        let cache = cache(settings(temp_dir.path()), &source);

        let root = temp_dir.path().join("sdk");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        assert!(matches!(
            cache.exports(&root),
            Err(GoSdkError::ExecutableNotFound { .. })
        ));

        std::fs::write(root.join("bin/go"), b"").unwrap();
        std::fs::create_dir_all(root.join("misc")).unwrap();
        std::fs::write(root.join("misc/go"), b"").unwrap();
        assert!(matches!(cache.exports(&root), Err(GoSdkError::Config(_))));
    }

    #[test]
    fn test_base_name_override_is_sanitized() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(Vec::new(), None));
        let mut sdk = settings(temp_dir.path());
        sdk.sdk_archive_base_name = Some(" my sdk!.v1 ".to_string());
        let spec = sdk.sdk_spec();
        assert_eq!(cache(sdk, &source).base_name(&spec).unwrap(), "my_sdk_.v1");

        let cache = cache(settings(temp_dir.path()), &source);
        let blank = SdkSpec::new(" ", "linux", "amd64", None);
        assert!(matches!(cache.base_name(&blank), Err(GoSdkError::Config(_))));
    }

    #[test]
    fn test_temp_archive_name() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36 * 36), "100");

        let name = temp_archive_name("go1.22.1.linux-amd64.tar.gz");
        assert!(name.starts_with(".tmp_"));
        assert!(name.ends_with("_go1.22.1.linux-amd64.tar.gz"));
    }
}
