//! Archive type detection and extraction for downloaded SDK archives.
//!
//! The archive type is detected from magic bytes rather than the file
//! name, because direct download links and artifact coordinates often
//! carry no usable extension. ZIP, gzipped TAR and bare TAR are extracted;
//! 7z and RAR are recognized only so the failure message can name them.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path};
use tracing::{debug, info, warn};

/// Copy buffer for extracted files.
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Bytes needed to see the USTAR magic.
const HEADER_PROBE_SIZE: usize = 512;

/// Offset of the `ustar` magic inside a TAR header block.
const USTAR_MAGIC_OFFSET: usize = 257;

// ============================================================================
// Archive Type Detection
// ============================================================================

/// Archive formats distinguished by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Tar,
    TarGz,
    Zip,
    SevenZ,
    Rar,
    Unknown,
}

impl ArchiveType {
    /// Returns true if [`unpack`] can extract this type.
    pub fn is_extractable(&self) -> bool {
        matches!(self, Self::Tar | Self::TarGz | Self::Zip)
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tar => "TAR",
            Self::TarGz => "TAR_GZ",
            Self::Zip => "ZIP",
            Self::SevenZ => "SEVEN_Z",
            Self::Rar => "RAR",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Detects the archive type from the first bytes of a file.
pub fn detect_type_from_header(header: &[u8]) -> ArchiveType {
    if header.len() < 4 {
        return ArchiveType::Unknown;
    }

    match header {
        [0x50, 0x4B, ..] => ArchiveType::Zip,
        [0x1F, 0x8B, ..] => ArchiveType::TarGz,
        [0x37, 0x7A, 0xBC, 0xAF, ..] => ArchiveType::SevenZ,
        [0x52, 0x61, 0x72, 0x21, ..] => ArchiveType::Rar,
        _ if header.len() >= USTAR_MAGIC_OFFSET + 5
            && &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar" =>
        {
            ArchiveType::Tar
        }
        _ => ArchiveType::Unknown,
    }
}

/// Detects the archive type of a file on disk.
///
/// # Errors
///
/// Returns an error if the path is not a readable regular file.
pub fn detect_type(path: &Path) -> Result<ArchiveType> {
    if !path.is_file() {
        anyhow::bail!("Can't find archive file: {}", path.display());
    }

    let mut file =
        File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    let mut header = Vec::with_capacity(HEADER_PROBE_SIZE);
    Read::by_ref(&mut file)
        .take(HEADER_PROBE_SIZE as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("Failed to read header of {}", path.display()))?;

    Ok(detect_type_from_header(&header))
}

// ============================================================================
// Unpack Listener
// ============================================================================

/// Receives progress callbacks while an archive is unpacked.
pub trait UnpackListener {
    fn on_archive_type(&mut self, _archive_type: ArchiveType) {}

    /// Called once per entry; directories report no size.
    fn on_entry(&mut self, _name: &str, _size: Option<u64>) {}

    fn on_completed(&mut self) {}
}

/// Listener that ignores every callback.
impl UnpackListener for () {}

// ============================================================================
// Extraction
// ============================================================================

/// Unpacks an archive into `dest_dir`, returning the number of entries seen.
///
/// # Arguments
///
/// * `archive_path` - Path to the archive file.
/// * `dest_dir` - Directory to extract into, created if missing.
/// * `listener` - Receives the detected type, each entry and completion.
///
/// # Errors
///
/// Returns an error if the type is not extractable or any entry fails to
/// be written.
pub fn unpack(
    archive_path: &Path,
    dest_dir: &Path,
    listener: &mut dyn UnpackListener,
) -> Result<usize> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let archive_type = detect_type(archive_path)?;
    listener.on_archive_type(archive_type);

    info!(
        "Extracting {} archive {} to {}",
        archive_type,
        archive_path.display(),
        dest_dir.display()
    );

    let entries = match archive_type {
        ArchiveType::Zip => extract_zip(archive_path, dest_dir, listener)?,
        ArchiveType::TarGz => {
            let file = open_buffered(archive_path)?;
            extract_tar(flate2::read::GzDecoder::new(file), dest_dir, listener)?
        }
        ArchiveType::Tar => extract_tar(open_buffered(archive_path)?, dest_dir, listener)?,
        other => anyhow::bail!("Unsupported archive format: {}", other),
    };

    listener.on_completed();
    debug!("Extracted {} entries", entries);
    Ok(entries)
}

fn open_buffered(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn write_entry<R: Read>(reader: &mut R, dest_path: &Path) -> Result<()> {
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let outfile = File::create(dest_path)
        .with_context(|| format!("Failed to create: {}", dest_path.display()))?;
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, outfile);
    io::copy(reader, &mut writer)
        .with_context(|| format!("Failed to write: {}", dest_path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Returns true if the relative path stays inside the destination.
fn is_safe_relative(path: &Path) -> bool {
    !path.is_absolute()
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

// ============================================================================
// ZIP Extraction
// ============================================================================

fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    listener: &mut dyn UnpackListener,
) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open zip: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip: {}", archive_path.display()))?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                warn!("Skipping unsafe path in zip: {}", entry.name());
                continue;
            }
        };

        count += 1;
        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            listener.on_entry(entry.name(), None);
            fs::create_dir_all(&dest_path)?;
        } else {
            listener.on_entry(entry.name(), Some(entry.size()));
            let mode = entry.unix_mode();
            write_entry(&mut entry, &dest_path)?;

            #[cfg(unix)]
            set_unix_permissions(&dest_path, mode)?;
            #[cfg(not(unix))]
            let _ = mode;
        }
    }

    Ok(count)
}

// ============================================================================
// TAR Extraction
// ============================================================================

fn extract_tar<R: Read>(
    reader: R,
    dest_dir: &Path,
    listener: &mut dyn UnpackListener,
) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;

    for entry_result in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry_result.context("Failed to read tar entry")?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();
        let name = path.to_string_lossy().to_string();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link entry in tar archive: {}", name);
            continue;
        }

        if !is_safe_relative(&path) {
            warn!("Skipping unsafe path in tar: {}", name);
            continue;
        }

        let dest_path = dest_dir.join(&path);

        if entry_type.is_dir() {
            count += 1;
            listener.on_entry(&name, None);
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
            count += 1;
            listener.on_entry(&name, Some(entry.header().size()?));
            write_entry(&mut entry, &dest_path)?;

            #[cfg(unix)]
            {
                if let Ok(mode) = entry.header().mode() {
                    set_unix_permissions(&dest_path, Some(mode))?;
                }
            }
        } else {
            debug!("Ignoring tar entry {} of type {:?}", name, entry_type);
        }
    }

    Ok(count)
}

// ============================================================================
// Unix Permissions
// ============================================================================

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        let permissions = fs::Permissions::from_mode((mode & 0o7777) | 0o600);
        fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
