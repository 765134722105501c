//! Folder housekeeping: deleting build folders and opening up permissions.
//!
//! Both operations can be bound to a project folder. Paths are compared in
//! canonical form, so `..` segments and symlinks can't escape the project.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FolderSettings;
use crate::error::{GoSdkError, Result};

/// Pattern used when a file set lists no includes.
pub const DEFAULT_INCLUDE: &str = "**/*";

// ============================================================================
// Project Bounds
// ============================================================================

/// Canonical form of `path`, which may not exist.
///
/// The longest existing ancestor is resolved on disk; the missing tail is
/// appended to it with `.` and `..` applied lexically.
pub fn canonical_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }
    let Some(parent) = absolute.parent() else {
        return absolute;
    };

    let base = canonical_path(parent);
    match absolute.components().next_back() {
        Some(Component::Normal(name)) => base.join(name),
        Some(Component::ParentDir) => base.parent().map(Path::to_path_buf).unwrap_or(base),
        Some(Component::CurDir) => base,
        _ => absolute,
    }
}

/// Fails unless `path` lies inside `root`.
///
/// # Errors
///
/// Returns [`GoSdkError::ProjectBoundaryViolation`] for paths outside.
pub fn assert_project_bound(path: &Path, root: &Path) -> Result<()> {
    let root = canonical_path(root);
    let canonical = canonical_path(path);
    if canonical.starts_with(&root) {
        Ok(())
    } else {
        Err(GoSdkError::ProjectBoundaryViolation {
            path: path.to_path_buf(),
            root,
        })
    }
}

// ============================================================================
// Permissions
// ============================================================================

#[cfg(unix)]
fn open_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn open_permissions(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Grants everyone full access to `path` and, for folders, everything
/// beneath it. Symlinks are skipped unless `follow_symlinks`.
pub fn make_tree_writable(path: &Path, follow_symlinks: bool) -> io::Result<usize> {
    let mut updated = 0;
    for entry in WalkDir::new(path).follow_links(follow_symlinks) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.path_is_symlink() && !follow_symlinks {
            continue;
        }
        open_permissions(entry.path())?;
        updated += 1;
    }
    Ok(updated)
}

// ============================================================================
// Delete Folders
// ============================================================================

/// Deletes each folder in `folders`.
///
/// Missing folders are skipped. A path that isn't a folder, or one that
/// can't be deleted, fails the call when `fail_on_error` is set and is
/// only logged otherwise. Returns the number of folders deleted.
///
/// # Errors
///
/// [`GoSdkError::ProjectBoundaryViolation`] is raised before anything is
/// touched when a folder lies outside a bound project.
pub fn delete_folders(folders: &[PathBuf], settings: &FolderSettings) -> Result<usize> {
    if settings.project_bound {
        for folder in folders {
            assert_project_bound(folder, &settings.project_dir)?;
        }
    }

    let mut deleted = 0;
    for folder in folders {
        if settings.force_delete {
            info!("Deleting the folder (force mode): {}", folder.display());
        } else {
            info!("Deleting the folder: {}", folder.display());
        }

        let metadata = match fs::symlink_metadata(folder) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("There is no folder: {}", folder.display());
                continue;
            }
            Err(e) => {
                fail_or_warn(settings, GoSdkError::io(folder, e))?;
                continue;
            }
        };

        if !metadata.is_dir() {
            fail_or_warn(
                settings,
                GoSdkError::Config(format!("It is not a folder: {}", folder.display())),
            )?;
            continue;
        }

        match delete_folder(folder, settings) {
            Ok(()) => {
                info!("Successfully deleted folder: {}", folder.display());
                deleted += 1;
            }
            Err(e) => fail_or_warn(settings, GoSdkError::io(folder, e))?,
        }
    }
    Ok(deleted)
}

fn delete_folder(folder: &Path, settings: &FolderSettings) -> io::Result<()> {
    if settings.force_delete {
        debug!("Making folder content writable: {}", folder.display());
        make_tree_writable(folder, settings.follow_symlinks)?;
    }
    fs::remove_dir_all(folder)
}

fn fail_or_warn(settings: &FolderSettings, error: GoSdkError) -> Result<()> {
    if settings.fail_on_error {
        Err(error)
    } else {
        warn!("{}", error);
        Ok(())
    }
}

// ============================================================================
// Give All Permissions
// ============================================================================

/// Files under `directory` matching any include and no exclude.
///
/// Patterns are relative to `directory` and use glob syntax with `**`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSet {
    pub directory: PathBuf,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl FileSet {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Lists matching regular files, sorted. A missing directory yields none.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Config`] for an invalid pattern.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.directory.is_dir() {
            debug!("File set folder not found: {}", self.directory.display());
            return Ok(Vec::new());
        }

        let excludes = self
            .excludes
            .iter()
            .map(|p| glob::Pattern::new(p).map_err(|e| invalid_pattern(p, e)))
            .collect::<Result<Vec<_>>>()?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        let includes: Vec<&str> = if self.includes.is_empty() {
            vec![DEFAULT_INCLUDE]
        } else {
            self.includes.iter().map(String::as_str).collect()
        };

        let base = glob::Pattern::escape(&self.directory.to_string_lossy());
        let mut files = Vec::new();
        for include in includes {
            let pattern = format!("{}/{}", base.trim_end_matches('/'), include);
            let entries = glob::glob_with(&pattern, options).map_err(|e| invalid_pattern(include, e))?;

            for path in entries.filter_map(|entry| entry.ok()) {
                if !path.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(&self.directory).unwrap_or(&path);
                if excludes.iter().any(|p| p.matches_path_with(relative, options)) {
                    continue;
                }
                files.push(path);
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }
}

fn invalid_pattern(pattern: &str, error: glob::PatternError) -> GoSdkError {
    GoSdkError::Config(format!("Invalid file pattern '{}': {}", pattern, error))
}

/// Makes every file selected by `file_sets` readable, writable and
/// executable by everyone. Returns the number of files updated.
///
/// Files outside a bound project are skipped, or fail the call when
/// `fail_on_error` is set.
pub fn make_writable_files(file_sets: &[FileSet], settings: &FolderSettings) -> Result<usize> {
    if file_sets.is_empty() {
        warn!("No defined file sets");
        return Ok(0);
    }

    let mut updated = 0;
    for file_set in file_sets {
        for file in file_set.files()? {
            debug!("Processing file: {}", file.display());
            if settings.project_bound {
                if let Err(e) = assert_project_bound(&file, &settings.project_dir) {
                    fail_or_warn(settings, e)?;
                    continue;
                }
            }

            match make_tree_writable(&file, settings.follow_symlinks) {
                Ok(_) => updated += 1,
                Err(e) => fail_or_warn(settings, GoSdkError::io(&file, e))?,
            }
        }
    }
    info!("Updated permissions of {} files", updated);
    Ok(updated)
}
