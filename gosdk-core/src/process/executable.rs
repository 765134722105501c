//! Locating tool executables inside an SDK tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{GoSdkError, Result};

#[cfg(windows)]
const EXECUTABLE_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat"];
#[cfg(not(windows))]
const EXECUTABLE_EXTENSIONS: &[&str] = &[".sh", ""];

/// File names that may hold the executable `name` on this platform.
///
/// A name with an extension is used as is.
pub fn executable_variants(name: &str) -> BTreeSet<String> {
    if name.contains('.') {
        return BTreeSet::from([name.to_string()]);
    }
    EXECUTABLE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| format!("{}{}", name, ext))
        .collect()
}

fn check_arguments(name: &str, folder: &Path) -> Result<()> {
    if !folder.is_dir() {
        return Err(GoSdkError::Config(format!(
            "Is not a folder: {}",
            folder.display()
        )));
    }
    if cfg!(windows) && name.contains(':') {
        return Err(GoSdkError::Config(format!("Illegal file name: {}", name)));
    }
    Ok(())
}

fn has_separator(name: &str) -> bool {
    name.contains('/') || name.contains('\\')
}

fn walk_matching<'a>(
    root: &Path,
    variants: &'a BTreeSet<String>,
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file_name| variants.contains(file_name))
        })
        .map(|entry| entry.into_path())
}

/// Finds the executable `name` under `folder`.
///
/// Names containing a path separator are resolved relative to `folder`.
/// Otherwise `bin/` is searched first, then the whole tree.
///
/// # Errors
///
/// [`GoSdkError::ExecutableNotFound`] if nothing matches and
/// [`GoSdkError::Config`] if `folder` is not a directory.
pub fn find_executable(name: &str, folder: &Path) -> Result<PathBuf> {
    check_arguments(name, folder)?;
    let not_found = || GoSdkError::ExecutableNotFound {
        name: name.to_string(),
        folder: folder.to_path_buf(),
    };

    if has_separator(name) {
        let path = folder.join(name);
        return if path.is_file() { Ok(path) } else { Err(not_found()) };
    }

    let variants = executable_variants(name);
    debug!("Looking for {:?} in {}", variants, folder.display());

    let bin = folder.join("bin");
    if bin.is_dir() {
        if let Some(found) = walk_matching(&bin, &variants).next() {
            return Ok(found);
        }
    }

    let found = walk_matching(folder, &variants).next();
    found.ok_or_else(not_found)
}

/// Finds every file under `folder` that could be the executable `name`.
pub fn find_all_executables(name: &str, folder: &Path) -> Result<Vec<PathBuf>> {
    check_arguments(name, folder)?;
    if has_separator(name) {
        let path = folder.join(name);
        return Ok(if path.is_file() { vec![path] } else { Vec::new() });
    }
    let variants = executable_variants(name);
    Ok(walk_matching(folder, &variants).collect())
}

/// Returns true if the file may be executed by its owner.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Returns true if the file exists.
#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
