//! `delete-folders` and `give-all-permissions`.

use std::path::PathBuf;

use anyhow::Context;
use gosdk_core::folders::{delete_folders, make_writable_files, FileSet};
use gosdk_core::Settings;
use tracing::info;

pub async fn delete(settings: &Settings, folders: Vec<PathBuf>) -> anyhow::Result<()> {
    let options = settings.folders.clone();
    let deleted = tokio::task::spawn_blocking(move || delete_folders(&folders, &options))
        .await
        .context("Folder deletion task failed")??;
    info!("Deleted {} folders", deleted);
    Ok(())
}

pub async fn give_all_permissions(
    settings: &Settings,
    directory: PathBuf,
    includes: Vec<String>,
    excludes: Vec<String>,
) -> anyhow::Result<()> {
    let options = settings.folders.clone();
    let file_set = FileSet {
        directory,
        includes,
        excludes,
    };
    tokio::task::spawn_blocking(move || make_writable_files(&[file_set], &options))
        .await
        .context("Permission task failed")??;
    Ok(())
}
