//! `exec`: run a tool from the cached SDK.

use std::path::Path;

use anyhow::Context;
use gosdk_core::{find_executable, run as run_process, EnvEdits, ProcessSpec, Session, Settings};
use tracing::{debug, info};

use super::build_cache;

pub async fn run(settings: &Settings, session: Session, extra_args: Vec<String>) -> anyhow::Result<()> {
    let cancel = session.cancel.clone();
    let cache = build_cache(settings, session)?;
    let spec = settings.sdk.sdk_spec();

    let root = cache
        .resolve_sdk_root(&spec)
        .await
        .with_context(|| format!("Can't obtain Go SDK {}", spec))?;
    let default_go_path = settings
        .exec
        .default_go_path
        .then(|| cache.default_go_path());

    let process = process_spec(settings, &root, default_go_path.as_deref(), extra_args)?;
    info!("Executing {} {}", process.command.display(), process.args.join(" "));

    let status = run_process(&process, &cancel).await?;
    info!("Process {} finished in {:?}", process.command.display(), status.elapsed);
    Ok(())
}

/// Builds the child process for the configured command.
///
/// The work folder is resolved against the project folder.
fn process_spec(
    settings: &Settings,
    sdk_root: &Path,
    default_go_path: Option<&Path>,
    extra_args: Vec<String>,
) -> anyhow::Result<ProcessSpec> {
    let exec = &settings.exec;
    let command = find_executable(&exec.command, sdk_root)
        .with_context(|| format!("Can't find {} in Go SDK", exec.command))?;
    debug!("Found executable: {}", command.display());

    let mut process = ProcessSpec::new(command)
        .args(exec.args.iter().cloned())
        .args(extra_args);
    process.work_dir = Some(settings.folders.project_dir.join(&exec.work_dir));
    process.env = EnvEdits {
        remove: exec.env_remove.clone(),
        set: exec.env.clone(),
        prepend: exec.env_first.clone(),
        append: exec.env_last.clone(),
        default_go_path: default_go_path.map(Path::to_path_buf),
    };
    process.timeout = exec.timeout();
    process.expected_exit_code = exec.expected_exit_code;
    process.stdout_log = exec.log_file_std.clone();
    process.stderr_log = exec.log_file_err.clone();
    process.hide_output = exec.hide_process_output;
    process.merge_output = exec.merge_output;
    Ok(process)
}
