//! Managed execution of SDK tools.
//!
//! The child's stdout and stderr are drained by two concurrent reader tasks
//! so neither stream can stall the other. Each line is echoed to the log and
//! appended verbatim to an optional log file.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::env::EnvEdits;
use super::executable::is_executable;
use crate::error::{GoSdkError, Result};

/// Delay after exit that lets readers drain buffered output.
pub const READER_LINGER: Duration = Duration::from_millis(200);

/// How long each reader may take to stop once interrupted.
pub const READER_JOIN_GRACE: Duration = Duration::from_secs(2);

/// Log target for child output.
pub const CHILD_LOG_TARGET: &str = "child";

// ============================================================================
// Process Spec
// ============================================================================

/// Everything needed to run one child process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub env: EnvEdits,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub expected_exit_code: i32,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    /// Don't echo child output to the log. Log files are still written.
    pub hide_output: bool,
    /// Route stderr into the stdout sink.
    pub merge_output: bool,
}

impl ProcessSpec {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
            env: EnvEdits::default(),
            timeout: None,
            expected_exit_code: 0,
            stdout_log: None,
            stderr_log: None,
            hide_output: false,
            merge_output: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Outcome of a run that ended with the expected exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatusInfo {
    /// Exit code; -1 if the child died from a signal.
    pub code: i32,
    pub pid: Option<u32>,
    pub elapsed: Duration,
}

// ============================================================================
// Output Sinks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Where one stream's lines go.
#[derive(Clone)]
struct LineSink {
    kind: StreamKind,
    hide_output: bool,
    log_file: Option<Arc<Mutex<File>>>,
}

impl LineSink {
    async fn accept(&self, raw: &[u8]) {
        if !self.hide_output {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim_end_matches(['\n', '\r']);
            match self.kind {
                StreamKind::Stdout => info!(target: CHILD_LOG_TARGET, "{}", text),
                StreamKind::Stderr => warn!(target: CHILD_LOG_TARGET, "{}", text),
            }
        }

        if let Some(file) = &self.log_file {
            let mut file = file.lock().await;
            if let Err(e) = file.write_all(raw).await {
                warn!("Can't append {} record to log file: {}", self.kind.as_str(), e);
            }
        }
    }

    async fn flush(&self) {
        if let Some(file) = &self.log_file {
            if let Err(e) = file.lock().await.flush().await {
                warn!("Can't flush {} log file: {}", self.kind.as_str(), e);
            }
        }
    }
}

async fn open_log(path: &Path) -> Result<Arc<Mutex<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GoSdkError::io(parent, e))?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| GoSdkError::io(path, e))?;
    info!("Redirecting process output to {}", path.display());
    Ok(Arc::new(Mutex::new(file)))
}

/// Builds the two sinks, sharing one file when both logs name the same path.
async fn build_sinks(spec: &ProcessSpec) -> Result<(LineSink, LineSink)> {
    let stdout_file = match &spec.stdout_log {
        Some(path) => Some(open_log(path).await?),
        None => None,
    };
    let stderr_file = if spec.merge_output {
        stdout_file.clone()
    } else {
        match &spec.stderr_log {
            Some(path) if spec.stdout_log.as_ref() == Some(path) => stdout_file.clone(),
            Some(path) => Some(open_log(path).await?),
            None => None,
        }
    };

    let stdout = LineSink {
        kind: StreamKind::Stdout,
        hide_output: spec.hide_output,
        log_file: stdout_file,
    };
    let stderr = LineSink {
        kind: if spec.merge_output {
            StreamKind::Stdout
        } else {
            StreamKind::Stderr
        },
        hide_output: spec.hide_output,
        log_file: stderr_file,
    };
    Ok((stdout, stderr))
}

/// Copies lines from `stream` into `sink` until EOF or interruption.
///
/// Available data is always consumed before the interrupt is honoured; a
/// partial line left at that point is still delivered.
async fn pump<R>(stream: R, sink: LineSink, stop: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let name = sink.kind.as_str();
    debug!("Reader for {} started", name);
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            biased;
            read = reader.read_until(b'\n', &mut line) => read,
            _ = stop.cancelled() => break,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                sink.accept(&line).await;
                line.clear();
            }
            Err(e) => {
                warn!("Error reading process {}: {}", name, e);
                break;
            }
        }
    }

    if !line.is_empty() {
        sink.accept(&line).await;
    }
    sink.flush().await;
    debug!("Reader for {} completed", name);
}

async fn stop_readers(readers: Vec<JoinHandle<()>>, stop: &CancellationToken) {
    tokio::time::sleep(READER_LINGER).await;
    stop.cancel();
    for mut reader in readers {
        if tokio::time::timeout(READER_JOIN_GRACE, &mut reader)
            .await
            .is_err()
        {
            warn!("Output reader did not stop within {:?}", READER_JOIN_GRACE);
            reader.abort();
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

// ============================================================================
// Run
// ============================================================================

fn check_command(command: &Path) -> Result<()> {
    if !command.is_file() {
        return Err(GoSdkError::ExecutableNotFound {
            name: command
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| command.display().to_string()),
            folder: command.parent().map(Path::to_path_buf).unwrap_or_default(),
        });
    }
    if !is_executable(command) {
        return Err(GoSdkError::NotExecutable(command.to_path_buf()));
    }
    Ok(())
}

/// Runs a child process to completion.
///
/// # Errors
///
/// - [`GoSdkError::ExecutableNotFound`] / [`GoSdkError::NotExecutable`] for
///   a bad command file, [`GoSdkError::Config`] for a missing work dir.
/// - [`GoSdkError::SpawnFailed`] if the OS refuses to start it.
/// - [`GoSdkError::ProcessTimeout`] or [`GoSdkError::Interrupted`]; the
///   child is killed in both cases.
/// - [`GoSdkError::UnexpectedExitCode`] carrying the actual code.
pub async fn run(spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ExitStatusInfo> {
    check_command(&spec.command)?;
    if let Some(work_dir) = &spec.work_dir {
        if !work_dir.is_dir() {
            return Err(GoSdkError::Config(format!(
                "Can't find work directory: {}",
                work_dir.display()
            )));
        }
    }

    let env = spec.env.apply_to_current();
    for (name, value) in &env {
        debug!("Environment: {}={}", name, value);
    }

    let (stdout_sink, stderr_sink) = build_sinks(spec).await?;

    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(work_dir) = &spec.work_dir {
        command.current_dir(work_dir);
        debug!("Work directory: {}", work_dir.display());
    }

    info!(
        command = %spec.command.display(),
        args = ?spec.args,
        "Starting process"
    );
    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| GoSdkError::SpawnFailed {
        command: spec.command.clone(),
        source,
    })?;
    let pid = child.id();
    info!("Process started: PID={}", pid.map_or("<unknown>".to_string(), |p| p.to_string()));
    if spec.hide_output {
        info!("Hiding process output");
    }

    let stop = CancellationToken::new();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, stdout_sink, stop.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, stderr_sink, stop.clone())));
    }

    let outcome = tokio::select! {
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = deadline(spec.timeout) => WaitOutcome::TimedOut(spec.timeout.unwrap_or_default()),
        status = child.wait() => WaitOutcome::Exited(status),
    };

    let status = match outcome {
        WaitOutcome::Exited(status) => status,
        WaitOutcome::TimedOut(timeout) => {
            warn!("Destroying process after timeout of {:?}", timeout);
            if let Err(e) = child.kill().await {
                warn!("Can't kill process: {}", e);
            }
            stop_readers(readers, &stop).await;
            return Err(GoSdkError::ProcessTimeout(timeout));
        }
        WaitOutcome::Cancelled => {
            warn!("Process interrupted");
            if let Err(e) = child.kill().await {
                warn!("Can't kill process: {}", e);
            }
            stop_readers(readers, &stop).await;
            return Err(GoSdkError::Interrupted(format!(
                "running {}",
                spec.command.display()
            )));
        }
    };

    stop_readers(readers, &stop).await;
    let status = status.map_err(|e| GoSdkError::io(&spec.command, e))?;
    let code = status.code().unwrap_or(-1);
    let elapsed = started.elapsed();
    info!("Process exited with code {} after {:?}", code, elapsed);

    if code != spec.expected_exit_code {
        return Err(GoSdkError::UnexpectedExitCode {
            expected: spec.expected_exit_code,
            actual: code,
        });
    }

    Ok(ExitStatusInfo { code, pid, elapsed })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_unexpected_exit_code_keeps_logs_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(
            temp_dir.path(),
            "tool.sh",
            "echo out-1\necho err-1 >&2\necho out-2\necho err-2 >&2\nprintf tail\nexit 1",
        );
        let std_log = temp_dir.path().join("logs/std.log");
        let err_log = temp_dir.path().join("logs/err.log");

        let mut spec = ProcessSpec::new(&script);
        spec.stdout_log = Some(std_log.clone());
        spec.stderr_log = Some(err_log.clone());

        let err = run(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            GoSdkError::UnexpectedExitCode {
                expected: 0,
                actual: 1
            }
        ));

        assert_eq!(std::fs::read_to_string(&std_log).unwrap(), "out-1\nout-2\ntail");
        assert_eq!(std::fs::read_to_string(&err_log).unwrap(), "err-1\nerr-2\n");
    }

    #[tokio::test]
    async fn test_args_env_and_work_dir() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let script = write_script(
            temp_dir.path(),
            "tool.sh",
            "echo \"$1 $GREETING $GOPATH\"\npwd",
        );
        let log = temp_dir.path().join("out.log");

        let mut spec = ProcessSpec::new(&script).args(["first"]);
        spec.work_dir = Some(work.clone());
        spec.stdout_log = Some(log.clone());
        spec.hide_output = true;
        spec.env.remove.push("GOPATH".to_string());
        spec.env.set.insert("GREETING".to_string(), "hello".to_string());
        spec.env.default_go_path = Some(PathBuf::from("/store/.go_path"));

        let info = run(&spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(info.code, 0);
        assert!(info.pid.is_some());

        let output = std::fs::read_to_string(&log).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("first hello /store/.go_path"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), work.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_expected_non_zero_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "tool.sh", "exit 3");
        let mut spec = ProcessSpec::new(&script);
        spec.expected_exit_code = 3;
        assert_eq!(run(&spec, &CancellationToken::new()).await.unwrap().code, 3);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "sleepy.sh", "exec sleep 30");
        let mut spec = ProcessSpec::new(&script);
        spec.timeout = Some(Duration::from_millis(300));

        let started = Instant::now();
        let err = run(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GoSdkError::ProcessTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_child() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "sleepy.sh", "exec sleep 30");
        let spec = ProcessSpec::new(&script);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = run(&spec, &cancel).await.unwrap_err();
        assert!(matches!(err, GoSdkError::Interrupted(_)));
    }

    #[tokio::test]
    async fn test_merged_output_shares_log() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "tool.sh", "echo a\necho b >&2");
        let log = temp_dir.path().join("all.log");

        let mut spec = ProcessSpec::new(&script);
        spec.stdout_log = Some(log.clone());
        spec.merge_output = true;
        run(&spec, &CancellationToken::new()).await.unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_missing_and_non_executable_command() {
        let temp_dir = TempDir::new().unwrap();
        let err = run(
            &ProcessSpec::new(temp_dir.path().join("nope")),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GoSdkError::ExecutableNotFound { .. }));

        let plain = temp_dir.path().join("plain.sh");
        std::fs::write(&plain, "echo hi").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = run(&ProcessSpec::new(&plain), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GoSdkError::NotExecutable(_)));
    }

    #[tokio::test]
    async fn test_missing_work_dir() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "tool.sh", "exit 0");
        let mut spec = ProcessSpec::new(&script);
        spec.work_dir = Some(temp_dir.path().join("src"));
        assert!(matches!(
            run(&spec, &CancellationToken::new()).await,
            Err(GoSdkError::Config(_))
        ));
    }
}
