use crate::Transfer;
use crate::classify::{Classification, Outcome, classify};
use crate::error::{ErrorKind, Result};
use crate::request::TransferRequest;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub outcome: Outcome,
    /// Indicator that decided a non-success outcome, if any.
    pub indicator: Option<&'static str>,
    pub exit_code: Option<i32>,
    /// Non-empty output lines, stdout and stderr interleaved as they arrived.
    pub output: Vec<String>,
}

/// The external media downloader (`yutto` by default).
pub struct Downloader {
    program: PathBuf,
    prefix_args: Vec<OsString>,
    grace: Duration,
}

impl Downloader {
    pub const DEFAULT_PROGRAM: &str = "yutto";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            grace: Duration::from_secs(3),
        }
    }

    /// Finds `program` on `PATH`.
    pub fn discover(program: &str) -> Result<Self> {
        match which::which(program) {
            Ok(path) => {
                tracing::debug!(program, path = %path.display(), "Discovered downloader");
                Ok(Self::new(path))
            },
            Err(_) => {
                tracing::info!(program, "Downloader executable not found in PATH");
                exn::bail!(ErrorKind::ToolNotFound(program.to_string()))
            },
        }
    }

    /// Arguments placed before the request's own, for launchers such as
    /// `python -m yutto`.
    pub fn with_prefix_args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// How long a terminated process gets to exit before it is killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn spawn(&self, request: &TransferRequest) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match command.spawn() {
            Ok(child) => Ok(child),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::ToolNotFound(self.program.display().to_string()))
            },
            Err(err) => Err(err).or_raise(|| ErrorKind::Io),
        }
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn terminate(&self, child: &mut Child) {
        request_exit(child);
        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            tracing::warn!(grace_secs = self.grace.as_secs_f32(), "Downloader ignored SIGTERM; killing it");
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "Could not kill downloader");
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %err, "SIGTERM failed");
    }
}

// No polite termination elsewhere; the grace period just gets skipped.
#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "Could not kill downloader");
    }
}

/// Line reader that survives being dropped mid-line by `select!`: partial
/// bytes stay in `buf` until the rest of the line arrives.
struct Lines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    open: bool,
}

impl<R: AsyncRead + Unpin> Lines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            open: true,
        }
    }

    async fn next(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.open = false;
                None
            },
            Ok(_) => {
                // Non-UTF-8 output (legacy code pages) is decoded lossily.
                let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();
                Some(line)
            },
            Err(err) => {
                tracing::warn!(error = %err, "Could not read downloader output");
                self.open = false;
                None
            },
        }
    }
}

fn relay(line: &str) {
    let lowered = line.to_lowercase();
    if lowered.contains("error") || lowered.contains("failed") {
        tracing::error!(target: "vidsync::downloader", "{line}");
    } else if lowered.contains("warn") {
        tracing::warn!(target: "vidsync::downloader", "{line}");
    } else if lowered.contains("downloading") || lowered.contains("progress") || line.contains('%') {
        tracing::debug!(target: "vidsync::downloader", "{line}");
    } else {
        tracing::info!(target: "vidsync::downloader", "{line}");
    }
}

#[async_trait]
impl Transfer for Downloader {
    #[instrument(skip_all, fields(url = %request.url))]
    async fn run(&self, request: &TransferRequest, cancel: &CancellationToken) -> Result<TransferReport> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        tracing::debug!(?request, program = %self.program.display(), "Starting downloader");
        let mut child = self.spawn(request)?;
        let mut stdout = Lines::new(child.stdout.take().ok_or_raise(|| ErrorKind::Io)?);
        let mut stderr = Lines::new(child.stderr.take().ok_or_raise(|| ErrorKind::Io)?);
        let mut output = Vec::new();

        while stdout.open || stderr.open {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!("Stop requested; terminating downloader");
                    self.terminate(&mut child).await;
                    exn::bail!(ErrorKind::Cancelled);
                },
                line = stdout.next(), if stdout.open => line,
                line = stderr.next(), if stderr.open => line,
            };
            if let Some(line) = line.filter(|line| !line.is_empty()) {
                relay(&line);
                output.push(line);
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                self.terminate(&mut child).await;
                exn::bail!(ErrorKind::Cancelled);
            },
            status = child.wait() => status.or_raise(|| ErrorKind::Io)?,
        };
        let exit_code = status.code();
        let Classification { outcome, indicator } = classify(exit_code, &output);
        match outcome {
            Outcome::Success => tracing::debug!(?exit_code, "Downloader finished"),
            _ => tracing::info!(?exit_code, %outcome, indicator, "Downloader failed"),
        }
        Ok(TransferReport {
            outcome,
            indicator,
            exit_code,
            output,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::FailureKind;
    use std::time::Instant;

    /// Runs `script` through `sh`; the request's arguments become `$1...`.
    fn sh(script: &str) -> Downloader {
        Downloader::new("sh").with_prefix_args(["-c", script, "sh"]).with_grace(Duration::from_millis(200))
    }

    fn request() -> TransferRequest {
        TransferRequest::new("https://www.bilibili.com/video/BV1x", "/tmp/out")
    }

    #[tokio::test]
    async fn test_success_and_arguments() {
        let report = sh(r#"echo "url=$1"; echo "dir=$3" >&2"#).run(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.output.contains(&"url=https://www.bilibili.com/video/BV1x".to_string()));
        assert!(report.output.contains(&"dir=/tmp/out".to_string()));
    }

    #[tokio::test]
    async fn test_failure_is_classified_from_both_streams() {
        let report = sh("echo 'starting'; echo '连接超时' >&2; exit 1").run(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Retry);
        assert_eq!(report.indicator, Some("连接超时"));

        let report = sh("echo '网络错误'; echo '请检查 SESSDATA' >&2; exit 1")
            .run(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Failure(FailureKind::Configuration));

        let report = sh("exit 3").run(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Failure(FailureKind::Unrecognized));
        assert_eq!(report.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output() {
        let report = sh(r"printf 'caf\351\n'; exit 0").run(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.output, ["caf\u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_cancel_terminates_stubborn_process() {
        let downloader = sh("trap '' TERM; echo ready; sleep 30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = downloader.run(&request(), &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sh("exit 0").run(&request(), &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = Downloader::new("/nonexistent/yutto").run(&request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolNotFound(_)));
    }
}
