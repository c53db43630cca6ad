//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressEstimator;

/// Bytes of engine stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// How long to wait for stderr to close after the engine exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Builder for FFmpeg commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Drop every audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        // Output file last
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Completed engine invocation.
#[derive(Debug, Clone)]
pub struct EngineRun {
    /// Tail of the engine's stderr
    pub stderr: String,
    pub elapsed: Duration,
}

enum Exit {
    Finished(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runs the engine under a hard wall-clock limit while feeding estimated
/// progress into a channel.
///
/// Dropping the receiving end of the progress channel cancels the run. The
/// child is spawned with `kill_on_drop`, so dropping the run future also
/// terminates the process.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Binary name or path
    binary: String,
    /// Timeout in seconds
    timeout_secs: u64,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    /// Create a new runner with the default 300s timeout.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs: 300,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Run `cmd`, sending estimator values on `ticks` while the process is alive.
    ///
    /// The start bound is sent before spawning and the end bound once the
    /// process exits on its own. A zero exit without the output file is
    /// reported as [`MediaError::MissingOutput`].
    pub async fn run(
        &self,
        cmd: &FfmpegCommand,
        mut estimator: ProgressEstimator,
        ticks: mpsc::Sender<u8>,
    ) -> MediaResult<EngineRun> {
        let program = check_ffmpeg(&self.binary)?;
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", program.display(), args.join(" "));

        if ticks.send(estimator.current()).await.is_err() {
            return Err(MediaError::Cancelled);
        }

        let started = Instant::now();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(collect_stderr(stderr)));

        let deadline = tokio::time::sleep(Duration::from_secs(self.timeout_secs));
        tokio::pin!(deadline);

        let mut interval = tokio::time::interval_at(started + estimator.tick(), estimator.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            tokio::select! {
                status = child.wait() => break Exit::Finished(status?),
                _ = &mut deadline => break Exit::TimedOut,
                _ = interval.tick() => {
                    let closed = match estimator.advance() {
                        Some(progress) => matches!(ticks.try_send(progress), Err(TrySendError::Closed(_))),
                        None => ticks.is_closed(),
                    };
                    if closed {
                        break Exit::Cancelled;
                    }
                }
            }
        };

        let status = match exit {
            Exit::Finished(status) => status,
            Exit::TimedOut => {
                warn!("FFmpeg timed out after {} seconds, killing process", self.timeout_secs);
                let _ = child.kill().await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(MediaError::Timeout(self.timeout_secs));
            }
            Exit::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(MediaError::Cancelled);
            }
        };

        let elapsed = started.elapsed();
        metrics::histogram!("alphavid_engine_duration_seconds").record(elapsed.as_secs_f64());

        let _ = ticks.send(estimator.finish()).await;

        // A detached grandchild can keep the pipe open after the engine exits.
        let stderr = match stderr_task {
            Some(mut task) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    warn!("FFmpeg stderr still open after exit, dropping diagnostics");
                    task.abort();
                    String::new()
                }
            },
            None => String::new(),
        };

        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with {}", status),
                Some(stderr),
                status.code(),
            ));
        }

        if !tokio::fs::try_exists(cmd.output()).await.unwrap_or(false) {
            return Err(MediaError::MissingOutput(cmd.output().to_path_buf()));
        }

        debug!(elapsed_ms = elapsed.as_millis() as u64, "FFmpeg finished");
        Ok(EngineRun { stderr, elapsed })
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if !tail.is_empty() {
            tail.push('\n');
        }
        tail.push_str(&line);

        if tail.len() > STDERR_TAIL_BYTES {
            let cut = tail.len() - STDERR_TAIL_BYTES;
            let cut = (cut..tail.len())
                .find(|i| tail.is_char_boundary(*i))
                .unwrap_or(tail.len());
            tail.drain(..cut);
        }
    }

    tail
}

/// Resolve the engine binary on `PATH` (or as a path).
pub fn check_ffmpeg(binary: &str) -> MediaResult<PathBuf> {
    which::which(binary).map_err(|_| MediaError::EngineNotFound(binary.to_string()))
}

/// First line of `<binary> -version`.
pub async fn ffmpeg_version(binary: &str) -> MediaResult<String> {
    let program = check_ffmpeg(binary)?;
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "FFmpeg -version failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.webm")
            .video_filter("colorkey=color=0x000000:similarity=0.10:blend=0.05")
            .video_codec("libvpx-vp9")
            .no_audio();

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert_eq!(args.last().map(String::as_str), Some("output.webm"));

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "input.mp4");

        let vf_pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(vf_pos > input_pos);
        assert!(args.contains(&"-an".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-loglevel" && w[1] == "error"));
    }

    #[test]
    fn test_missing_binary() {
        let err = check_ffmpeg("definitely-not-an-engine-binary").unwrap_err();
        assert!(matches!(err, MediaError::EngineNotFound(_)));
    }

    #[cfg(unix)]
    mod engine {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn stub(dir: &TempDir, name: &str, body: &str) -> String {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn estimator() -> ProgressEstimator {
            ProgressEstimator::new(40, 80, 2, Duration::from_millis(20))
        }

        fn command(dir: &TempDir) -> FfmpegCommand {
            FfmpegCommand::new(dir.path().join("in.mp4"), dir.path().join("out.webm"))
        }

        async fn drain(mut rx: mpsc::Receiver<u8>) -> Vec<u8> {
            let mut seen = Vec::new();
            while let Some(p) = rx.recv().await {
                seen.push(p);
            }
            seen
        }

        #[tokio::test]
        async fn test_success_clamps_to_end() {
            let dir = TempDir::new().unwrap();
            let bin = stub(&dir, "ok.sh", r#"sleep 0.1; for a in "$@"; do out="$a"; done; echo data > "$out""#);
            let (tx, rx) = mpsc::channel(64);

            let cmd = command(&dir);
            let run = FfmpegRunner::new(bin).with_timeout(5).run(&cmd, estimator(), tx).await;
            assert!(run.is_ok());
            assert!(cmd.output().exists());

            let seen = drain(rx).await;
            assert_eq!(seen.first(), Some(&40));
            assert_eq!(seen.last(), Some(&80));
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }

        #[tokio::test]
        async fn test_nonzero_exit_carries_stderr() {
            let dir = TempDir::new().unwrap();
            let bin = stub(&dir, "fail.sh", "echo boom >&2; exit 1");
            let (tx, _rx) = mpsc::channel(64);

            let err = FfmpegRunner::new(bin)
                .with_timeout(5)
                .run(&command(&dir), estimator(), tx)
                .await
                .unwrap_err();

            match err {
                MediaError::FfmpegFailed { stderr, exit_code, .. } => {
                    assert_eq!(exit_code, Some(1));
                    assert!(stderr.unwrap_or_default().contains("boom"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_zero_exit_without_output() {
            let dir = TempDir::new().unwrap();
            let bin = stub(&dir, "noop.sh", "exit 0");
            let (tx, _rx) = mpsc::channel(64);

            let err = FfmpegRunner::new(bin)
                .run(&command(&dir), estimator(), tx)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::MissingOutput(_)));
        }

        #[tokio::test]
        async fn test_inherited_stderr_does_not_block_exit() {
            let dir = TempDir::new().unwrap();
            let bin = stub(
                &dir,
                "detach.sh",
                r#"sleep 30 >&2 & for a in "$@"; do out="$a"; done; echo data > "$out""#,
            );
            let (tx, _rx) = mpsc::channel(64);

            let started = std::time::Instant::now();
            let run = FfmpegRunner::new(bin)
                .with_timeout(20)
                .run(&command(&dir), estimator(), tx)
                .await;
            assert!(run.is_ok());
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_zero_tick_estimator_runs() {
            let dir = TempDir::new().unwrap();
            let bin = stub(&dir, "ok.sh", r#"sleep 0.05; for a in "$@"; do out="$a"; done; echo data > "$out""#);
            let (tx, rx) = mpsc::channel(1024);
            let fast = ProgressEstimator::new(40, 80, 2, Duration::ZERO);

            let run = FfmpegRunner::new(bin).with_timeout(5).run(&command(&dir), fast, tx).await;
            assert!(run.is_ok());
            assert_eq!(drain(rx).await.last(), Some(&80));
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let dir = TempDir::new().unwrap();
            let pidfile = dir.path().join("pid");
            let bin = stub(
                &dir,
                "hang.sh",
                &format!("echo $$ > {}; exec sleep 30", pidfile.display()),
            );
            let (tx, rx) = mpsc::channel(64);
            let slow = ProgressEstimator::new(40, 80, 2, Duration::from_millis(200));

            let err = FfmpegRunner::new(bin)
                .with_timeout(1)
                .run(&command(&dir), slow, tx)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Timeout(1)));

            let pid = std::fs::read_to_string(&pidfile).unwrap();
            let proc_path = format!("/proc/{}", pid.trim());
            assert!(!std::path::Path::new(&proc_path).exists());

            // Sender dropped with the run; nothing else arrives.
            let seen = drain(rx).await;
            assert!(seen.iter().all(|p| *p < 80));
        }

        #[tokio::test]
        async fn test_dropped_receiver_cancels() {
            let dir = TempDir::new().unwrap();
            let bin = stub(&dir, "slow.sh", "exec sleep 30");
            let (tx, mut rx) = mpsc::channel(64);

            let runner = FfmpegRunner::new(bin).with_timeout(30);
            let cmd = command(&dir);
            let handle = tokio::spawn(async move { runner.run(&cmd, estimator(), tx).await });

            assert_eq!(rx.recv().await, Some(40));
            drop(rx);

            let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
            assert!(matches!(result, Err(MediaError::Cancelled)));
        }
    }
}
