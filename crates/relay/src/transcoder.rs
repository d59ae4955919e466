use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::error::{JobError, JobResult};
use crate::pipeline::TransformPlan;
use crate::progress::ProgressChannel;

/// Lines of process stderr kept for error messages
pub(crate) const STDERR_TAIL_LINES: usize = 20;
const FEED_CHUNK: usize = 64 * 1024;
/// How long a finished transform waits for its feeder to report
const FEED_GRACE: Duration = Duration::from_millis(250);

pub type TransformInput = Box<dyn AsyncRead + Send + Unpin>;
pub type TransformOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Task that resolves when a transform exits
pub struct TransformCompletion(JoinHandle<JobResult<()>>);

impl TransformCompletion {
    pub fn new(task: JoinHandle<JobResult<()>>) -> Self {
        TransformCompletion(task)
    }

    pub async fn wait(self) -> JobResult<()> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => Err(JobError::Conversion(format!("transform task failed: {}", e))),
        }
    }
}

/// A running transform: its output stream and its completion
pub struct TransformHandle {
    pub output: TransformOutput,
    pub completion: TransformCompletion,
}

/// Why feeding a process stopped before the end of its input
#[derive(Debug)]
pub(crate) enum FeedError {
    /// Reading the input failed
    Source(io::Error),
    /// The process stopped accepting input, usually because it exited
    Process(io::Error),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Source(e) => write!(f, "reading source: {}", e),
            FeedError::Process(e) => write!(f, "writing to process: {}", e),
        }
    }
}

/// Copy `input` into a process's stdin, keeping read and write failures apart
pub(crate) async fn feed_process<R, W>(input: &mut R, stdin: &mut W) -> Result<u64, FeedError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; FEED_CHUNK];
    let mut fed = 0u64;
    loop {
        let n = input.read(&mut buf).await.map_err(FeedError::Source)?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await.map_err(FeedError::Process)?;
        fed += n as u64;
    }
    stdin.flush().await.map_err(FeedError::Process)?;
    Ok(fed)
}

/// Log a process's stderr at debug level and keep its last `max_lines` lines
pub(crate) async fn stderr_tail<R>(stderr: R, max_lines: usize, tool: &str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(max_lines);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("  {} dbg: {}", tool, line);
        if tail.len() == max_lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Starts the transform stage of a job
pub trait Transformer: Send + Sync {
    /// Start transforming `input` according to `plan`.
    ///
    /// The progress channel, if any, must be kept open until the transform
    /// exits and closed afterwards whatever the outcome. Cancelling `cancel`
    /// must terminate the transform early. A failure reading `input` ends the
    /// transform with [`JobError::Download`].
    fn start(
        &self,
        plan: &TransformPlan,
        input: TransformInput,
        progress: Option<ProgressChannel>,
        cancel: CancellationToken,
    ) -> JobResult<TransformHandle>;
}

/// Transformer backed by the ffmpeg executable reading stdin and writing stdout
#[derive(Debug, Clone)]
pub struct FfmpegTransformer {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegTransformer {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        FfmpegTransformer { ffmpeg_bin: ffmpeg_bin.into() }
    }
}

impl Transformer for FfmpegTransformer {
    fn start(
        &self,
        plan: &TransformPlan,
        input: TransformInput,
        progress: Option<ProgressChannel>,
        cancel: CancellationToken,
    ) -> JobResult<TransformHandle> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        if let Some(channel) = &progress {
            cmd.arg("-progress").arg(channel.endpoint());
        }
        cmd.args(&plan.args);

        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), plan.args.join(" "));
        spawn_transform(cmd, input, progress, cancel)
    }
}

/// Spawn a transform process wired through pipes.
///
/// Feeding stdin, collecting stderr and waiting for exit each run on their
/// own task, so a full pipe in one direction never stalls the others. The
/// caller drains [`TransformHandle::output`] concurrently with waiting.
pub(crate) fn spawn_transform(
    mut cmd: Command,
    input: TransformInput,
    progress: Option<ProgressChannel>,
    cancel: CancellationToken,
) -> JobResult<TransformHandle> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| JobError::Conversion(format!("failed to start transform: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| JobError::Conversion("failed to capture transform stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JobError::Conversion("failed to capture transform stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| JobError::Conversion("failed to capture transform stderr".to_string()))?;

    let feed_cancel = cancel.clone();
    let mut feeder = tokio::spawn(async move {
        let mut input = input;
        let fed = tokio::select! {
            _ = feed_cancel.cancelled() => Ok(0),
            res = feed_process(&mut input, &mut stdin) => res,
        };
        // Dropping stdin here signals end of input
        drop(stdin);
        fed
    });

    let stderr_task = tokio::spawn(stderr_tail(stderr, STDERR_TAIL_LINES, "ffmpeg"));

    let completion = tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                warn!("  transform canceled, killing process");
                if let Err(e) = child.kill().await {
                    warn!("  failed to kill transform process: {}", e);
                }
                feeder.abort();
                drop(progress);
                return Err(JobError::Canceled);
            }
        };

        // The source may still be streaming even though the process is gone
        let waited = tokio::time::timeout(FEED_GRACE, &mut feeder).await;
        let fed = match waited {
            Ok(Ok(fed)) => fed,
            Ok(Err(e)) => {
                warn!("  transform feeder task failed: {}", e);
                Ok(0)
            }
            Err(_) => {
                feeder.abort();
                debug!("  transform exited before its input ended");
                Ok(0)
            }
        };
        drop(progress);

        let stderr = stderr_task.await.unwrap_or_default();
        let status = status
            .map_err(|e| JobError::Conversion(format!("failed to wait for transform: {}", e)))?;

        match fed {
            Ok(n) => debug!("  fed {} bytes to transform", n),
            Err(FeedError::Source(e)) => {
                return Err(JobError::Download(format!("reading source: {}", e)));
            }
            Err(e @ FeedError::Process(_)) => debug!("  stopped feeding transform: {}", e),
        }

        if !status.success() {
            return Err(JobError::Conversion(format!(
                "exit code {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        info!("  transform finished");
        Ok(())
    });

    Ok(TransformHandle {
        output: Box::new(stdout),
        completion: TransformCompletion::new(completion),
    })
}
