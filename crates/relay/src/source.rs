use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use crate::error::{JobError, JobResult};
use crate::transcoder::{stderr_tail, STDERR_TAIL_LINES};

/// Resolution cap used when selecting a download format
const MAX_HEIGHT: u32 = 720;

pub type SourceStream = Box<dyn AsyncRead + Send + Unpin>;

/// A resolved remote source: its title and a read-once byte stream
pub struct FetchedSource {
    pub title: String,
    pub stream: SourceStream,
}

/// Resolves a URL into a byte stream
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> JobResult<FetchedSource>;
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
}

/// Stdout of a downloader process.
///
/// End of stream is reported only after the process exited successfully; a
/// nonzero exit turns the final read into an error carrying the stderr tail.
/// The process is killed when the stream is dropped.
pub struct ChildStream {
    stdout: ChildStdout,
    exit: Option<oneshot::Receiver<Result<(), String>>>,
    _kill: DropGuard,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stdout).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let Some(exit) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let exited = ready!(Pin::new(exit).poll(cx));
        this.exit = None;
        match exited {
            Ok(Ok(())) => Poll::Ready(Ok(())),
            Ok(Err(msg)) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, msg))),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "downloader exit status unavailable",
            ))),
        }
    }
}

/// Source fetcher backed by the yt-dlp executable
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    pub ytdlp_bin: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(ytdlp_bin: impl Into<PathBuf>) -> Self {
        YtDlpFetcher { ytdlp_bin: ytdlp_bin.into() }
    }

    async fn fetch_title(&self, url: &str, cancel: &CancellationToken) -> JobResult<String> {
        let mut cmd = Command::new(&self.ytdlp_bin);
        cmd.arg("-J")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Canceled),
            output = cmd.output() => output
                .map_err(|e| JobError::Download(format!("preparing download {:?}: {}", url, e)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Download(format!("preparing download {:?}: {}", url, stderr.trim())));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| JobError::Download(format!("decoding info for {:?}: {}", url, e)))?;
        Ok(info.title.unwrap_or_else(|| "download".to_string()))
    }

    fn stream_command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.ytdlp_bin);
        cmd.arg("--no-playlist")
            .arg("--no-part")
            .arg("-q")
            .arg("-f")
            .arg(format!("b[height<={}]/b", MAX_HEIGHT))
            .arg("-o")
            .arg("-")
            .arg(url);
        cmd
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> JobResult<FetchedSource> {
        let title = self.fetch_title(url, cancel).await?;
        info!("  downloading {:?} ({})", title, url);

        let stream = spawn_stream(self.stream_command(url))?;
        Ok(FetchedSource {
            title,
            stream: Box::new(stream),
        })
    }
}

/// Spawn a process and expose its stdout; stderr lines are logged at debug level
pub(crate) fn spawn_stream(mut cmd: Command) -> JobResult<ChildStream> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| JobError::Download(format!("failed to start downloader: {}", e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JobError::Download("failed to capture downloader stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| JobError::Download("failed to capture downloader stderr".to_string()))?;

    let kill = CancellationToken::new();
    let guard = kill.clone().drop_guard();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tail, status) = tokio::select! {
            _ = kill.cancelled() => {
                if let Err(e) = child.kill().await {
                    debug!("  failed to kill downloader: {}", e);
                }
                return;
            }
            exited = async { tokio::join!(stderr_tail(stderr, STDERR_TAIL_LINES, "yt-dlp"), child.wait()) } => exited,
        };

        let exited = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("downloader {}: {}", status, tail.trim())),
            Err(e) => Err(format!("failed to wait for downloader: {}", e)),
        };
        // The stream may already be gone
        let _ = tx.send(exited);
    });

    Ok(ChildStream { stdout, exit: Some(rx), _kill: guard })
}
