use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::error::{JobError, JobResult};
use crate::transcoder::{feed_process, FeedError};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    #[serde(default)]
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    /// Decimal seconds as printed by ffprobe; may be missing or "N/A" on piped input
    pub duration: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    pub index: Option<i32>,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
}

impl FFProbeFormat {
    /// Container duration in seconds. Unparsable values are treated as absent.
    pub fn duration_secs(&self) -> Option<f64> {
        let raw = self.duration.as_deref()?;
        match raw.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() => Some(secs),
            Ok(_) => None,
            Err(e) => {
                warn!("ffprobe: error parsing duration {:?}: {}", raw, e);
                None
            }
        }
    }
}

impl FFProbeData {
    pub fn from_json(json: &str) -> JobResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| JobError::Probe(format!("error decoding probe result: {}", e)))
    }
}

/// Produces stream metadata from a bounded prefix of a media stream
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(
        &self,
        prefix: &mut (dyn AsyncRead + Unpin + Send),
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> JobResult<FFProbeData>;
}

/// Metadata probe backed by the ffprobe executable reading from stdin
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    pub ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        FfprobeProbe { ffprobe_bin: ffprobe_bin.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg("-i")
            .arg("pipe:0");
        cmd
    }
}

#[async_trait]
impl MetadataProbe for FfprobeProbe {
    async fn probe(
        &self,
        prefix: &mut (dyn AsyncRead + Unpin + Send),
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> JobResult<FFProbeData> {
        debug!("ffprobe: probing stream with {}", self.ffprobe_bin.display());
        let json = run_probe_command(self.command(), prefix, timeout, cancel).await?;
        FFProbeData::from_json(&json)
    }
}

/// Run a probe command, feeding `prefix` on its stdin and returning its stdout.
///
/// The process is killed when the timeout expires or `cancel` fires.
pub(crate) async fn run_probe_command(
    mut cmd: Command,
    prefix: &mut (dyn AsyncRead + Unpin + Send),
    timeout: Duration,
    cancel: &CancellationToken,
) -> JobResult<String> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| JobError::Probe(format!("failed to start probe: {}", e)))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| JobError::Probe("failed to capture probe stdin".to_string()))?;

    let feed = async move {
        let fed = feed_process(prefix, &mut stdin).await;
        drop(stdin);
        fed
    };
    let run = async { tokio::join!(feed, child.wait_with_output()) };

    let (fed, output) = tokio::select! {
        _ = cancel.cancelled() => return Err(JobError::Canceled),
        res = tokio::time::timeout(timeout, run) => res.map_err(|_| {
            JobError::Probe(format!("timed out after {} seconds", timeout.as_secs()))
        })?,
    };

    match fed {
        Ok(n) => debug!("ffprobe: fed {} bytes", n),
        Err(FeedError::Source(e)) => return Err(JobError::Download(format!("reading source: {}", e))),
        // The probe usually exits as soon as it has seen enough, closing its stdin
        Err(e @ FeedError::Process(_)) => debug!("ffprobe: stopped feeding input: {}", e),
    }

    let output = output.map_err(|e| JobError::Probe(format!("failed to wait for probe: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(JobError::Probe(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|_| JobError::Probe("probe output is not valid UTF-8".to_string()))
}
