use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use log::{debug, warn};
use regex::Regex;
use tokio::task::JoinHandle;

/// Receives transform progress in percent; `-1` means progress is unavailable
pub type PercentCallback = Arc<dyn Fn(i32) + Send + Sync>;

const END_MARKER: &str = "progress=end";
const READ_CHUNK: usize = 64;

fn out_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"out_time_ms=(\d+)\r?\n").expect("valid out_time_ms regex"))
}

/// Incremental parser for ffmpeg's `-progress` key=value stream.
///
/// Text is accumulated until it contains a complete `out_time_ms=` line.
/// Everything up to the last such line is consumed; the unconsumed tail is
/// kept so a value split across reads is never lost.
#[derive(Debug)]
pub struct ProgressParser {
    pending: String,
    duration_secs: f64,
    last_emitted: Option<i32>,
}

impl ProgressParser {
    pub fn new(duration_secs: f64) -> Self {
        ProgressParser {
            pending: String::new(),
            duration_secs,
            last_emitted: None,
        }
    }

    /// Feed one raw chunk; returns a percent only when it differs from the last one returned
    pub fn feed(&mut self, chunk: &[u8]) -> Option<i32> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut percent = None;

        let last = out_time_regex().captures_iter(&self.pending).last();
        if let Some(caps) = last {
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            if let Ok(micros) = caps[1].parse::<u64>() {
                percent = Some(self.percent_of(micros));
            }
            self.pending.drain(..end);
        }

        if self.pending.contains(END_MARKER) {
            percent = Some(100);
            self.pending.clear();
        }

        let percent = percent?;
        if self.last_emitted == Some(percent) {
            return None;
        }
        self.last_emitted = Some(percent);
        Some(percent)
    }

    fn percent_of(&self, micros: u64) -> i32 {
        let pct = 100.0 * micros as f64 / (self.duration_secs * 1_000_000.0);
        pct.clamp(0.0, 100.0) as i32
    }
}

/// Local socket a transform process streams its progress to.
///
/// Exactly one connection is accepted. The socket file is removed and the
/// reader task stopped when the channel is dropped.
pub struct ProgressChannel {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl ProgressChannel {
    /// Wire up live progress for a transform of known duration.
    ///
    /// With an unknown duration a single `-1` is reported and no endpoint is
    /// opened. Failing to open the endpoint only disables live progress.
    pub fn attach(dir: &Path, duration_secs: Option<f64>, on_percent: PercentCallback) -> Option<Self> {
        let duration = match duration_secs {
            Some(d) if d > 0.0 => d,
            _ => {
                on_percent(-1);
                return None;
            }
        };

        match Self::open(dir, duration, on_percent) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("    ffmpeg progress socket create error: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    pub fn open(dir: &Path, duration_secs: f64, on_percent: PercentCallback) -> io::Result<Self> {
        use tokio::io::AsyncReadExt;
        use tokio::net::UnixListener;

        let path = dir.join(format!("relay-progress-{}.sock", uuid::Uuid::new_v4()));
        let listener = UnixListener::bind(&path)?;
        debug!("    progress socket listening on {}", path.display());

        let task = tokio::spawn(async move {
            let mut stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("    ffmpeg progress socket accept error: {}", e);
                    return;
                }
            };

            let mut parser = ProgressParser::new(duration_secs);
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        if let Some(percent) = parser.feed(&buf[..n]) {
                            on_percent(percent);
                        }
                    }
                }
            }
        });

        Ok(ProgressChannel { path, task })
    }

    #[cfg(not(unix))]
    pub fn open(_dir: &Path, _duration_secs: f64, _on_percent: PercentCallback) -> io::Result<Self> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "progress sockets need unix domain sockets"))
    }

    /// Value for ffmpeg's `-progress` flag
    pub fn endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.task.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("    failed to remove progress socket {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<i32> {
        text.as_bytes().iter().filter_map(|b| parser.feed(&[*b])).collect()
    }

    #[test]
    fn test_half_way_byte_by_byte() {
        let mut parser = ProgressParser::new(10.0);
        assert_eq!(feed_all(&mut parser, "out_time_ms=5000000\n"), vec![50]);
    }

    #[test]
    fn test_last_match_in_chunk_wins() {
        let mut parser = ProgressParser::new(10.0);
        let chunk = b"frame=1\nout_time_ms=1000000\nframe=2\nout_time_ms=3000000\nspeed=1x\n";
        assert_eq!(parser.feed(chunk), Some(30));
    }

    #[test]
    fn test_value_split_across_reads() {
        let mut parser = ProgressParser::new(10.0);
        assert_eq!(parser.feed(b"out_time_ms=1000000\nout_time_ms=20"), Some(10));
        assert_eq!(parser.feed(b"00000\n"), Some(20));
    }

    #[test]
    fn test_end_marker_forces_100() {
        let mut parser = ProgressParser::new(10.0);
        assert_eq!(parser.feed(b"out_time_ms=2000000\n"), Some(20));
        assert_eq!(parser.feed(b"out_time_ms=2500000\nprogress=end\n"), Some(100));

        // A repeated end marker does not re-emit
        assert_eq!(parser.feed(b"progress=end\n"), None);
    }

    #[test]
    fn test_repeated_percent_is_deduplicated() {
        let mut parser = ProgressParser::new(100.0);
        assert_eq!(parser.feed(b"out_time_ms=1000000\n"), Some(1));
        assert_eq!(parser.feed(b"out_time_ms=1500000\n"), None);
        assert_eq!(parser.feed(b"out_time_ms=1900000\n"), None);
        assert_eq!(parser.feed(b"out_time_ms=2000000\n"), Some(2));
    }

    #[test]
    fn test_percent_is_clamped() {
        let mut parser = ProgressParser::new(1.0);
        assert_eq!(parser.feed(b"out_time_ms=3000000\n"), Some(100));
    }

    #[test]
    fn test_unknown_duration_reports_indeterminate_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: PercentCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        assert!(ProgressChannel::attach(Path::new("/nonexistent"), None, cb.clone()).is_none());
        assert!(ProgressChannel::attach(Path::new("/nonexistent"), Some(0.0), cb).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![-1, -1]);
    }

    #[tokio::test]
    async fn test_open_failure_degrades_to_no_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: PercentCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        let channel = ProgressChannel::attach(Path::new("/nonexistent/dir"), Some(10.0), cb);
        assert!(channel.is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    async fn next_percent(rx: &mut tokio::sync::mpsc::UnboundedReceiver<i32>) -> Option<i32> {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_delivers_percent_updates() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::UnixStream;
        use tokio::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cb: PercentCallback = Arc::new(move |p| {
            let _ = tx.send(p);
        });

        let channel = ProgressChannel::open(dir.path(), 10.0, cb).unwrap();
        assert!(channel.endpoint().starts_with("unix:"));
        let path = channel.path().to_path_buf();
        assert!(path.exists());

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b"frame=10\nout_time_ms=5000000\n").await.unwrap();
        assert_eq!(next_percent(&mut rx).await, Some(50));

        client.write_all(b"out_time_ms=5000000\nprogress=end\n").await.unwrap();
        assert_eq!(next_percent(&mut rx).await, Some(100));
        client.shutdown().await.unwrap();

        drop(channel);
        assert!(!path.exists());
    }
}
