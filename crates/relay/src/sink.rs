use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use crate::error::{JobError, JobResult, UploadError};
use crate::inspector::OutputKind;
use crate::status::payload_size;

const READ_CHUNK: usize = 64 * 1024;
const WRITE_CHUNK: usize = 512 * 1024;
const RESERVED_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
/// NAME_MAX on common filesystems
const MAX_FILENAME_BYTES: usize = 255;
/// Room kept for a ` (n)` de-duplication suffix
const DEDUP_SUFFIX_BYTES: usize = 12;

/// Reports `(bytes delivered, total bytes)`
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A finished, fully buffered transform output
#[derive(Debug, Clone)]
pub struct Payload {
    pub data: Bytes,
    pub filename: String,
    pub title: String,
    pub kind: OutputKind,
}

impl Payload {
    pub fn new(data: Bytes, title: &str, extension: &str, kind: OutputKind) -> Self {
        Payload {
            data,
            filename: sanitize_filename(title, extension),
            title: title.to_string(),
            kind,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Delivery client for finished payloads
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(
        &self,
        payload: &Payload,
        progress: ByteProgress,
        cancel: &CancellationToken,
    ) -> JobResult<()>;
}

/// Build a filesystem-safe `<title>.<ext>`.
///
/// The stem is cut on a char boundary so the name, including a later
/// ` (n)` suffix, stays within [`MAX_FILENAME_BYTES`].
pub fn sanitize_filename(title: &str, extension: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if RESERVED_FILENAME_CHARS.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    let max_stem = MAX_FILENAME_BYTES.saturating_sub(DEDUP_SUFFIX_BYTES + 1 + extension.len());
    let cleaned = truncate_bytes(cleaned.trim().trim_start_matches('.'), max_stem).trim_end();
    let stem = if cleaned.is_empty() { "download" } else { cleaned };
    format!("{}.{}", stem, extension)
}

fn truncate_bytes(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Buffer a transform's whole output.
///
/// Fails with [`UploadError::TooLarge`] as soon as `max_bytes` (0 = unlimited)
/// would be exceeded, before anything is handed to the sink.
pub async fn collect_payload<R>(reader: &mut R, max_bytes: u64, cancel: &CancellationToken) -> JobResult<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut data = BytesMut::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Canceled),
            read = reader.read(&mut chunk) => read
                .map_err(|e| JobError::Conversion(format!("reading transform output: {}", e)))?,
        };
        if n == 0 {
            break;
        }
        if max_bytes > 0 && (data.len() + n) as u64 > max_bytes {
            return Err(UploadError::TooLarge { limit: payload_size(max_bytes) }.into());
        }
        data.extend_from_slice(&chunk[..n]);
    }

    debug!("  got {} bytes of output", data.len());
    Ok(data.freeze())
}

/// Sink that writes payloads into a local directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    pub dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySink { dir: dir.into() }
    }

    /// Create the first free path for `filename`, adding ` (n)` before the
    /// extension when taken
    async fn create_unique(&self, filename: &str) -> io::Result<(PathBuf, File)> {
        let path = Path::new(filename);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("download");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("bin");

        let mut n = 0u32;
        loop {
            let candidate = if n == 0 {
                self.dir.join(filename)
            } else {
                self.dir.join(format!("{} ({}).{}", stem, n, ext))
            };
            match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_chunks(
        &self,
        mut file: File,
        path: &Path,
        payload: &Payload,
        progress: &ByteProgress,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let sink_err = |e: io::Error| -> JobError {
            UploadError::Sink(format!("writing {}: {}", path.display(), e)).into()
        };

        let total = payload.len();
        let mut written = 0u64;

        for chunk in payload.data.chunks(WRITE_CHUNK) {
            if cancel.is_cancelled() {
                return Err(JobError::Canceled);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Canceled),
                res = file.write_all(chunk) => res.map_err(sink_err)?,
            }
            written += chunk.len() as u64;
            progress(written, total);
        }

        file.flush().await.map_err(sink_err)?;
        Ok(())
    }
}

#[async_trait]
impl Sink for DirectorySink {
    async fn deliver(
        &self,
        payload: &Payload,
        progress: ByteProgress,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            JobError::from(UploadError::Sink(format!("creating {}: {}", self.dir.display(), e)))
        })?;

        let (path, file) = self.create_unique(&payload.filename).await.map_err(|e| {
            JobError::from(UploadError::Sink(format!(
                "creating {} in {}: {}",
                payload.filename,
                self.dir.display(),
                e
            )))
        })?;
        info!("  delivering {} ({}) to {}", payload.filename, payload.kind, path.display());

        let result = self.write_chunks(file, &path, payload, &progress, cancel).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("  failed to remove partial file {}: {}", path.display(), e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My clip: part 1/2", "mp4"), "My clip  part 1 2.mp4");
        assert_eq!(sanitize_filename("  ", "mp3"), "download.mp3");
        assert_eq!(sanitize_filename("..hidden", "mp3"), "hidden.mp3");
    }

    #[test]
    fn test_long_multibyte_title_fits_name_limit() {
        let title = "日本語のタイトル".repeat(12);
        let name = sanitize_filename(&title, "mp4");
        assert!(name.len() + DEDUP_SUFFIX_BYTES <= MAX_FILENAME_BYTES, "{} bytes", name.len());
        assert!(name.ends_with(".mp4"));
        assert!(title.starts_with(name.trim_end_matches(".mp4")));
    }

    #[tokio::test]
    async fn test_directory_sink_accepts_long_titles() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let payload = Payload::new(Bytes::from_static(b"abc"), &"日本語のタイトル".repeat(12), "mp4", OutputKind::Video);

        sink.deliver(&payload, Arc::new(|_, _| {}), &CancellationToken::new()).await.unwrap();
        sink.deliver(&payload, Arc::new(|_, _| {}), &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp3"), b"old").unwrap();
        std::fs::write(dir.path().join("clip (1).mp3"), b"old").unwrap();
        let sink = DirectorySink::new(dir.path());
        let payload = Payload::new(Bytes::from_static(b"new"), "clip", "mp3", OutputKind::Audio);

        sink.deliver(&payload, Arc::new(|_, _| {}), &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("clip.mp3")).unwrap(), b"old");
        assert_eq!(std::fs::read(dir.path().join("clip (2).mp3")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_collect_within_limit() {
        let mut reader = Cursor::new(vec![5u8; 300_000]);
        let data = collect_payload(&mut reader, 300_000, &CancellationToken::new()).await.unwrap();
        assert_eq!(data.len(), 300_000);
    }

    #[tokio::test]
    async fn test_collect_over_limit_fails() {
        let mut reader = Cursor::new(vec![5u8; 300_001]);
        let err = collect_payload(&mut reader, 300_000, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::Upload(UploadError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_collect_canceled() {
        let (_writer, mut reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collect_payload(&mut reader, 0, &cancel).await.unwrap_err();
        assert_eq!(err, JobError::Canceled);
    }

    #[tokio::test]
    async fn test_directory_sink_writes_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));
        let payload = Payload::new(Bytes::from(vec![1u8; 1_200_000]), "clip", "mp4", OutputKind::Video);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let progress: ByteProgress = Arc::new(move |sent: u64, total: u64| seen_cb.lock().unwrap().push((sent, total)));

        sink.deliver(&payload, progress.clone(), &CancellationToken::new()).await.unwrap();
        sink.deliver(&payload, progress, &CancellationToken::new()).await.unwrap();

        let first = std::fs::read(dir.path().join("out/clip.mp4")).unwrap();
        assert_eq!(first.len(), 1_200_000);
        assert!(dir.path().join("out/clip (1).mp4").exists());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (524_288, 1_200_000));
        assert_eq!(seen[2], (1_200_000, 1_200_000));
    }

    #[tokio::test]
    async fn test_directory_sink_canceled_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let payload = Payload::new(Bytes::from_static(b"abc"), "clip", "mp3", OutputKind::Audio);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sink.deliver(&payload, Arc::new(|_, _| {}), &cancel).await.unwrap_err();
        assert_eq!(err, JobError::Canceled);
        assert!(!dir.path().join("clip.mp3").exists());
    }
}
