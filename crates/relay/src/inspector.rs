use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use crate::error::{JobResult, ValidationError};
use crate::probe::{FFProbeData, MetadataProbe};
use crate::replay::ReplayBuffer;

const COMPATIBLE_VIDEO_CODECS: &[&str] = &["h264", "vp9", "hevc"];
const COMPATIBLE_AUDIO_CODECS: &[&str] = &["aac", "opus", "mp3"];
const COMPATIBLE_AUDIO_ONLY_CODECS: &[&str] = &["mp3"];

/// What the submitter asked to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Video,
    Audio,
}

impl OutputKind {
    /// Video codecs that can be delivered without re-encoding
    pub fn compatible_video_codecs(&self) -> &'static [&'static str] {
        match self {
            OutputKind::Video => COMPATIBLE_VIDEO_CODECS,
            OutputKind::Audio => &[],
        }
    }

    /// Audio codecs that can be delivered without re-encoding
    pub fn compatible_audio_codecs(&self) -> &'static [&'static str] {
        match self {
            OutputKind::Video => COMPATIBLE_AUDIO_CODECS,
            OutputKind::Audio => COMPATIBLE_AUDIO_ONLY_CODECS,
        }
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, OutputKind::Video)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Video => write!(f, "video"),
            OutputKind::Audio => write!(f, "audio"),
        }
    }
}

/// Stream compatibility summary for one job
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaProfile {
    /// Codec names of every considered video stream, in encounter order
    pub video_codecs: Vec<String>,
    /// Codec names of every audio stream, in encounter order
    pub audio_codecs: Vec<String>,
    pub needs_video_transcode: bool,
    pub needs_single_video_stream: bool,
    pub needs_audio_transcode: bool,
    pub needs_single_audio_stream: bool,
    /// Container duration in seconds, if ffprobe reported a usable one
    pub duration: Option<f64>,
}

impl MediaProfile {
    /// Derive transcode requirements from probe output.
    ///
    /// Only the first stream of each kind is checked for compatibility; any
    /// further stream of that kind requires explicit single-stream selection.
    /// Video streams are ignored entirely for audio output.
    pub fn from_probe(data: &FFProbeData, kind: OutputKind) -> Result<Self, ValidationError> {
        let compatible_video = kind.compatible_video_codecs();
        let compatible_audio = kind.compatible_audio_codecs();

        let mut profile = MediaProfile {
            duration: data.format.duration_secs(),
            ..Default::default()
        };

        let mut got_video_stream = false;
        let mut got_audio_stream = false;

        for stream in &data.streams {
            let codec = stream.codec_name.as_deref().unwrap_or("unknown");

            match stream.codec_type.as_deref() {
                Some("video") if kind.wants_video() => {
                    profile.video_codecs.push(codec.to_string());

                    if got_video_stream {
                        debug!("    got additional video stream");
                        profile.needs_single_video_stream = true;
                    } else {
                        if !compatible_video.contains(&codec) {
                            debug!("    found incompatible video codec: {}", codec);
                            profile.needs_video_transcode = true;
                        } else {
                            debug!("    found video codec: {}", codec);
                        }
                        got_video_stream = true;
                    }
                }
                Some("audio") => {
                    profile.audio_codecs.push(codec.to_string());

                    if got_audio_stream {
                        debug!("    got additional audio stream");
                        profile.needs_single_audio_stream = true;
                    } else {
                        if !compatible_audio.contains(&codec) {
                            debug!("    found incompatible audio codec: {}", codec);
                            profile.needs_audio_transcode = true;
                        } else {
                            debug!("    found audio codec: {}", codec);
                        }
                        got_audio_stream = true;
                    }
                }
                _ => {}
            }
        }

        if kind.wants_video() && !got_video_stream {
            return Err(ValidationError::NoVideoStream);
        }

        Ok(profile)
    }

    pub fn video_codec_list(&self) -> String {
        self.video_codecs.join(", ")
    }

    pub fn audio_codec_list(&self) -> String {
        self.audio_codecs.join(", ")
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_codecs.is_empty()
    }

    pub fn video_needs_work(&self) -> bool {
        self.needs_video_transcode || self.needs_single_video_stream
    }

    pub fn audio_needs_work(&self) -> bool {
        self.needs_audio_transcode || self.needs_single_audio_stream
    }

    /// Stream kinds that will be re-encoded or re-selected, e.g. "video, audio"
    pub fn actions_needed(&self) -> String {
        let mut actions = Vec::new();
        if self.video_needs_work() {
            actions.push("video");
        }
        if self.audio_needs_work() {
            actions.push("audio");
        }
        actions.join(", ")
    }
}

/// Runs the metadata probe over a bounded prefix of a replayable stream
pub struct StreamInspector {
    probe: Arc<dyn MetadataProbe>,
    max_probe_bytes: u64,
    timeout: Duration,
}

impl StreamInspector {
    pub fn new(probe: Arc<dyn MetadataProbe>, max_probe_bytes: u64, timeout: Duration) -> Self {
        StreamInspector { probe, max_probe_bytes, timeout }
    }

    /// Inspect the start of `source` and decide what needs transcoding.
    ///
    /// `source` is switched to replay mode on every return path, so the
    /// transform stage always reads from offset zero.
    pub async fn inspect<R>(
        &self,
        source: &mut ReplayBuffer<R>,
        kind: OutputKind,
        cancel: &CancellationToken,
    ) -> JobResult<MediaProfile>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.inspect_prefix(source, kind, cancel).await;
        source.start_replay();
        result
    }

    async fn inspect_prefix<R>(
        &self,
        source: &mut ReplayBuffer<R>,
        kind: OutputKind,
        cancel: &CancellationToken,
    ) -> JobResult<MediaProfile>
    where
        R: AsyncRead + Unpin + Send,
    {
        info!("  probing file (up to {} bytes)...", self.max_probe_bytes);

        let mut prefix = (&mut *source).take(self.max_probe_bytes);
        let data = self.probe.probe(&mut prefix, self.timeout, cancel).await?;

        let profile = MediaProfile::from_probe(&data, kind)?;
        if profile.duration.is_none() {
            info!("  no usable duration, progress percent will not be available");
        }
        Ok(profile)
    }
}
