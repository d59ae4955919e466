use crate::inspector::{MediaProfile, OutputKind};

/// Quality factor used when the video stream has to be re-encoded
pub const VIDEO_CRF: u8 = 30;
/// Encoder preset used when the video stream has to be re-encoded
pub const VIDEO_PRESET: &str = "veryfast";
/// Fixed bitrate for audio-only output
pub const AUDIO_ONLY_BITRATE: &str = "320k";

/// Transform invocation derived from a media profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformPlan {
    /// ffmpeg muxer name
    pub container: &'static str,
    /// Extension for the delivered file
    pub file_extension: &'static str,
    /// Full ffmpeg argument list, reading stdin and writing stdout
    pub args: Vec<String>,
}

/// Build the transform invocation for a profile.
///
/// Pure and deterministic: the same profile and output kind always produce
/// the same argument list.
pub fn build_transform_plan(profile: &MediaProfile, kind: OutputKind) -> TransformPlan {
    let container = match kind {
        OutputKind::Video => "mp4",
        OutputKind::Audio => "mp3",
    };

    let mut args = Vec::new();

    args.push("-hide_banner".to_string());
    args.push("-loglevel".to_string());
    args.push("error".to_string());

    // Input is the replayed source stream
    args.push("-i".to_string());
    args.push("pipe:0".to_string());

    args.push("-f".to_string());
    args.push(container.to_string());

    match kind {
        OutputKind::Video => {
            // Fragmented mp4 so the consumer can read before the end of the container is written
            args.push("-movflags".to_string());
            args.push("frag_keyframe+empty_moov+faststart".to_string());

            args.push("-c:v".to_string());
            if profile.needs_video_transcode {
                args.push("libx264".to_string());
                args.push("-crf".to_string());
                args.push(VIDEO_CRF.to_string());
                args.push("-preset".to_string());
                args.push(VIDEO_PRESET.to_string());
            } else {
                args.push("copy".to_string());
            }
        }
        OutputKind::Audio => {
            args.push("-vn".to_string());
        }
    }

    args.push("-c:a".to_string());
    if profile.needs_audio_transcode {
        args.push("libmp3lame".to_string());
        match kind {
            OutputKind::Audio => {
                args.push("-b:a".to_string());
                args.push(AUDIO_ONLY_BITRATE.to_string());
            }
            OutputKind::Video => {
                args.push("-q:a".to_string());
                args.push("0".to_string());
            }
        }
    } else {
        args.push("copy".to_string());
    }

    // Pick the first stream of each kind when the source carries several
    match kind {
        OutputKind::Video => {
            if profile.needs_single_video_stream || profile.needs_single_audio_stream {
                args.push("-map".to_string());
                args.push("0:v:0".to_string());
                if profile.has_audio() {
                    args.push("-map".to_string());
                    args.push("0:a:0".to_string());
                }
            }
        }
        OutputKind::Audio => {
            if profile.needs_single_audio_stream {
                args.push("-map".to_string());
                args.push("0:a:0".to_string());
            }
        }
    }

    args.push("pipe:1".to_string());

    TransformPlan {
        container,
        file_extension: container,
        args,
    }
}
