use std::fmt;
use async_trait::async_trait;
use humansize::{format_size, DECIMAL};
use log::info;
use serde::{Deserialize, Serialize};
use crate::inspector::MediaProfile;

pub const PROCESS_START: &str = "🔍 Getting information...";
pub const PROBING: &str = "🎬 Getting video format...";
pub const PREPARING: &str = "🎬 Preparing conversion...";
pub const CONVERTING: &str = "🔨 Converting";
pub const UPLOADING: &str = "⬆️ Uploading";
pub const DONE: &str = "🏁 Done";
pub const CANCELED: &str = "❌ Canceled";
pub const TIMED_OUT: &str = "⌛ Timed out";
pub const ERROR: &str = "❌ Error";

pub const PROGRESS_BAR_LENGTH: usize = 10;

/// Who submitted a request, resolved once at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Submitter {
    /// Direct request from a user
    User { user_id: i64, username: Option<String> },
    /// Request posted by a user inside a group
    Group { chat_id: i64, user_id: i64, username: Option<String> },
}

impl Submitter {
    pub fn user_id(&self) -> i64 {
        match self {
            Submitter::User { user_id, .. } | Submitter::Group { user_id, .. } => *user_id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Submitter::User { username, .. } | Submitter::Group { username, .. } => username.as_deref(),
        }
    }
}

impl fmt::Display for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.username() {
            Some(name) => write!(f, "{}#{}", name, self.user_id())?,
            None => write!(f, "#{}", self.user_id())?,
        }
        if let Submitter::Group { chat_id, .. } = self {
            write!(f, " in group #{}", chat_id)?;
        }
        Ok(())
    }
}

/// The single mutable reply a submitter sees for one job
#[async_trait]
pub trait StatusReply: Send + Sync {
    /// Replace the reply text. Delivery failures are the implementation's concern.
    async fn edit(&self, text: &str);
}

/// Status reply that writes every edit to the log
#[derive(Debug, Clone)]
pub struct LogReply {
    pub label: String,
}

impl LogReply {
    pub fn new(label: impl Into<String>) -> Self {
        LogReply { label: label.into() }
    }
}

#[async_trait]
impl StatusReply for LogReply {
    async fn edit(&self, text: &str) {
        info!("[{}] {}", self.label, text.replace('\n', " | "));
    }
}

/// Render e.g. `▰▰▰▱▱▱▱▱▱▱ 30%`
pub fn progress_bar(percent: i32, len: usize) -> String {
    let percent = percent.clamp(0, 100);
    let step = (100 / len.max(1)).max(1) as i32;
    let filled = ((percent / step) as usize).min(len);

    let mut bar = String::new();
    bar.push_str(&"▰".repeat(filled));
    bar.push_str(&"▱".repeat(len - filled));
    bar.push_str(&format!(" {}%", percent));
    bar
}

pub fn queue_position(pos: usize) -> String {
    format!("👨‍👦‍👦 Request queued at position #{}", pos)
}

/// Human readable payload size, e.g. `12.3 MB`
pub fn payload_size(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Source codec summary shown beneath every progress line
pub fn source_info(profile: &MediaProfile) -> String {
    let mut info = String::from("🎬 Source: ");

    let video = profile.video_codec_list();
    let audio = profile.audio_codec_list();
    match (video.is_empty(), audio.is_empty()) {
        (false, false) => info.push_str(&format!("{} / {}", video, audio)),
        (false, true) => info.push_str(&format!("{}, no audio", video)),
        (true, false) => info.push_str(&audio),
        (true, true) => info.push_str("no audio"),
    }

    let actions = profile.actions_needed();
    if actions.is_empty() {
        info.push_str(" (no conversion needed)");
    } else {
        info.push_str(&format!(" (converting: {})", actions));
    }
    info
}

/// Text for a progress update of the current phase
pub fn progress_text(label: &str, percent: i32, size: Option<&str>, source_info: &str) -> String {
    let mut text = if percent < 0 {
        format!("{}... (no progress available)", label)
    } else if percent == 0 {
        format!("{}...", label)
    } else {
        format!("{}: {}", label, progress_bar(percent, PROGRESS_BAR_LENGTH))
    };

    if let Some(size) = size {
        text.push_str(&format!(" ({})", size));
    }
    if !source_info.is_empty() {
        text.push('\n');
        text.push_str(source_info);
    }
    text
}
