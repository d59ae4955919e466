use std::fmt;
use std::path::Path;
use anyhow::{anyhow, Context, Result};
use log::info;
use tokio::process::Command;
use crate::config::RelayConfig;

/// Version of an external tool.
///
/// ffmpeg reports `N.N[.N]`, yt-dlp reports its release date as `YYYY.MM.DD`;
/// both parse into the same three numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// Parse the first version-looking word of a version line.
    /// Example: "ffmpeg version n6.1.1-static" -> 6.1.1
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.strip_prefix('n').unwrap_or(s))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Drop build suffixes like "-3ubuntu5" or "+git"
        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", version_part))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .with_context(|| format!("Failed to parse minor version from: {}", p))?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .with_context(|| format!("Failed to parse patch version from: {}", p))?,
            None => 0,
        };

        Ok(ToolVersion { major, minor, patch })
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Run `<bin> <flag>` and parse the first line of its output
pub async fn detect_version(bin: &Path, flag: &str) -> Result<ToolVersion> {
    let output = Command::new(bin)
        .arg(flag)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", bin.display()))?;

    if !output.status.success() {
        return Err(anyhow!("{} {} failed", bin.display(), flag));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout
        .lines()
        .next()
        .ok_or_else(|| anyhow!("Empty output from {} {}", bin.display(), flag))?;

    ToolVersion::parse(first_line)
}

/// Versions of every external tool the relay depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolVersions {
    pub ffmpeg: ToolVersion,
    pub ffprobe: ToolVersion,
    pub ytdlp: ToolVersion,
}

/// Verify all external tools are present and log their versions
pub async fn check_tools(config: &RelayConfig) -> Result<ToolVersions> {
    let ffmpeg = detect_version(&config.ffmpeg_bin, "-version")
        .await
        .context("ffmpeg is required for the transform stage")?;
    info!("🎬 ffmpeg {} ({})", ffmpeg, config.ffmpeg_bin.display());

    let ffprobe = detect_version(&config.ffprobe_bin, "-version")
        .await
        .context("ffprobe is required for stream inspection")?;
    info!("🎬 ffprobe {} ({})", ffprobe, config.ffprobe_bin.display());

    let ytdlp = detect_version(&config.ytdlp_bin, "--version")
        .await
        .context("yt-dlp is required to download sources")?;
    info!("⬇️ yt-dlp {} ({})", ytdlp, config.ytdlp_bin.display());

    Ok(ToolVersions { ffmpeg, ffprobe, ytdlp })
}
