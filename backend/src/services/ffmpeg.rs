//! FFmpeg subprocess wrappers
//!
//! Uses ffprobe (command-line) to read container duration and size, and ffmpeg
//! to render a single still frame. Both tools are driven through their stable
//! CLI contract rather than library bindings.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Container-level facts reported by ffprobe
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormatInfo {
    /// Duration in seconds
    pub duration_secs: Option<f64>,
    /// Size in bytes as reported by the container
    pub size_bytes: Option<i64>,
}

/// Parameters for a single-frame render
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest {
    pub seek: Duration,
    pub width: u32,
    pub quality: u8,
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
    }
}

pub struct FfmpegService {
    ffprobe_path: String,
    ffmpeg_path: String,
}

impl FfmpegService {
    pub fn new() -> Self {
        Self::with_paths("ffprobe".to_string(), "ffmpeg".to_string())
    }

    pub fn with_paths(ffprobe_path: String, ffmpeg_path: String) -> Self {
        Self { ffprobe_path, ffmpeg_path }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Read duration and size from the container header
    pub async fn probe_format(&self, path: &Path) -> Result<FormatInfo> {
        debug!(path = %path.display(), "Probing media file");

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet"])
            .args(["-print_format", "json"])
            .args(["-show_entries", "format=size,duration"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!(
                "ffprobe failed for '{}' (exit code {}): {}",
                path.display(),
                exit_code,
                if stderr.is_empty() { "no error output" } else { stderr.trim() }
            );
        }

        parse_format(&output.stdout)
    }

    /// Render one frame of `input` into `output` as WebP
    pub async fn render_frame(&self, input: &Path, output: &Path, request: FrameRequest) -> Result<()> {
        let seek = format_timestamp(request.seek);
        debug!(input = %input.display(), output = %output.display(), seek = %seek, "Rendering frame");

        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .args(["-ss", &seek])
            .arg("-i")
            .arg(input)
            .args(["-vf", &format!("thumbnail,scale={}:-1", request.width)])
            .args(["-frames:v", "1"])
            .args(["-f", "webp"])
            .args(["-quality", &request.quality.to_string()])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute ffmpeg for '{}'", input.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            anyhow::bail!("ffmpeg failed for '{}': {}", input.display(), tail);
        }
        Ok(())
    }
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_format(stdout: &[u8]) -> Result<FormatInfo> {
    let probe: ffprobe::FfprobeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe JSON output")?;
    let format = probe.format.context("ffprobe output has no format section")?;

    Ok(FormatInfo {
        duration_secs: format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite()),
        size_bytes: format.size.as_deref().and_then(|s| s.trim().parse().ok()),
    })
}

/// `HH:MM:SS.s` seek argument
pub fn format_timestamp(position: Duration) -> String {
    let total = position.as_secs_f64();
    let hours = (total / 3600.0).floor() as u64;
    let minutes = ((total % 3600.0) / 60.0).floor() as u64;
    let seconds = total % 60.0;
    format!("{:02}:{:02}:{:04.1}", hours, minutes, seconds)
}
