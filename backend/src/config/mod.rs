//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind host
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite database file path
    pub database_path: String,

    /// Maximum pooled SQLite connections
    pub database_max_connections: u32,

    /// Root directories scanned for video files
    pub video_directories: Vec<PathBuf>,

    /// Directory holding rendered thumbnails
    pub thumbnail_dir: PathBuf,

    /// Thumbnail width in pixels (height follows aspect ratio)
    pub thumbnail_width: u32,

    /// WebP quality for rendered thumbnails (0-100)
    pub thumbnail_quality: u8,

    /// JSON file holding the scan tunables
    pub scan_settings_path: PathBuf,

    /// Path to the ffprobe executable
    pub ffprobe_path: String,

    /// Path to the ffmpeg executable
    pub ffmpeg_path: String,

    /// Checkpoints older than this are treated as stale
    pub checkpoint_validity_hours: i64,

    /// Interval between heartbeat events on the progress stream
    pub heartbeat_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: parse_var("PORT", 3001)?,

            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/videoscan.db".to_string()),

            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,

            video_directories: parse_video_directories(
                &env::var("VIDEO_DIRECTORY").unwrap_or_default(),
            ),

            thumbnail_dir: env::var("THUMBNAIL_DIR")
                .unwrap_or_else(|_| "./data/thumbnails".to_string())
                .into(),

            thumbnail_width: parse_var("THUMBNAIL_WIDTH", 300)?,

            thumbnail_quality: parse_var("THUMBNAIL_QUALITY", 70)?,

            scan_settings_path: env::var("SCAN_SETTINGS_PATH")
                .unwrap_or_else(|_| "./data/scan-settings.json".to_string())
                .into(),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            checkpoint_validity_hours: parse_var("CHECKPOINT_VALIDITY_HOURS", 24)?,

            heartbeat_interval_secs: parse_var("HEARTBEAT_INTERVAL_SECS", 30)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated directory list, trimming whitespace and one layer of quotes.
pub fn parse_video_directories(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(|entry| {
            let entry = entry.trim();
            let entry = entry
                .strip_prefix('"')
                .or_else(|| entry.strip_prefix('\''))
                .unwrap_or(entry);
            let entry = entry
                .strip_suffix('"')
                .or_else(|| entry.strip_suffix('\''))
                .unwrap_or(entry);
            entry.trim().to_string()
        })
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}
