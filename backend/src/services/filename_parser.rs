//! Filename parser for recorder-style video names
//!
//! Parses filenames like:
//! - "202505252330_Show Title 第8話「Subtitle」_ＢＳ１１イレブン.mp4"
//! - "Show Title ep12.mkv"
//!
//! A leading `YYYYMMDDHHMM_` is the broadcast start, a trailing `_<station>`
//! is the broadcasting station. Whatever remains is the title.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Latin markers must start a word (`ep5`, `S01E03`), so `Live 2` is not an episode
static EPISODE_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:episode|ep?)\.?\s*|\bs\d{1,2}e)(\d+)\b|第\s*(\d+)").ok()
});

const VIDEO_SUFFIXES: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "m2ts"];

/// Fields recovered from a video filename
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedVideoName {
    pub clean_title: String,
    pub broadcast_date: Option<NaiveDateTime>,
    pub station: Option<String>,
    pub episode: Option<i32>,
}

impl ParsedVideoName {
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.broadcast_date.map(|d| d.year())
    }
}

pub fn parse_video_file_name(file_name: &str) -> ParsedVideoName {
    let stem = strip_video_extension(file_name);
    let mut title = stem;
    let mut broadcast_date = None;
    let mut station = None;

    if let Some((prefix, rest)) = stem.split_once('_') {
        if let Some(date) = parse_broadcast_stamp(prefix) {
            broadcast_date = Some(date);
            title = rest;
        }
    }

    if let Some((rest, suffix)) = title.rsplit_once('_') {
        if !suffix.is_empty() {
            station = Some(clean_station_name(suffix));
            title = rest;
        }
    }

    ParsedVideoName {
        clean_title: title.trim().to_string(),
        broadcast_date,
        station,
        episode: extract_episode(file_name),
    }
}

/// Episode number from markers like `ep12`, `E03`, `S01E03`, `episode 4` or `第8話`
pub fn extract_episode(file_name: &str) -> Option<i32> {
    let caps = EPISODE_RE.as_ref()?.captures(file_name)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

fn strip_video_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if VIDEO_SUFFIXES.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => file_name,
    }
}

/// `YYYYMMDDHHMM` to a naive local timestamp
fn parse_broadcast_stamp(stamp: &str) -> Option<NaiveDateTime> {
    if stamp.len() != 12 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |range: std::ops::Range<usize>| stamp[range].parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?;
    date.and_hms_opt(num(8..10)?, num(10..12)?, 0)
}

/// Normalise full-width station names recorders commonly emit
pub fn clean_station_name(station: &str) -> String {
    match station {
        "ＢＳ１１イレブン" | "ＢＳ１１" => "BS11",
        "ＢＳフジ" => "BSフジ",
        "ＢＳ-ＴＢＳ" => "BS-TBS",
        "ＢＳテレ東" => "BSテレ東",
        "ＢＳアニマックス" => "アニマックス",
        "ＡＴＸＸ" | "ＡＴ－Ｘ" => "AT-X",
        other => other,
    }
    .to_string()
}
