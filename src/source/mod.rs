use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{ScribeError, ScribeResult};

pub mod ytdlp;

pub use ytdlp::YtDlp;

/// Video information resolved before a job starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub is_playlist: bool,
    /// Entries of a playlist, empty for single videos
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub video_id: String,
    pub url: String,
    pub title: String,
}

/// Incremental download progress
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DownloadProgress {
    pub percent: f64,
    pub total_bytes: Option<u64>,
    pub eta_secs: Option<u64>,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Download provider
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> ScribeResult<VideoMetadata>;

    /// Download the audio track into `dir`, returning the file path
    async fn fetch_audio(&self, url: &str, dir: &Path, progress: ProgressCallback<'_>) -> ScribeResult<PathBuf>;

    /// Download the video into `dir`, returning the file path
    async fn fetch_video(&self, url: &str, dir: &Path) -> ScribeResult<PathBuf>;
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "www.youtube-nocookie.com",
    "youtube-nocookie.com",
];

fn parse_youtube(url: &str) -> Option<Url> {
    let trimmed = url.trim();
    let parsed = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{}", trimmed)))
        .ok()?;
    let host = parsed.host_str()?.to_lowercase();
    YOUTUBE_HOSTS.contains(&host.as_str()).then_some(parsed)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Extract the video identifier from any common YouTube URL shape
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = parse_youtube(url)?;
    let host = parsed.host_str()?.to_lowercase();
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());

    let candidate = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("embed") | Some("live") | Some("shorts") | Some("v") => {
                segments.next().map(str::to_string)
            }
            _ => None,
        }
    }?;

    is_valid_id(&candidate).then_some(candidate)
}

/// Whether the URL names a playlist
pub fn is_playlist_url(url: &str) -> bool {
    match parse_youtube(url) {
        Some(parsed) => {
            parsed.query_pairs().any(|(key, _)| key == "list") || parsed.path().contains("playlist")
        }
        None => false,
    }
}

/// Accept single-video and playlist YouTube URLs
pub fn validate_youtube_url(url: &str) -> ScribeResult<()> {
    if parse_youtube(url).is_none() {
        return Err(ScribeError::InvalidUrl(format!("not a YouTube URL: {}", url)));
    }
    if extract_video_id(url).is_none() && !is_playlist_url(url) {
        return Err(ScribeError::InvalidUrl(format!("no video id in {}", url)));
    }
    Ok(())
}

/// Canonical watch URL for a video id
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Provider messages that mean the video itself cannot be fetched
pub fn is_unavailable_message(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "private video",
        "video unavailable",
        "this video is unavailable",
        "has been removed",
        "not available in your country",
        "blocked it in your country",
        "members-only",
        "join this channel",
        "account associated with this video has been terminated",
        "sign in to confirm your age",
    ];
    let lower = stderr.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
