use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{
    extract_video_id, is_playlist_url, is_unavailable_message, watch_url, DownloadProgress,
    MediaSource, PlaylistEntry, ProgressCallback, VideoMetadata,
};
use crate::{ScribeError, ScribeResult};

/// YouTube download provider backed by yt-dlp
pub struct YtDlp {
    yt_dlp_path: String,
}

impl YtDlp {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn spawn_error(&self, err: std::io::Error) -> ScribeError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ScribeError::SourceUnavailable(format!(
                "{} not found. Please install it: https://github.com/yt-dlp/yt-dlp",
                self.yt_dlp_path
            ))
        } else {
            ScribeError::DownloadError(format!("failed to run {}: {}", self.yt_dlp_path, err))
        }
    }

    async fn dump_json(&self, url: &str, playlist: bool) -> ScribeResult<Value> {
        tracing::debug!(url, playlist, "Extracting video info");

        let mut command = Command::new(&self.yt_dlp_path);
        command.arg("--dump-single-json");
        if playlist {
            command.arg("--flat-playlist");
        } else {
            command.arg("--no-playlist");
        }
        let output = command
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ScribeError::DownloadError(format!("invalid yt-dlp output: {}", e)))
    }

    /// Run yt-dlp, forwarding `[download]` progress lines
    async fn run_download(&self, args: &[String], progress: ProgressCallback<'_>) -> ScribeResult<()> {
        let mut child = Command::new(&self.yt_dlp_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(update) = parse_progress_line(&line) {
                    progress(update);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr));
        }
        Ok(())
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

fn classify_failure(stderr: &str) -> ScribeError {
    let message = stderr.trim().to_string();
    if is_unavailable_message(&message) {
        ScribeError::SourceUnavailable(message)
    } else {
        ScribeError::DownloadError(message)
    }
}

/// File in `dir` named `<stem>.<ext>`, skipping partial downloads
fn find_output(dir: &Path, stem: &str, preferred_ext: &str) -> ScribeResult<PathBuf> {
    let mut found: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                && !matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("part") | Some("ytdl") | None
                )
        })
        .collect();
    found.sort_by_key(|path| path.extension().and_then(|e| e.to_str()) != Some(preferred_ext));

    found
        .into_iter()
        .next()
        .ok_or_else(|| ScribeError::DownloadError(format!("yt-dlp produced no {} file", stem)))
}

fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().trim_start_matches('~');
    let split = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "KB" => 1000.0,
        "MB" => 1000.0 * 1000.0,
        "GB" => 1000.0 * 1000.0 * 1000.0,
        _ => return None,
    };
    Some((number * multiplier) as u64)
}

fn parse_eta(value: &str) -> Option<u64> {
    value
        .split(':')
        .try_fold(0u64, |acc, part| part.parse::<u64>().ok().map(|n| acc * 60 + n))
}

/// Parse `[download]  45.3% of ~3.21MiB at 1.00MiB/s ETA 00:02`
pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let rest = line.trim().strip_prefix("[download]")?;
    let mut words = rest.split_whitespace();
    let percent: f64 = words.next()?.strip_suffix('%')?.parse().ok()?;

    let mut update = DownloadProgress {
        percent: percent.clamp(0.0, 100.0),
        ..DownloadProgress::default()
    };
    let words: Vec<&str> = words.collect();
    for pair in words.windows(2) {
        match pair[0] {
            "of" => update.total_bytes = parse_size(pair[1]),
            "ETA" => update.eta_secs = parse_eta(pair[1]),
            _ => {}
        }
    }
    Some(update)
}

fn entries_from(info: &Value) -> Vec<PlaylistEntry> {
    info["entries"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let video_id = entry["id"].as_str()?.to_string();
                    let url = entry["url"]
                        .as_str()
                        .filter(|u| u.starts_with("http"))
                        .map(str::to_string)
                        .unwrap_or_else(|| watch_url(&video_id));
                    Some(PlaylistEntry {
                        title: entry["title"].as_str().unwrap_or_default().to_string(),
                        video_id,
                        url,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MediaSource for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> ScribeResult<VideoMetadata> {
        let playlist = is_playlist_url(url) && extract_video_id(url).is_none();
        let info = self.dump_json(url, playlist).await?;

        let is_playlist = info["_type"].as_str() == Some("playlist");
        let video_id = info["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| extract_video_id(url))
            .unwrap_or_default();

        Ok(VideoMetadata {
            video_id,
            title: info["title"].as_str().unwrap_or_default().to_string(),
            duration: info["duration"].as_f64(),
            uploader: info["uploader"].as_str().map(str::to_string),
            is_playlist,
            entries: if is_playlist { entries_from(&info) } else { Vec::new() },
        })
    }

    async fn fetch_audio(&self, url: &str, dir: &Path, progress: ProgressCallback<'_>) -> ScribeResult<PathBuf> {
        tracing::debug!(url, dir = %dir.display(), "Downloading audio");
        fs_err::create_dir_all(dir)?;

        let template = dir.join("audio.%(ext)s").to_string_lossy().into_owned();
        let args: Vec<String> = [
            "--output",
            template.as_str(),
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "9",
            "--format",
            "worstaudio[acodec^=mp4a]/worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio/bestaudio",
            "--no-playlist",
            "--concurrent-fragments",
            "4",
            "--newline",
            url,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        self.run_download(&args, progress).await?;
        find_output(dir, "audio", "mp3")
    }

    async fn fetch_video(&self, url: &str, dir: &Path) -> ScribeResult<PathBuf> {
        tracing::debug!(url, dir = %dir.display(), "Downloading video");
        fs_err::create_dir_all(dir)?;

        let template = dir.join("video.%(ext)s").to_string_lossy().into_owned();
        let args: Vec<String> = [
            "--output",
            template.as_str(),
            "--format",
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            "--merge-output-format",
            "mp4",
            "--no-playlist",
            "--newline",
            url,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        self.run_download(&args, &|_: DownloadProgress| {}).await?;
        find_output(dir, "video", "mp4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_progress_line() {
        let update =
            parse_progress_line("[download]  45.3% of ~  3.21MiB at  1.00MiB/s ETA 00:02").unwrap();
        assert_eq!(update.percent, 45.3);
        assert_eq!(update.eta_secs, Some(2));

        let update = parse_progress_line("[download] 100% of 10.00MiB in 00:00:05").unwrap();
        assert_eq!(update.percent, 100.0);
        assert_eq!(update.total_bytes, Some(10 * 1024 * 1024));

        assert!(parse_progress_line("[download] Destination: audio.webm").is_none());
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("01:02:03"), Some(3723));
        assert_eq!(parse_eta("Unknown"), None);
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] x: Private video"),
            ScribeError::SourceUnavailable(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: HTTP Error 503"),
            ScribeError::DownloadError(_)
        ));
    }

    #[test]
    fn test_playlist_entries() {
        let info = json!({
            "_type": "playlist",
            "entries": [
                {"id": "aaa", "url": "https://www.youtube.com/watch?v=aaa", "title": "First"},
                {"id": "bbb", "url": "bbb", "title": "Second"},
                {"title": "no id"}
            ]
        });
        let entries = entries_from(&info);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].url, "https://www.youtube.com/watch?v=bbb");
        assert_eq!(entries[0].title, "First");
    }

    #[test]
    fn test_find_output_skips_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("audio.webm.part"), b"x").unwrap();
        fs_err::write(dir.path().join("audio.m4a"), b"x").unwrap();
        fs_err::write(dir.path().join("audio.mp3"), b"x").unwrap();

        let found = find_output(dir.path(), "audio", "mp3").unwrap();
        assert_eq!(found, dir.path().join("audio.mp3"));
    }
}
