use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

use super::normalize::parse_json3;
use super::openai::{classify_status, classify_transport};
use super::registry::EngineDescriptor;
use super::{EngineInput, TranscribeOptions, TranscriptionEngine, TranscriptionResult};
use crate::{ScribeError, ScribeResult};

/// YouTube's own caption tracks, fetched without downloading any audio
pub struct CaptionEngine {
    descriptor: &'static EngineDescriptor,
    client: reqwest::Client,
    yt_dlp_path: String,
    preferred_languages: Vec<String>,
}

/// A caption track picked from the video's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub language: String,
    pub url: String,
    pub generated: bool,
}

impl CaptionEngine {
    pub fn new(
        descriptor: &'static EngineDescriptor,
        client: reqwest::Client,
        yt_dlp_path: String,
        preferred_languages: Vec<String>,
    ) -> Self {
        Self {
            descriptor,
            client,
            yt_dlp_path,
            preferred_languages,
        }
    }

    async fn video_info(&self, url: &str) -> ScribeResult<Value> {
        let name = self.descriptor.name;
        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--skip-download", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ScribeError::engine_unavailable(name, format!("yt-dlp is not available: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            let message = format!("yt-dlp failed: {}", error.trim());
            return Err(if crate::source::is_unavailable_message(&error) {
                ScribeError::engine_fatal(name, message)
            } else {
                ScribeError::engine_transient(name, message)
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ScribeError::engine_fatal(name, format!("invalid yt-dlp output: {}", e)))
    }

    async fn fetch_track(&self, track: &CaptionTrack) -> ScribeResult<String> {
        let name = self.descriptor.name;
        let response = self
            .client
            .get(&track.url)
            .send()
            .await
            .map_err(|e| classify_transport(name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(name, status, &body));
        }

        response
            .text()
            .await
            .map_err(|e| ScribeError::engine_transient(name, format!("body: {}", e)))
    }
}

fn json3_url(formats: &Value) -> Option<String> {
    formats
        .as_array()?
        .iter()
        .find(|f| f["ext"].as_str() == Some("json3"))
        .and_then(|f| f["url"].as_str())
        .map(str::to_string)
}

fn language_matches(key: &str, wanted: &str) -> bool {
    key == wanted || key.starts_with(&format!("{}-", wanted))
}

/// Pick a track: manual before generated; within each, requested language, then
/// `preferred` in order, then the first available.
pub fn select_track(info: &Value, requested: Option<&str>, preferred: &[String]) -> Option<CaptionTrack> {
    let order: Vec<&str> = requested
        .into_iter()
        .chain(preferred.iter().map(String::as_str))
        .collect();

    for (field, generated) in [("subtitles", false), ("automatic_captions", true)] {
        let Some(tracks) = info[field].as_object() else {
            continue;
        };

        let candidates = order
            .iter()
            .flat_map(|wanted| tracks.iter().filter(move |(key, _)| language_matches(key, wanted)))
            .chain(tracks.iter());

        for (language, formats) in candidates {
            if let Some(url) = json3_url(formats) {
                return Some(CaptionTrack {
                    language: language.clone(),
                    url,
                    generated,
                });
            }
        }
    }

    None
}

#[async_trait]
impl TranscriptionEngine for CaptionEngine {
    fn descriptor(&self) -> &'static EngineDescriptor {
        self.descriptor
    }

    async fn transcribe(
        &self,
        input: EngineInput<'_>,
        options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult> {
        let name = self.descriptor.name;
        let EngineInput::Video { video_id, url } = input else {
            return Err(ScribeError::engine_fatal(name, "a video URL is required"));
        };

        let info = self.video_info(url).await?;
        let track = select_track(&info, options.language.as_deref(), &self.preferred_languages)
            .ok_or_else(|| {
                ScribeError::engine_fatal(name, format!("no captions available for {}", video_id))
            })?;

        tracing::info!(
            engine = name,
            video_id,
            language = %track.language,
            generated = track.generated,
            "Fetching caption track"
        );

        let body = self.fetch_track(&track).await?;
        let segments = parse_json3(&body)
            .map_err(|e| ScribeError::engine_fatal(name, format!("invalid caption track: {}", e)))?;

        if segments.is_empty() {
            return Err(ScribeError::engine_fatal(name, "caption track is empty"));
        }

        let language = track.language.split('-').next().map(str::to_string);
        Ok(TranscriptionResult::from_segments(name, segments)
            .with_language(language)
            .with_duration(info["duration"].as_f64()))
    }
}
