use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use std::path::Path;

use super::registry::{EngineDescriptor, EngineKind};
use super::{EngineInput, TranscribeOptions, TranscriptSegment, TranscriptionEngine, TranscriptionResult};
use crate::{ScribeError, ScribeResult};

/// Cloud engines behind the OpenAI-compatible `/audio/transcriptions` endpoint
pub struct OpenAiTranscriber {
    descriptor: &'static EngineDescriptor,
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PlainTranscription {
    text: String,
}

impl OpenAiTranscriber {
    pub fn new(
        descriptor: &'static EngineDescriptor,
        client: reqwest::Client,
        api_key: Option<String>,
        base_url: String,
    ) -> Self {
        Self {
            descriptor,
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn model(&self) -> &'static str {
        match self.descriptor.kind {
            EngineKind::Gpt4oTranscribe => "gpt-4o-transcribe",
            EngineKind::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
            _ => "whisper-1",
        }
    }

    fn verbose(&self, options: &TranscribeOptions) -> bool {
        options.timestamps && self.descriptor.timestamps
    }

    async fn build_form(&self, audio: &Path, options: &TranscribeOptions) -> ScribeResult<multipart::Form> {
        let name = self.descriptor.name;
        let bytes = tokio::fs::read(audio).await.map_err(|e| {
            ScribeError::engine_fatal(name, format!("cannot read {}: {}", audio.display(), e))
        })?;

        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        let mime = match audio.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("m4a") => "audio/mp4",
            Some("webm") => "audio/webm",
            _ => "audio/mpeg",
        };

        let file_part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| ScribeError::engine_fatal(name, format!("mime: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("model", self.model())
            .part("file", file_part);

        if self.verbose(options) {
            form = form
                .text("response_format", "verbose_json")
                .text("timestamp_granularities[]", "segment");
        } else {
            form = form.text("response_format", "json");
        }
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }

        Ok(form)
    }
}

/// Map an HTTP failure onto the engine error taxonomy
pub(crate) fn classify_status(engine: &str, status: StatusCode, body: &str) -> ScribeError {
    let message = format!("status {}: {}", status, body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScribeError::engine_unavailable(engine, message),
        StatusCode::TOO_MANY_REQUESTS => ScribeError::EngineRateLimited {
            engine: engine.to_string(),
            message,
        },
        StatusCode::REQUEST_TIMEOUT => ScribeError::engine_transient(engine, message),
        s if s.is_server_error() => ScribeError::engine_transient(engine, message),
        _ => ScribeError::engine_fatal(engine, message),
    }
}

/// Map a transport failure onto the engine error taxonomy
pub(crate) fn classify_transport(engine: &str, err: reqwest::Error) -> ScribeError {
    if err.is_builder() {
        ScribeError::engine_fatal(engine, format!("request: {}", err))
    } else {
        ScribeError::engine_transient(engine, format!("request: {}", err))
    }
}

#[async_trait]
impl TranscriptionEngine for OpenAiTranscriber {
    fn descriptor(&self) -> &'static EngineDescriptor {
        self.descriptor
    }

    async fn transcribe(
        &self,
        input: EngineInput<'_>,
        options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult> {
        let name = self.descriptor.name;
        let EngineInput::Audio(audio) = input else {
            return Err(ScribeError::engine_fatal(name, "an audio file is required"));
        };
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ScribeError::engine_unavailable(name, "OPENAI_API_KEY is not set"))?;

        let form = self.build_form(audio, options).await?;
        let url = format!("{}/audio/transcriptions", self.base_url);

        tracing::debug!(engine = name, model = self.model(), file = %audio.display(), "Sending audio for transcription");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport(name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_status(name, status, &body));
        }

        let result = if self.verbose(options) {
            let body: VerboseTranscription = response
                .json()
                .await
                .map_err(|e| ScribeError::engine_transient(name, format!("body: {}", e)))?;

            let segments: Vec<TranscriptSegment> = body
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start_time: s.start,
                    end_time: s.end,
                    text: s.text.trim().to_string(),
                    confidence: s.avg_logprob.map(|p| p.exp().clamp(0.0, 1.0)),
                })
                .filter(|s| !s.text.is_empty())
                .collect();

            let result = if segments.is_empty() {
                TranscriptionResult::text_only(name, body.text)
            } else {
                TranscriptionResult::from_segments(name, segments)
            };
            result.with_language(body.language).with_duration(body.duration)
        } else {
            let body: PlainTranscription = response
                .json()
                .await
                .map_err(|e| ScribeError::engine_transient(name, format!("body: {}", e)))?;
            TranscriptionResult::text_only(name, body.text).with_language(options.language.clone())
        };

        tracing::info!(engine = name, chars = result.text.len(), "Transcription completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::registry::descriptor;

    #[test]
    fn test_status_mapping() {
        let engine = "whisper-api";
        assert!(matches!(
            classify_status(engine, StatusCode::UNAUTHORIZED, ""),
            ScribeError::EngineUnavailable { .. }
        ));
        assert!(matches!(
            classify_status(engine, StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ScribeError::EngineRateLimited { .. }
        ));
        assert!(matches!(
            classify_status(engine, StatusCode::BAD_GATEWAY, ""),
            ScribeError::EngineTransientError { .. }
        ));
        assert!(matches!(
            classify_status(engine, StatusCode::REQUEST_TIMEOUT, ""),
            ScribeError::EngineTransientError { .. }
        ));
        assert!(matches!(
            classify_status(engine, StatusCode::PAYLOAD_TOO_LARGE, ""),
            ScribeError::EngineFatalError { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let engine = OpenAiTranscriber::new(
            descriptor(EngineKind::WhisperApi),
            reqwest::Client::new(),
            None,
            "http://127.0.0.1:9".to_string(),
        );
        let err = engine
            .transcribe(
                EngineInput::Audio(Path::new("/nonexistent.mp3")),
                &TranscribeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::EngineUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_video_input_is_rejected() {
        let engine = OpenAiTranscriber::new(
            descriptor(EngineKind::Gpt4oTranscribe),
            reqwest::Client::new(),
            Some("sk-test".to_string()),
            "http://127.0.0.1:9".to_string(),
        );
        let err = engine
            .transcribe(
                EngineInput::Video {
                    video_id: "abc",
                    url: "https://youtu.be/abc",
                },
                &TranscribeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::EngineFatalError { .. }));
        assert_eq!(engine.model(), "gpt-4o-transcribe");
    }
}
