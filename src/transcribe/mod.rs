use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ScribeResult;

pub mod captions;
pub mod normalize;
pub mod openai;
pub mod registry;
pub mod whisper_cpp;

pub use registry::{EngineDescriptor, EngineFactory, EngineKind, EngineRegistry};

/// Normalized output of any engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// The transcribed text
    pub text: String,

    /// Timed segments, present when the engine produced them or chunked dispatch synthesized them
    pub segments: Option<Vec<TranscriptSegment>>,

    /// Language detected/used
    pub language: Option<String>,

    /// Audio duration in seconds
    pub duration: Option<f64>,

    /// Canonical name of the engine that produced this result
    pub engine: String,
}

/// Individual transcript segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds
    pub end_time: f64,

    /// Segment text
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: Option<f64>,
}

impl TranscriptSegment {
    pub fn new(start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            text: text.into(),
            confidence: None,
        }
    }
}

impl TranscriptionResult {
    /// Plain-text result without timing
    pub fn text_only(engine: &str, text: impl Into<String>) -> Self {
        Self {
            text: normalize::collapse_whitespace(&text.into()),
            segments: None,
            language: None,
            duration: None,
            engine: engine.to_string(),
        }
    }

    /// Result whose text is the ordered concatenation of `segments`
    pub fn from_segments(engine: &str, segments: Vec<TranscriptSegment>) -> Self {
        let text = normalize::join_segment_text(&segments);
        let duration = segments.last().map(|s| s.end_time);
        Self {
            text,
            segments: Some(segments),
            language: None,
            duration,
            engine: engine.to_string(),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Keep the computed duration when the provider reports none
    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        if duration.is_some() {
            self.duration = duration;
        }
        self
    }

    pub fn has_segments(&self) -> bool {
        self.segments.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// What an engine transcribes: a local audio file or a remote video
#[derive(Debug, Clone, Copy)]
pub enum EngineInput<'a> {
    Audio(&'a Path),
    Video { video_id: &'a str, url: &'a str },
}

#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Ask the engine for timed segments
    pub timestamps: bool,
    /// Language hint; auto-detect when `None`
    pub language: Option<String>,
}

/// Uniform contract over every transcription backend
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Static capability record
    fn descriptor(&self) -> &'static EngineDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    fn supports_timestamps(&self) -> bool {
        self.descriptor().timestamps
    }

    fn requires_audio_download(&self) -> bool {
        self.descriptor().requires_audio
    }

    async fn transcribe(
        &self,
        input: EngineInput<'_>,
        options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult>;
}
