use std::sync::Arc;
use std::time::Duration;

use super::captions::CaptionEngine;
use super::openai::OpenAiTranscriber;
use super::whisper_cpp::WhisperCpp;
use super::TranscriptionEngine;
use crate::audio::ChunkFormat;
use crate::config::Config;
use crate::{ScribeError, ScribeResult};

/// Closed set of supported engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
    WhisperApi,
    WhisperCpp,
    YoutubeCaptions,
}

/// Static capability record per engine
#[derive(Debug, PartialEq)]
pub struct EngineDescriptor {
    pub kind: EngineKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub requires_audio: bool,
    /// Engine returns timed segments natively
    pub timestamps: bool,
    /// Target chunk length for parallel dispatch; zero means never chunked
    pub chunk_seconds: u64,
    /// Approximate resident memory per concurrent call, in GB
    pub memory_per_worker_gb: f64,
    /// Provider rejects uploads above the configured size ceiling
    pub upload_limited: bool,
    pub chunk_format: ChunkFormat,
}

impl EngineDescriptor {
    pub fn supports_chunking(&self) -> bool {
        self.requires_audio && self.chunk_seconds > 0
    }

    pub fn memory_per_worker_bytes(&self) -> u64 {
        (self.memory_per_worker_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }
}

const CLOUD_CHUNK: ChunkFormat = ChunkFormat::Mp3 { bitrate_kbps: 64 };

pub static ENGINES: [EngineDescriptor; 5] = [
    EngineDescriptor {
        kind: EngineKind::Gpt4oTranscribe,
        name: "gpt-4o-transcribe",
        aliases: &["high"],
        requires_audio: true,
        timestamps: false,
        chunk_seconds: 600,
        memory_per_worker_gb: 0.1,
        upload_limited: true,
        chunk_format: CLOUD_CHUNK,
    },
    EngineDescriptor {
        kind: EngineKind::Gpt4oMiniTranscribe,
        name: "gpt-4o-mini-transcribe",
        aliases: &["medium"],
        requires_audio: true,
        timestamps: false,
        chunk_seconds: 600,
        memory_per_worker_gb: 0.1,
        upload_limited: true,
        chunk_format: CLOUD_CHUNK,
    },
    EngineDescriptor {
        kind: EngineKind::WhisperApi,
        name: "whisper-api",
        aliases: &["whisper-cloud"],
        requires_audio: true,
        timestamps: true,
        chunk_seconds: 600,
        memory_per_worker_gb: 0.1,
        upload_limited: true,
        chunk_format: CLOUD_CHUNK,
    },
    EngineDescriptor {
        kind: EngineKind::WhisperCpp,
        name: "whisper-cpp",
        aliases: &["whisper-local"],
        requires_audio: true,
        timestamps: true,
        chunk_seconds: 300,
        memory_per_worker_gb: 2.5,
        upload_limited: false,
        chunk_format: ChunkFormat::Wav,
    },
    EngineDescriptor {
        kind: EngineKind::YoutubeCaptions,
        name: "youtube-transcript-api",
        aliases: &["youtube"],
        requires_audio: false,
        timestamps: true,
        chunk_seconds: 0,
        memory_per_worker_gb: 0.05,
        upload_limited: false,
        chunk_format: ChunkFormat::Wav,
    },
];

/// Resolve a canonical name or alias, case-insensitively
pub fn resolve(name: &str) -> ScribeResult<&'static EngineDescriptor> {
    let wanted = name.trim().to_lowercase();
    ENGINES
        .iter()
        .find(|d| d.name == wanted || d.aliases.contains(&wanted.as_str()))
        .ok_or_else(|| ScribeError::UnknownEngine(name.to_string()))
}

pub fn descriptor(kind: EngineKind) -> &'static EngineDescriptor {
    match kind {
        EngineKind::Gpt4oTranscribe => &ENGINES[0],
        EngineKind::Gpt4oMiniTranscribe => &ENGINES[1],
        EngineKind::WhisperApi => &ENGINES[2],
        EngineKind::WhisperCpp => &ENGINES[3],
        EngineKind::YoutubeCaptions => &ENGINES[4],
    }
}

/// Builds engine implementations from descriptors
pub trait EngineFactory: Send + Sync {
    fn resolve(&self, name: &str) -> ScribeResult<&'static EngineDescriptor> {
        resolve(name)
    }

    fn build(&self, descriptor: &'static EngineDescriptor) -> ScribeResult<Arc<dyn TranscriptionEngine>>;
}

/// Production factory wired from configuration
pub struct EngineRegistry {
    config: Config,
    client: reqwest::Client,
}

impl EngineRegistry {
    pub fn new(config: &Config) -> ScribeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.engines.request_timeout_secs))
            .user_agent(concat!("open-scribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScribeError::engine_unavailable("http", e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

impl EngineFactory for EngineRegistry {
    fn build(&self, descriptor: &'static EngineDescriptor) -> ScribeResult<Arc<dyn TranscriptionEngine>> {
        let engines = &self.config.engines;
        let engine: Arc<dyn TranscriptionEngine> = match descriptor.kind {
            EngineKind::Gpt4oTranscribe | EngineKind::Gpt4oMiniTranscribe | EngineKind::WhisperApi => {
                Arc::new(OpenAiTranscriber::new(
                    descriptor,
                    self.client.clone(),
                    engines.openai_api_key.clone(),
                    engines.openai_base_url.clone(),
                ))
            }
            EngineKind::WhisperCpp => Arc::new(WhisperCpp::new(
                descriptor,
                engines.whisper_cpp.clone(),
            )),
            EngineKind::YoutubeCaptions => Arc::new(CaptionEngine::new(
                descriptor,
                self.client.clone(),
                self.config.paths.yt_dlp.clone(),
                engines.caption_languages.clone(),
            )),
        };

        tracing::debug!(engine = descriptor.name, "Engine built");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_aliases() {
        assert_eq!(resolve("high").unwrap().name, "gpt-4o-transcribe");
        assert_eq!(resolve("medium").unwrap().name, "gpt-4o-mini-transcribe");
        assert_eq!(resolve("whisper-cloud").unwrap().name, "whisper-api");
        assert_eq!(resolve("whisper-local").unwrap().name, "whisper-cpp");
        assert_eq!(resolve(" YouTube ").unwrap().name, "youtube-transcript-api");
        assert_eq!(resolve("whisper-cpp").unwrap().kind, EngineKind::WhisperCpp);
    }

    #[test]
    fn test_unknown_engine() {
        assert!(matches!(resolve("deepgram"), Err(ScribeError::UnknownEngine(name)) if name == "deepgram"));
    }

    #[test]
    fn test_descriptor_lookup_matches_table() {
        for d in ENGINES.iter() {
            assert_eq!(descriptor(d.kind), d);
        }
    }

    #[test]
    fn test_capabilities() {
        let captions = descriptor(EngineKind::YoutubeCaptions);
        assert!(!captions.requires_audio);
        assert!(!captions.supports_chunking());

        let local = descriptor(EngineKind::WhisperCpp);
        assert!(local.supports_chunking());
        assert!(local.chunk_seconds < descriptor(EngineKind::WhisperApi).chunk_seconds);
        assert!(!descriptor(EngineKind::Gpt4oTranscribe).timestamps);
    }
}
