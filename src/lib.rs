//! Open-Scribe - turn YouTube videos into transcripts
//!
//! This library drives a transcription job end to end: it resolves a transcription engine,
//! prepares audio (download, size enforcement, chunking), fans chunks out to a bounded worker
//! pool, runs best-effort post-processors (summary, translation, subtitles) and records every
//! step in a SQLite job ledger.

pub mod audio;
pub mod cli;
pub mod config;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod retry;
pub mod source;
pub mod transcribe;
pub mod utils;
pub mod workers;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use ledger::{Job, JobLedger, JobStatus};
pub use pipeline::{Pipeline, SubmitOptions, SubmitOutcome};
pub use transcribe::{TranscriptSegment, TranscriptionEngine, TranscriptionResult};

/// Result type used at the application edges (CLI, config loading)
pub type Result<T> = anyhow::Result<T>;

/// Result type used by the core components
pub type ScribeResult<T> = std::result::Result<T, ScribeError>;

/// Error taxonomy shared by every core component
#[derive(thiserror::Error, Debug)]
pub enum ScribeError {
    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("Job #{job_id} for {url} with engine {engine} is already {status}")]
    DuplicateActiveJob {
        job_id: i64,
        url: String,
        engine: String,
        status: JobStatus,
    },

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Audio is {size} bytes, above the {ceiling} byte limit even at the lowest bitrate")]
    AudioTooLarge { size: u64, ceiling: u64 },

    #[error("Engine {engine} unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("Engine {engine} rate limited: {message}")]
    EngineRateLimited { engine: String, message: String },

    #[error("Engine {engine} transient error: {message}")]
    EngineTransientError { engine: String, message: String },

    #[error("Engine {engine} failed: {message}")]
    EngineFatalError { engine: String, message: String },

    #[error("All {chunks} chunks failed: {source}")]
    AllChunksFailed {
        chunks: usize,
        #[source]
        source: Box<ScribeError>,
    },

    #[error("Invalid transition for job #{job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("{processor} failed: {message}")]
    PostProcessError { processor: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Job #{0} not found")]
    JobNotFound(i64),

    #[error("Job #{job_id} is already {status}")]
    AlreadyFinished { job_id: i64, status: JobStatus },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Playlist batch abandoned: {0}")]
    BatchAbandoned(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScribeError {
    /// Errors worth another attempt after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScribeError::EngineTransientError { .. }
                | ScribeError::EngineRateLimited { .. }
                | ScribeError::DownloadError(_)
        )
    }

    /// Errors that allow the one-shot engine substitution once retries are spent
    pub fn triggers_fallback(&self) -> bool {
        match self {
            ScribeError::EngineUnavailable { .. }
            | ScribeError::EngineTransientError { .. }
            | ScribeError::EngineRateLimited { .. } => true,
            ScribeError::AllChunksFailed { source, .. } => source.triggers_fallback(),
            _ => false,
        }
    }

    /// Bugs rather than environmental conditions; these are never folded into a job status
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, ScribeError::InvalidTransition { .. })
    }

    pub fn engine_unavailable(engine: &str, reason: impl Into<String>) -> Self {
        ScribeError::EngineUnavailable {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }

    pub fn engine_transient(engine: &str, message: impl Into<String>) -> Self {
        ScribeError::EngineTransientError {
            engine: engine.to_string(),
            message: message.into(),
        }
    }

    pub fn engine_fatal(engine: &str, message: impl Into<String>) -> Self {
        ScribeError::EngineFatalError {
            engine: engine.to_string(),
            message: message.into(),
        }
    }

    pub fn post_process(processor: &str, message: impl Into<String>) -> Self {
        ScribeError::PostProcessError {
            processor: processor.to_string(),
            message: message.into(),
        }
    }
}
