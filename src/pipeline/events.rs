use std::fmt;
use std::time::Duration;

use crate::ledger::JobStatus;

/// Pipeline stage reported to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Metadata,
    Download,
    Transcribe,
    PostProcess,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Metadata => "metadata",
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::PostProcess => "post-process",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the orchestrator tells the outside world while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    JobCreated {
        job_id: i64,
        url: String,
        engine: String,
    },
    StageStarted {
        job_id: i64,
        stage: Stage,
        detail: Option<String>,
    },
    Progress {
        job_id: i64,
        stage: Stage,
        percent: f64,
        bytes: Option<u64>,
        eta: Option<Duration>,
    },
    Warning {
        job_id: i64,
        message: String,
    },
    Finished {
        job_id: i64,
        status: JobStatus,
        error: Option<String>,
    },
}

impl PipelineEvent {
    pub fn job_id(&self) -> i64 {
        match self {
            PipelineEvent::JobCreated { job_id, .. }
            | PipelineEvent::StageStarted { job_id, .. }
            | PipelineEvent::Progress { job_id, .. }
            | PipelineEvent::Warning { job_id, .. }
            | PipelineEvent::Finished { job_id, .. } => *job_id,
        }
    }
}

/// Receiver for pipeline events; implementations must not block
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Mirrors events into the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::JobCreated { job_id, url, engine } => {
                tracing::info!(job_id, %url, %engine, "Job created")
            }
            PipelineEvent::StageStarted { job_id, stage, detail } => {
                tracing::info!(job_id, %stage, detail = detail.as_deref().unwrap_or(""), "Stage started")
            }
            PipelineEvent::Progress { job_id, stage, percent, .. } => {
                tracing::debug!(job_id, %stage, percent, "Progress")
            }
            PipelineEvent::Warning { job_id, message } => tracing::warn!(job_id, %message, "Job warning"),
            PipelineEvent::Finished { job_id, status, error } => match error {
                Some(error) => tracing::error!(job_id, %status, %error, "Job finished"),
                None => tracing::info!(job_id, %status, "Job finished"),
            },
        }
    }
}
