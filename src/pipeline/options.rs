use std::path::PathBuf;

use crate::ledger::{Job, JobStatus};
use crate::postprocess::SubtitleFormat;

/// Per-submission choices; `None` fields fall back to configuration defaults
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Engine name or alias
    pub engine: Option<String>,
    pub timestamps: bool,
    pub summary: Option<bool>,
    /// Explicit choice always wins over the detected-language default
    pub translate: Option<bool>,
    pub translate_to: Option<String>,
    pub subtitles: Option<SubtitleFormat>,
    /// Keep the downloaded audio in the audio directory
    pub keep_audio: bool,
    pub download_video: bool,
    pub copy_to_downloads: bool,
    /// Run even if a blocking job for the same URL and engine exists
    pub force: bool,
    /// Spoken language hint passed to engines
    pub language: Option<String>,
    /// Skip the playlist confirmation prompt
    pub assume_yes: bool,
    /// Fixed chunk worker count instead of automatic sizing
    pub parallel_workers: Option<usize>,
}

impl SubmitOptions {
    /// Engines are asked for timestamps when the transcript or subtitles need them
    pub fn wants_segments(&self) -> bool {
        self.timestamps || self.subtitles.is_some()
    }
}

/// Files produced for a job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    pub transcript: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub translation: Option<PathBuf>,
    pub translated_subtitles: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
    /// Copies placed in the downloads folder
    pub copies: Vec<PathBuf>,
}

impl Artifacts {
    /// Every produced path, in display order
    pub fn paths(&self) -> Vec<(&'static str, &PathBuf)> {
        let named = [
            ("Transcript", &self.transcript),
            ("Summary", &self.summary),
            ("Subtitles", &self.subtitles),
            ("Translation", &self.translation),
            ("Translated subtitles", &self.translated_subtitles),
            ("Audio", &self.audio),
            ("Video", &self.video),
        ];
        named
            .into_iter()
            .filter_map(|(label, path)| path.as_ref().map(|p| (label, p)))
            .chain(self.copies.iter().map(|p| ("Copy", p)))
            .collect()
    }
}

/// Final state of a job that ran
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: Job,
    pub artifacts: Artifacts,
}

/// What became of one submitted URL
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Completed(JobReport),
    Failed(JobReport),
    Cancelled(JobReport),
    /// A blocking job already exists; nothing was run
    Duplicate(Job),
    /// Refused before any job was recorded
    Rejected { url: String, reason: String },
}

impl SubmitOutcome {
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            SubmitOutcome::Completed(r) | SubmitOutcome::Failed(r) | SubmitOutcome::Cancelled(r) => {
                Some(r.job.status)
            }
            SubmitOutcome::Duplicate(job) => Some(job.status),
            SubmitOutcome::Rejected { .. } => None,
        }
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            SubmitOutcome::Completed(r) | SubmitOutcome::Failed(r) | SubmitOutcome::Cancelled(r) => Some(&r.job),
            SubmitOutcome::Duplicate(job) => Some(job),
            SubmitOutcome::Rejected { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Completed(_))
    }
}
