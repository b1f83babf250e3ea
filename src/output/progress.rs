use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::ledger::JobStatus;
use crate::pipeline::{Confirmer, PipelineEvent, ProgressSink, Stage};
use crate::utils::format_duration;

/// Renders pipeline events as one indicatif bar per job
pub struct ConsoleProgress {
    bars: MultiProgress,
    jobs: Mutex<HashMap<i64, ProgressBar>>,
    style: ProgressStyle,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} #{prefix} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        Self {
            bars: MultiProgress::new(),
            jobs: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn bar(&self, job_id: i64) -> Option<ProgressBar> {
        let mut jobs = self.jobs.lock().ok()?;
        let bar = jobs.entry(job_id).or_insert_with(|| {
            let bar = self.bars.add(ProgressBar::new(100));
            bar.set_style(self.style.clone());
            bar.set_prefix(job_id.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Some(bar.clone())
    }

    fn remove(&self, job_id: i64) -> Option<ProgressBar> {
        self.jobs.lock().ok()?.remove(&job_id)
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Metadata => "Resolving video...",
        Stage::Download => "Downloading audio...",
        Stage::Transcribe => "Transcribing...",
        Stage::PostProcess => "Post-processing...",
        Stage::Persist => "Saving artifacts...",
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::JobCreated { job_id, engine, .. } => {
                if let Some(bar) = self.bar(job_id) {
                    bar.set_message(format!("Queued ({})", engine));
                }
            }
            PipelineEvent::StageStarted { job_id, stage, detail } => {
                if let Some(bar) = self.bar(job_id) {
                    bar.set_position(0);
                    match detail {
                        Some(detail) => bar.set_message(format!("{} {}", stage_message(stage), detail)),
                        None => bar.set_message(stage_message(stage)),
                    }
                }
            }
            PipelineEvent::Progress {
                job_id,
                stage,
                percent,
                eta,
                ..
            } => {
                if let Some(bar) = self.bar(job_id) {
                    bar.set_position(percent.clamp(0.0, 100.0) as u64);
                    if let Some(eta) = eta {
                        bar.set_message(format!(
                            "{} ETA {}",
                            stage_message(stage),
                            format_duration(eta.as_secs_f64())
                        ));
                    }
                }
            }
            PipelineEvent::Warning { job_id, message } => {
                self.bars.suspend(|| eprintln!("⚠️  Job #{}: {}", job_id, message));
            }
            PipelineEvent::Finished { job_id, status, .. } => {
                if let Some(bar) = self.remove(job_id) {
                    match status {
                        JobStatus::Completed => bar.finish_with_message("Done"),
                        other => bar.abandon_with_message(other.as_str().to_string()),
                    }
                }
            }
        }
    }
}

/// Asks on the terminal and reads the answer from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        eprint!("{} [y/N] ", prompt);
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
