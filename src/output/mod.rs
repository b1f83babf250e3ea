use console::style;
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::ledger::{Job, JobStats, JobStatus, Page};
use crate::pipeline::{Artifacts, SubmitOutcome};
use crate::postprocess::SubtitleFormat;
use crate::transcribe::{registry::ENGINES, TranscriptSegment, TranscriptionResult};
use crate::utils::{format_duration, format_timestamp, sanitize_filename};

pub mod progress;

pub use progress::{ConsoleProgress, StdinConfirmer};

/// Transcript file body; `[MM:SS] text` lines when timestamps are requested and available
pub fn render_transcript(result: &TranscriptionResult, timestamps: bool) -> String {
    match &result.segments {
        Some(segments) if timestamps && !segments.is_empty() => render_segments(segments),
        _ => format!("{}\n", result.text.trim()),
    }
}

/// One `[MM:SS] text` line per segment
pub fn render_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| format!("[{}] {}\n", format_timestamp(s.start_time), s.text.trim()))
        .collect()
}

/// Writes job artifacts under the configured directories
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    transcript_dir: PathBuf,
    audio_dir: PathBuf,
    video_dir: PathBuf,
    downloads_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            transcript_dir: paths.transcript_dir(),
            audio_dir: paths.audio_dir(),
            video_dir: paths.video_dir(),
            downloads_dir: paths.downloads.clone(),
        }
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    /// File stem for a job: the sanitized title, or the video id when there is no title
    pub fn stem(title: &str, video_id: &str) -> String {
        if title.trim().is_empty() {
            sanitize_filename(video_id)
        } else {
            sanitize_filename(title)
        }
    }

    fn write(&self, dir: &Path, file_name: String, content: &str) -> std::io::Result<PathBuf> {
        fs_err::create_dir_all(dir)?;
        let path = dir.join(file_name);
        fs_err::write(&path, content)?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Artifact written");
        Ok(path)
    }

    pub fn write_transcript(&self, stem: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.transcript_dir, format!("{}.txt", stem), content)
    }

    pub fn write_summary(&self, stem: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.transcript_dir, format!("{}_summary.txt", stem), content)
    }

    pub fn write_subtitles(&self, stem: &str, format: SubtitleFormat, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.transcript_dir, format!("{}.{}", stem, format.extension()), content)
    }

    pub fn write_translation(&self, stem: &str, language: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.transcript_dir, format!("{}_{}.txt", stem, language), content)
    }

    pub fn write_translated_subtitles(
        &self,
        stem: &str,
        language: &str,
        format: SubtitleFormat,
        content: &str,
    ) -> std::io::Result<PathBuf> {
        self.write(
            &self.transcript_dir,
            format!("{}_{}.{}", stem, language, format.extension()),
            content,
        )
    }

    /// Copy the downloaded audio out of the job's scratch directory
    pub fn keep_audio(&self, stem: &str, audio: &Path) -> std::io::Result<PathBuf> {
        fs_err::create_dir_all(&self.audio_dir)?;
        let extension = audio.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
        let target = self.audio_dir.join(format!("{}.{}", stem, extension));
        fs_err::copy(audio, &target)?;
        Ok(target)
    }

    /// Copy `path` into the downloads folder
    pub fn copy_to_downloads(&self, path: &Path) -> std::io::Result<PathBuf> {
        fs_err::create_dir_all(&self.downloads_dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| std::io::Error::other(format!("{} has no file name", path.display())))?;
        let target = self.downloads_dir.join(file_name);
        fs_err::copy(path, &target)?;
        Ok(target)
    }
}

fn status_style(status: JobStatus) -> console::StyledObject<&'static str> {
    let label = status.as_str();
    match status {
        JobStatus::Completed => style(label).green(),
        JobStatus::Failed => style(label).red(),
        JobStatus::Cancelled => style(label).yellow(),
        _ => style(label).cyan(),
    }
}

fn print_artifacts(artifacts: &Artifacts) {
    for (label, path) in artifacts.paths() {
        println!("   {} {}", style(format!("{}:", label)).dim(), path.display());
    }
}

fn print_notes(job: &Job) {
    for note in &job.notes {
        println!("   {} {}", style("⚠").yellow(), note);
    }
}

/// Report the final state of a submission
pub fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Completed(report) => {
            let job = &report.job;
            println!(
                "{} Job #{} completed with {}: {}",
                style("✓").green().bold(),
                job.id,
                job.engine,
                if job.title.is_empty() { &job.url } else { &job.title }
            );
            if let Some(duration) = job.duration_seconds {
                println!("   {} {}", style("Duration:").dim(), format_duration(duration));
            }
            print_artifacts(&report.artifacts);
            print_notes(job);
        }
        SubmitOutcome::Failed(report) => {
            let job = &report.job;
            println!(
                "{} Job #{} failed: {}",
                style("✗").red().bold(),
                job.id,
                job.error_message.as_deref().unwrap_or("unknown error")
            );
            print_notes(job);
        }
        SubmitOutcome::Cancelled(report) => {
            println!("{} Job #{} was cancelled", style("■").yellow().bold(), report.job.id);
            print_artifacts(&report.artifacts);
        }
        SubmitOutcome::Duplicate(job) => {
            println!(
                "{} {} is already {} as job #{} ({}). Use --force to run it again.",
                style("•").yellow().bold(),
                job.url,
                status_style(job.status),
                job.id,
                job.engine
            );
            if let Some(path) = &job.transcript_path {
                println!("   {} {}", style("Transcript:").dim(), path.display());
            }
        }
        SubmitOutcome::Rejected { url, reason } => {
            println!("{} {}: {}", style("✗").red().bold(), url, reason);
        }
    }
}

/// Table of jobs for the `jobs` command
pub fn print_job_page(page: &Page<Job>) {
    if page.items.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!(
        "{:>5}  {:<12}  {:<22}  {:<16}  {}",
        style("ID").bold(),
        style("STATUS").bold(),
        style("ENGINE").bold(),
        style("CREATED").bold(),
        style("TITLE / URL").bold()
    );
    for job in &page.items {
        let title = if job.title.is_empty() { &job.url } else { &job.title };
        println!(
            "{:>5}  {:<12}  {:<22}  {:<16}  {}",
            job.id,
            status_style(job.status),
            job.engine,
            job.created_at.format("%Y-%m-%d %H:%M"),
            title
        );
    }
    println!(
        "{}",
        style(format!(
            "Page {}/{} ({} jobs)",
            page.page,
            page.total_pages().max(1),
            page.total
        ))
        .dim()
    );
}

/// Every field of one job
pub fn print_job(job: &Job) {
    println!("{} #{}", style("Job").bold(), job.id);
    println!("  Status:    {}", status_style(job.status));
    println!("  URL:       {}", job.url);
    println!("  Video ID:  {}", job.video_id);
    println!("  Title:     {}", job.title);
    println!("  Engine:    {}", job.engine);
    if let Some(duration) = job.duration_seconds {
        println!("  Duration:  {}", format_duration(duration));
    }
    if let Some(language) = &job.language {
        println!("  Language:  {}", language);
    }
    let paths = [
        ("Transcript", &job.transcript_path),
        ("Subtitles", &job.subtitle_path),
        ("Audio", &job.audio_path),
        ("Video", &job.video_path),
    ];
    for (label, path) in paths {
        if let Some(path) = path {
            println!("  {:<10} {}", format!("{}:", label), path.display());
        }
    }
    println!("  Retries:   {}", job.retry_count);
    println!("  Created:   {}", job.created_at.to_rfc3339());
    println!("  Updated:   {}", job.updated_at.to_rfc3339());
    if let Some(completed) = job.completed_at {
        println!("  Completed: {}", completed.to_rfc3339());
    }
    if let Some(error) = &job.error_message {
        println!("  Error:     {}", style(error).red());
    }
    print_notes(job);
    if let Some(summary) = &job.summary {
        println!("\n{}\n{}", style("Summary").bold(), summary);
    }
}

/// Counts by status and engine
pub fn print_stats(stats: &JobStats) {
    println!("{} {}", style("Total jobs:").bold(), stats.total);
    println!("{}", style("By status:").bold());
    for status in JobStatus::ALL {
        println!("  {:<12} {}", status_style(status), stats.count(status));
    }
    if !stats.by_engine.is_empty() {
        println!("{}", style("By engine:").bold());
        for (engine, count) in &stats.by_engine {
            println!("  {:<24} {}", engine, count);
        }
    }
}

/// Engine table for the `engines` command
pub fn print_engines(default: &str) {
    println!("Available engines:");
    for engine in ENGINES.iter() {
        let marker = if engine.name == default || engine.aliases.contains(&default) {
            style("*").green().bold().to_string()
        } else {
            " ".to_string()
        };
        println!(
            " {} {:<24} aliases: {:<16} timestamps: {:<3} audio: {:<3} chunk: {}",
            marker,
            engine.name,
            engine.aliases.join(", "),
            if engine.timestamps { "yes" } else { "no" },
            if engine.requires_audio { "yes" } else { "no" },
            if engine.supports_chunking() {
                format!("{}s", engine.chunk_seconds)
            } else {
                "-".to_string()
            }
        );
    }
}
