//! Job orchestration
//!
//! [`Pipeline`] drives one URL through the job lifecycle:
//! duplicate check, engine selection, audio acquisition, transcription (direct or chunked),
//! best-effort post-processing and persistence. It is the only writer of job status.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioPreparer, AudioToolkit, Ffmpeg};
use crate::config::Config;
use crate::ledger::{Job, JobLedger, JobStatus, JobUpdate, NewJob};
use crate::output::{render_segments, render_transcript, ArtifactWriter};
use crate::postprocess::language::{detect_language, language_code, same_language};
use crate::postprocess::{subtitles, summary, translate, OpenAiChat, TextGenerator};
use crate::source::{
    extract_video_id, is_playlist_url, validate_youtube_url, watch_url, DownloadProgress, MediaSource,
    YtDlp,
};
use crate::transcribe::{
    EngineDescriptor, EngineFactory, EngineInput, EngineRegistry, TranscribeOptions, TranscriptionEngine,
    TranscriptionResult,
};
use crate::workers::{ChunkProgress, ParallelDispatcher, WorkerSizing};
use crate::{ScribeError, ScribeResult};

pub mod events;
pub mod options;
pub mod playlist;

pub use events::{NoopProgress, PipelineEvent, ProgressSink, Stage, TracingProgress};
pub use options::{Artifacts, JobReport, SubmitOptions, SubmitOutcome};
pub use playlist::{confirm_batch, AutoConfirm, Confirmer};

/// Collaborators a [`Pipeline`] is assembled from
pub struct PipelineParts {
    pub config: Config,
    pub ledger: JobLedger,
    pub source: Arc<dyn MediaSource>,
    pub toolkit: Arc<dyn AudioToolkit>,
    pub engines: Arc<dyn EngineFactory>,
    pub summarizer: Arc<dyn TextGenerator>,
    pub translator: Arc<dyn TextGenerator>,
    pub progress: Arc<dyn ProgressSink>,
    pub confirmer: Arc<dyn Confirmer>,
}

/// Top-level job driver
pub struct Pipeline {
    config: Config,
    ledger: JobLedger,
    source: Arc<dyn MediaSource>,
    audio: AudioPreparer,
    engines: Arc<dyn EngineFactory>,
    summarizer: Arc<dyn TextGenerator>,
    translator: Arc<dyn TextGenerator>,
    progress: Arc<dyn ProgressSink>,
    confirmer: Arc<dyn Confirmer>,
    writer: ArtifactWriter,
    sizing: WorkerSizing,
    active_jobs: AtomicUsize,
    cancellations: Mutex<HashMap<i64, CancellationToken>>,
}

/// Mutable state of one job while its stages run
struct JobRun<'a> {
    id: i64,
    url: String,
    video_id: String,
    title: String,
    duration: Option<f64>,
    engine: &'static EngineDescriptor,
    options: &'a SubmitOptions,
    cancel: CancellationToken,
    scratch: PathBuf,
    audio: Option<PathBuf>,
    artifacts: Artifacts,
}

/// Keeps the active-job count and cancellation registry in step with running jobs
struct ActiveJob<'a> {
    pipeline: &'a Pipeline,
    id: i64,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.pipeline.active_jobs.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut tokens) = self.pipeline.cancellations.lock() {
            tokens.remove(&self.id);
        }
    }
}

/// Post-processor output waiting to be written
#[derive(Default)]
struct Derived {
    summary: Option<String>,
    subtitles: Option<String>,
    translation: Option<(String, String)>,
    translated_subtitles: Option<String>,
}

impl Pipeline {
    pub fn from_parts(parts: PipelineParts) -> Self {
        let PipelineParts {
            config,
            ledger,
            source,
            toolkit,
            engines,
            summarizer,
            translator,
            progress,
            confirmer,
        } = parts;

        let audio = AudioPreparer::new(
            source.clone(),
            toolkit,
            config.audio.clone(),
            config.retry.download.clone(),
        );

        Self {
            writer: ArtifactWriter::new(&config.paths),
            sizing: WorkerSizing::from_config(&config.workers),
            audio,
            config,
            ledger,
            source,
            engines,
            summarizer,
            translator,
            progress,
            confirmer,
            active_jobs: AtomicUsize::new(0),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring: SQLite ledger, yt-dlp, ffmpeg, configured engines and chat client
    pub async fn new(
        config: Config,
        progress: Arc<dyn ProgressSink>,
        confirmer: Arc<dyn Confirmer>,
    ) -> ScribeResult<Self> {
        let ledger = JobLedger::open(
            &config.paths.database_path(),
            chrono::Duration::minutes(config.jobs.stale_after_minutes),
        )
        .await?;
        ledger.recover_interrupted().await?;

        let (summarizer, translator) = OpenAiChat::from_config(&config)?;
        let toolkit = Ffmpeg::new(
            config.audio.ffmpeg.clone(),
            config.audio.ffprobe.clone(),
            config.audio.sample_rate,
        );

        Ok(Self::from_parts(PipelineParts {
            ledger,
            source: Arc::new(YtDlp::new(config.paths.yt_dlp.clone())),
            toolkit: Arc::new(toolkit),
            engines: Arc::new(EngineRegistry::new(&config)?),
            summarizer: Arc::new(summarizer),
            translator: Arc::new(translator),
            progress,
            confirmer,
            config,
        }))
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Cancel a job.
    ///
    /// A job running in this process stops at its next stage boundary; a job running
    /// elsewhere notices the ledger status at its next checkpoint.
    pub async fn cancel(&self, job_id: i64) -> ScribeResult<Job> {
        let status = self.ledger.status(job_id).await?;
        if status.is_terminal() {
            return Err(ScribeError::AlreadyFinished { job_id, status });
        }

        if let Some(token) = self
            .cancellations
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&job_id).cloned())
        {
            token.cancel();
        }

        let job = match self
            .ledger
            .transition(job_id, JobStatus::Cancelled, JobUpdate::default())
            .await
        {
            // finished between the status read and the transition
            Err(ScribeError::InvalidTransition { from, .. }) if from.is_terminal() => {
                return Err(ScribeError::AlreadyFinished { job_id, status: from })
            }
            other => other?,
        };
        tracing::info!(job_id, "Job cancelled");
        Ok(job)
    }

    /// Submit a video or playlist URL and run every resulting job to a final state
    pub async fn submit(&self, url: &str, options: &SubmitOptions) -> ScribeResult<Vec<SubmitOutcome>> {
        let url = url.trim();
        if let Err(e) = validate_youtube_url(url) {
            return Ok(vec![rejected(url, &e)]);
        }

        let requested = options
            .engine
            .as_deref()
            .unwrap_or(&self.config.engines.default);
        let engine = match self.engines.resolve(requested) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(url, engine = requested, "Rejected submission with unknown engine");
                return Ok(vec![rejected(url, &e)]);
            }
        };

        if is_playlist_url(url) && extract_video_id(url).is_none() {
            return self.submit_playlist(url, engine, options).await;
        }

        Ok(vec![self.run_single(url, engine, options).await?])
    }

    async fn submit_playlist(
        &self,
        url: &str,
        engine: &'static EngineDescriptor,
        options: &SubmitOptions,
    ) -> ScribeResult<Vec<SubmitOutcome>> {
        let outcome = self
            .config
            .retry
            .download
            .run("playlist", ScribeError::is_retryable, move |_| self.source.fetch_metadata(url))
            .await;
        let playlist = match outcome.result {
            Ok(playlist) => playlist,
            Err(e) => return Ok(vec![rejected(url, &e)]),
        };

        if playlist.entries.is_empty() {
            return Ok(vec![SubmitOutcome::Rejected {
                url: url.to_string(),
                reason: "playlist has no videos".to_string(),
            }]);
        }

        tracing::info!(url, videos = playlist.entries.len(), title = %playlist.title, "Playlist resolved");
        if !options.assume_yes {
            let prompt = format!(
                "Playlist \"{}\" has {} videos. Transcribe all of them?",
                playlist.title,
                playlist.entries.len()
            );
            let timeout = Duration::from_secs(self.config.jobs.playlist_confirm_timeout_secs);
            confirm_batch(self.confirmer.as_ref(), &prompt, timeout).await?;
        }

        let outcomes: Vec<ScribeResult<SubmitOutcome>> = stream::iter(&playlist.entries)
            .map(|entry| self.run_single(&entry.url, engine, options))
            .buffer_unordered(self.config.jobs.max_concurrent_jobs.max(1))
            .collect()
            .await;

        outcomes.into_iter().collect()
    }

    /// Create the job row, run every stage and record the final state
    async fn run_single(
        &self,
        url: &str,
        engine: &'static EngineDescriptor,
        options: &SubmitOptions,
    ) -> ScribeResult<SubmitOutcome> {
        let video_id = extract_video_id(url).unwrap_or_default();
        let job_url = if video_id.is_empty() {
            url.to_string()
        } else {
            watch_url(&video_id)
        };

        let created = self
            .ledger
            .create(NewJob {
                url: &job_url,
                video_id: &video_id,
                title: "",
                engine: engine.name,
                force: options.force,
            })
            .await;
        let id = match created {
            Ok(id) => id,
            Err(ScribeError::DuplicateActiveJob { job_id, status, .. }) => {
                tracing::info!(url = %job_url, engine = engine.name, job_id, %status, "Duplicate submission skipped");
                return Ok(SubmitOutcome::Duplicate(self.ledger.require(job_id).await?));
            }
            Err(e) => return Err(e),
        };

        self.progress.emit(PipelineEvent::JobCreated {
            job_id: id,
            url: job_url.clone(),
            engine: engine.name.to_string(),
        });

        let cancel = CancellationToken::new();
        let _active = self.track(id, cancel.clone());

        let mut run = JobRun {
            id,
            url: job_url,
            video_id,
            title: String::new(),
            duration: None,
            engine,
            options,
            cancel,
            scratch: PathBuf::new(),
            audio: None,
            artifacts: Artifacts::default(),
        };

        let result = self.execute(&mut run).await;
        self.finish(run, result).await
    }

    fn track(&self, id: i64, cancel: CancellationToken) -> ActiveJob<'_> {
        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tokens) = self.cancellations.lock() {
            tokens.insert(id, cancel);
        }
        ActiveJob { pipeline: self, id }
    }

    async fn execute(&self, run: &mut JobRun<'_>) -> ScribeResult<()> {
        let temp_root = self.config.paths.temp_dir();
        fs_err::create_dir_all(&temp_root)?;
        // dropped (and removed with every chunk file) once the stages are done
        let scratch = tempfile::Builder::new()
            .prefix(&format!("job-{}-", run.id))
            .tempdir_in(&temp_root)?;
        run.scratch = scratch.path().to_path_buf();

        self.resolve_metadata(run).await?;

        if run.engine.requires_audio {
            self.checkpoint(run).await?;
            self.advance(run.id, JobStatus::Downloading, JobUpdate::default()).await?;
            self.fetch_audio(run).await?;
        }

        self.checkpoint(run).await?;
        self.advance(run.id, JobStatus::Transcribing, JobUpdate::default()).await?;
        let transcript = self.transcribe(run).await?;

        self.checkpoint(run).await?;
        self.advance(
            run.id,
            JobStatus::Processing,
            JobUpdate {
                engine: Some(run.engine.name.to_string()),
                language: transcript.language.clone(),
                duration_seconds: transcript.duration.or(run.duration),
                ..JobUpdate::default()
            },
        )
        .await?;
        let derived = self.post_process(run, &transcript).await?;

        self.checkpoint(run).await?;
        let update = self.persist(run, &transcript, derived).await?;
        self.advance(run.id, JobStatus::Completed, update).await?;
        Ok(())
    }

    /// Stop between stages when the job was cancelled here or through the ledger
    async fn checkpoint(&self, run: &JobRun<'_>) -> ScribeResult<()> {
        if run.cancel.is_cancelled() {
            return Err(ScribeError::Cancelled);
        }
        if self.ledger.status(run.id).await? == JobStatus::Cancelled {
            run.cancel.cancel();
            return Err(ScribeError::Cancelled);
        }
        Ok(())
    }

    /// Transition, reading a refusal from an already cancelled row as cancellation
    async fn advance(&self, id: i64, next: JobStatus, update: JobUpdate) -> ScribeResult<Job> {
        match self.ledger.transition(id, next, update).await {
            Err(ScribeError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => Err(ScribeError::Cancelled),
            other => other,
        }
    }

    async fn record_retries(&self, id: i64, retries: u32) -> ScribeResult<()> {
        if retries > 0 {
            self.ledger.record_retries(id, retries).await?;
        }
        Ok(())
    }

    /// Record a non-fatal problem on the job
    async fn warn(&self, run: &JobRun<'_>, message: String) -> ScribeResult<()> {
        tracing::warn!(job_id = run.id, %message, "Job warning");
        self.ledger.annotate(run.id, &message).await?;
        self.progress.emit(PipelineEvent::Warning {
            job_id: run.id,
            message,
        });
        Ok(())
    }

    fn stage(&self, run: &JobRun<'_>, stage: Stage, detail: Option<String>) {
        self.progress.emit(PipelineEvent::StageStarted {
            job_id: run.id,
            stage,
            detail,
        });
    }

    async fn resolve_metadata(&self, run: &mut JobRun<'_>) -> ScribeResult<()> {
        self.checkpoint(run).await?;
        self.stage(run, Stage::Metadata, None);

        let url = run.url.as_str();
        let outcome = self
            .config
            .retry
            .download
            .run("metadata", ScribeError::is_retryable, move |_| self.source.fetch_metadata(url))
            .await;
        self.record_retries(run.id, outcome.retries).await?;
        let metadata = outcome.result?;

        if run.video_id.is_empty() {
            run.video_id = metadata.video_id;
        }
        run.title = metadata.title;
        run.duration = metadata.duration;
        self.ledger
            .set_metadata(
                run.id,
                Some(run.title.as_str()),
                Some(run.video_id.as_str()).filter(|id| !id.is_empty()),
                run.duration,
            )
            .await?;

        tracing::info!(job_id = run.id, title = %run.title, duration = ?run.duration, "Video resolved");
        Ok(())
    }

    async fn fetch_audio(&self, run: &mut JobRun<'_>) -> ScribeResult<PathBuf> {
        self.stage(run, Stage::Download, None);

        let job_id = run.id;
        let progress = self.progress.as_ref();
        let report = move |p: DownloadProgress| {
            progress.emit(PipelineEvent::Progress {
                job_id,
                stage: Stage::Download,
                percent: p.percent,
                bytes: p.total_bytes,
                eta: p.eta_secs.map(Duration::from_secs),
            })
        };

        let outcome = self.audio.download(&run.url, &run.scratch, &report).await;
        self.record_retries(run.id, outcome.retries).await?;
        let audio = outcome.result?;

        tracing::info!(job_id = run.id, path = %audio.display(), "Audio downloaded");
        run.audio = Some(audio.clone());
        Ok(audio)
    }

    /// Transcribe with the selected engine, substituting the fallback engine at most once
    async fn transcribe(&self, run: &mut JobRun<'_>) -> ScribeResult<TranscriptionResult> {
        let primary = run.engine;
        self.stage(run, Stage::Transcribe, Some(primary.name.to_string()));

        let error = match self.transcribe_with(run, primary).await {
            Ok(transcript) => return Ok(transcript),
            Err(e) => e,
        };

        let fallback = match self.fallback_for(primary) {
            Some(fallback) if error.triggers_fallback() => fallback,
            _ => return Err(error),
        };

        self.warn(
            run,
            format!("engine fallback: {} -> {}: {}", primary.name, fallback.name, error),
        )
        .await?;
        self.checkpoint(run).await?;
        run.engine = fallback;
        self.stage(run, Stage::Transcribe, Some(fallback.name.to_string()));
        self.transcribe_with(run, fallback).await
    }

    fn fallback_for(&self, primary: &EngineDescriptor) -> Option<&'static EngineDescriptor> {
        let name = self.config.engines.fallback.as_deref()?;
        match self.engines.resolve(name) {
            Ok(fallback) if fallback.name != primary.name => Some(fallback),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Configured fallback engine is unknown");
                None
            }
        }
    }

    async fn transcribe_with(
        &self,
        run: &mut JobRun<'_>,
        descriptor: &'static EngineDescriptor,
    ) -> ScribeResult<TranscriptionResult> {
        let engine = self.engines.build(descriptor)?;
        let engine = engine.as_ref();
        let options = TranscribeOptions {
            timestamps: run.options.wants_segments(),
            language: run.options.language.clone(),
        };
        let options = &options;

        let transcript = if engine.requires_audio_download() {
            let audio = match run.audio.clone() {
                Some(audio) => audio,
                // the fallback may need audio the primary engine never asked for
                None => self.fetch_audio(run).await?,
            };
            self.transcribe_audio(run, descriptor, engine, &audio, options)
                .await?
        } else {
            let (video_id, url) = (run.video_id.as_str(), run.url.as_str());
            let outcome = self
                .config
                .retry
                .engine
                .run("transcribe", ScribeError::is_retryable, move |_| {
                    engine.transcribe(EngineInput::Video { video_id, url }, options)
                })
                .await;
            self.record_retries(run.id, outcome.retries).await?;
            outcome.result?
        };

        if transcript.is_empty() {
            return Err(ScribeError::engine_fatal(descriptor.name, "transcript is empty"));
        }
        if options.timestamps && !transcript.has_segments() {
            self.warn(run, format!("{} returned no timestamps", descriptor.name))
                .await?;
        }

        tracing::info!(
            job_id = run.id,
            engine = descriptor.name,
            chars = transcript.text.len(),
            "Transcription finished"
        );
        Ok(transcript)
    }

    /// Whole-file call for short audio, chunked dispatch otherwise
    async fn transcribe_audio(
        &self,
        run: &mut JobRun<'_>,
        descriptor: &'static EngineDescriptor,
        engine: &dyn TranscriptionEngine,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult> {
        let duration = match run.duration.filter(|d| *d > 0.0) {
            Some(duration) => duration,
            None => {
                let probed = self.audio.probe_duration(audio).await?;
                run.duration = Some(probed);
                probed
            }
        };

        let parallel = descriptor.supports_chunking()
            && duration >= self.config.workers.parallel_threshold_secs
            && duration > descriptor.chunk_seconds as f64;

        if !parallel {
            let prepared = self.audio.prepare_for(audio, descriptor, &run.scratch).await?;
            let prepared = prepared.as_path();
            let outcome = self
                .config
                .retry
                .engine
                .run("transcribe", ScribeError::is_retryable, move |_| {
                    engine.transcribe(EngineInput::Audio(prepared), options)
                })
                .await;
            self.record_retries(run.id, outcome.retries).await?;
            return outcome.result;
        }

        let chunk_dir = run.scratch.join(format!("chunks-{}", descriptor.name));
        fs_err::create_dir_all(&chunk_dir)?;
        let chunks = self.audio.split(audio, duration, descriptor, &chunk_dir).await?;

        let workers = match run.options.parallel_workers {
            Some(requested) => requested.clamp(1, chunks.len().max(1)),
            None => self.sizing.compute(chunks.len(), descriptor, self.active_jobs().max(1)),
        };
        tracing::info!(job_id = run.id, chunks = chunks.len(), workers, "Parallel transcription");
        self.stage(
            run,
            Stage::Transcribe,
            Some(format!("{} chunks on {} workers", chunks.len(), workers)),
        );

        let job_id = run.id;
        let progress = self.progress.as_ref();
        let report = move |p: ChunkProgress| {
            progress.emit(PipelineEvent::Progress {
                job_id,
                stage: Stage::Transcribe,
                percent: p.percent(),
                bytes: None,
                eta: p.eta,
            })
        };

        let dispatcher = ParallelDispatcher::new(workers, self.config.retry.engine.clone());
        let outcome = dispatcher
            .run(engine, &chunks, options, &report, &run.cancel)
            .await?;
        self.record_retries(run.id, outcome.retries).await?;

        if !outcome.gaps.is_empty() {
            let gaps: Vec<String> = outcome.gaps.iter().map(|i| (i + 1).to_string()).collect();
            self.warn(
                run,
                format!(
                    "{} of {} chunks failed and were left out: {}",
                    gaps.len(),
                    chunks.len(),
                    gaps.join(", ")
                ),
            )
            .await?;
        }
        Ok(outcome.transcript)
    }

    /// Summary, translation and subtitles; each failure becomes a warning
    async fn post_process(&self, run: &JobRun<'_>, transcript: &TranscriptionResult) -> ScribeResult<Derived> {
        let options = run.options;
        let settings = &self.config.postprocess;
        let mut derived = Derived::default();

        self.stage(run, Stage::PostProcess, None);

        let detected = transcript
            .language
            .as_deref()
            .map(language_code)
            .or_else(|| detect_language(&transcript.text).map(str::to_string));

        if options.summary.unwrap_or(settings.summary) {
            match summary::summarize(
                self.summarizer.as_ref(),
                &transcript.text,
                settings.summary_language.as_deref(),
            )
            .await
            {
                Ok(text) => derived.summary = Some(text),
                Err(e) => self.warn(run, e.to_string()).await?,
            }
        }

        if let Some(format) = options.subtitles {
            match transcript.segments.as_deref().filter(|s| !s.is_empty()) {
                Some(segments) => {
                    derived.subtitles = Some(subtitles::render(segments, format, settings.subtitle_line_width))
                }
                None => {
                    self.warn(
                        run,
                        format!("subtitles skipped: {} returned no timed segments", transcript.engine),
                    )
                    .await?
                }
            }
        }

        let target = language_code(options.translate_to.as_deref().unwrap_or(&settings.translate_to));
        let already_target = detected.as_deref().is_some_and(|d| same_language(d, &target));
        if options.translate.unwrap_or(settings.translate && !already_target) {
            if let Err(e) = self.translate(run, transcript, detected.as_deref(), &target, &mut derived).await {
                self.warn(run, e.to_string()).await?;
            }
        } else if already_target && settings.translate {
            tracing::info!(job_id = run.id, language = %target, "Transcript already in target language, skipping translation");
        }

        Ok(derived)
    }

    async fn translate(
        &self,
        run: &JobRun<'_>,
        transcript: &TranscriptionResult,
        source: Option<&str>,
        target: &str,
        derived: &mut Derived,
    ) -> ScribeResult<()> {
        let generator = self.translator.as_ref();
        let segments = transcript.segments.as_deref().filter(|s| !s.is_empty());

        match segments {
            Some(segments) if run.options.wants_segments() => {
                let translated = translate::translate_segments(generator, segments, source, target).await?;
                let text = if run.options.timestamps {
                    render_segments(&translated)
                } else {
                    render_transcript(
                        &TranscriptionResult::from_segments(&transcript.engine, translated.clone()),
                        false,
                    )
                };
                derived.translation = Some((target.to_string(), text));
                if let Some(format) = run.options.subtitles {
                    derived.translated_subtitles = Some(subtitles::render(
                        &translated,
                        format,
                        self.config.postprocess.subtitle_line_width,
                    ));
                }
            }
            _ => {
                let text = translate::translate_text(generator, &transcript.text, source, target).await?;
                derived.translation = Some((target.to_string(), format!("{}\n", text.trim())));
            }
        }
        Ok(())
    }

    /// Write artifacts and build the completion update
    async fn persist(
        &self,
        run: &mut JobRun<'_>,
        transcript: &TranscriptionResult,
        derived: Derived,
    ) -> ScribeResult<JobUpdate> {
        self.stage(run, Stage::Persist, None);

        let options = run.options;
        let stem = ArtifactWriter::stem(&run.title, &run.video_id);
        let mut warnings = Vec::new();

        let transcript_path = self
            .writer
            .write_transcript(&stem, &render_transcript(transcript, options.timestamps))?;
        run.artifacts.transcript = Some(transcript_path.clone());

        if let Some(text) = &derived.summary {
            match self
                .writer
                .write_summary(&stem, &summary::format_summary(text, &run.title))
            {
                Ok(path) => run.artifacts.summary = Some(path),
                Err(e) => warnings.push(format!("summary not saved: {}", e)),
            }
        }

        if let (Some(content), Some(format)) = (&derived.subtitles, options.subtitles) {
            match self.writer.write_subtitles(&stem, format, content) {
                Ok(path) => run.artifacts.subtitles = Some(path),
                Err(e) => warnings.push(format!("subtitles not saved: {}", e)),
            }
        }

        if let Some((language, text)) = &derived.translation {
            match self.writer.write_translation(&stem, language, text) {
                Ok(path) => run.artifacts.translation = Some(path),
                Err(e) => warnings.push(format!("translation not saved: {}", e)),
            }
            if let (Some(content), Some(format)) = (&derived.translated_subtitles, options.subtitles) {
                match self
                    .writer
                    .write_translated_subtitles(&stem, language, format, content)
                {
                    Ok(path) => run.artifacts.translated_subtitles = Some(path),
                    Err(e) => warnings.push(format!("translated subtitles not saved: {}", e)),
                }
            }
        }

        if options.keep_audio {
            match &run.audio {
                Some(audio) => match self.writer.keep_audio(&stem, audio) {
                    Ok(path) => run.artifacts.audio = Some(path),
                    Err(e) => warnings.push(format!("audio not kept: {}", e)),
                },
                None => warnings.push(format!("no audio to keep: {} works without a download", run.engine.name)),
            }
        }

        if options.download_video {
            let video_dir = self.writer.video_dir().to_path_buf();
            let fetched = match fs_err::create_dir_all(&video_dir) {
                Ok(()) => self.source.fetch_video(&run.url, &video_dir).await,
                Err(e) => Err(e.into()),
            };
            match fetched {
                Ok(path) => run.artifacts.video = Some(path),
                Err(e) => warnings.push(format!("video download failed: {}", e)),
            }
        }

        if options.copy_to_downloads {
            let produced: Vec<PathBuf> = [
                &run.artifacts.transcript,
                &run.artifacts.summary,
                &run.artifacts.subtitles,
                &run.artifacts.translation,
                &run.artifacts.translated_subtitles,
            ]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
            for path in produced {
                match self.writer.copy_to_downloads(&path) {
                    Ok(copy) => run.artifacts.copies.push(copy),
                    Err(e) => warnings.push(format!("copy to downloads failed: {}", e)),
                }
            }
        }

        for warning in warnings {
            self.warn(run, warning).await?;
        }

        Ok(JobUpdate {
            engine: Some(run.engine.name.to_string()),
            transcript_path: Some(transcript_path),
            audio_path: run.artifacts.audio.clone(),
            video_path: run.artifacts.video.clone(),
            subtitle_path: run.artifacts.subtitles.clone(),
            summary: derived.summary,
            ..JobUpdate::default()
        })
    }

    /// Fold the stage result into the job's final status
    async fn finish(&self, run: JobRun<'_>, result: ScribeResult<()>) -> ScribeResult<SubmitOutcome> {
        let id = run.id;
        let outcome = match result {
            Ok(()) => SubmitOutcome::Completed(JobReport {
                job: self.ledger.require(id).await?,
                artifacts: run.artifacts,
            }),
            Err(e) if e.is_contract_violation() => return Err(e),
            Err(ScribeError::Ledger(e)) => return Err(ScribeError::Ledger(e)),
            Err(ScribeError::Cancelled) => SubmitOutcome::Cancelled(JobReport {
                job: self.mark_cancelled(id).await?,
                artifacts: run.artifacts,
            }),
            Err(e) => {
                tracing::error!(job_id = id, engine = run.engine.name, error = %e, "Job failed");
                let update = JobUpdate {
                    engine: Some(run.engine.name.to_string()),
                    ..JobUpdate::failure(e.to_string())
                };
                match self.ledger.transition(id, JobStatus::Failed, update).await {
                    Ok(job) => SubmitOutcome::Failed(JobReport {
                        job,
                        artifacts: run.artifacts,
                    }),
                    // cancelled elsewhere while the stage was failing
                    Err(ScribeError::InvalidTransition {
                        from: JobStatus::Cancelled,
                        ..
                    }) => SubmitOutcome::Cancelled(JobReport {
                        job: self.ledger.require(id).await?,
                        artifacts: run.artifacts,
                    }),
                    Err(e) => return Err(e),
                }
            }
        };

        if let Some(job) = outcome.job() {
            self.progress.emit(PipelineEvent::Finished {
                job_id: id,
                status: job.status,
                error: job.error_message.clone(),
            });
        }
        Ok(outcome)
    }

    async fn mark_cancelled(&self, id: i64) -> ScribeResult<Job> {
        match self
            .ledger
            .transition(id, JobStatus::Cancelled, JobUpdate::default())
            .await
        {
            Ok(job) => Ok(job),
            Err(ScribeError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => self.ledger.require(id).await,
            Err(e) => Err(e),
        }
    }
}

fn rejected(url: &str, error: &ScribeError) -> SubmitOutcome {
    SubmitOutcome::Rejected {
        url: url.to_string(),
        reason: error.to_string(),
    }
}
