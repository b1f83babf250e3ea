//! In-process fakes for driving the pipeline without network, yt-dlp or ffmpeg
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use open_scribe::audio::{AudioToolkit, ChunkFormat};
use open_scribe::config::Config;
use open_scribe::ledger::JobLedger;
use open_scribe::pipeline::{
    AutoConfirm, Confirmer, Pipeline, PipelineEvent, PipelineParts, ProgressSink, Stage,
};
use open_scribe::postprocess::TextGenerator;
use open_scribe::retry::RetryPolicy;
use open_scribe::source::{
    extract_video_id, DownloadProgress, MediaSource, PlaylistEntry, ProgressCallback, VideoMetadata,
};
use open_scribe::transcribe::registry::{self, EngineDescriptor, EngineFactory};
use open_scribe::transcribe::{
    EngineInput, TranscribeOptions, TranscriptSegment, TranscriptionEngine, TranscriptionResult,
};
use open_scribe::{ScribeError, ScribeResult};

pub struct FakeSource {
    pub duration: f64,
    pub playlist: Vec<PlaylistEntry>,
    pub metadata_calls: AtomicUsize,
    pub audio_fetches: AtomicUsize,
    pub video_fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            playlist: Vec::new(),
            metadata_calls: AtomicUsize::new(0),
            audio_fetches: AtomicUsize::new(0),
            video_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_playlist(mut self, ids: &[&str]) -> Self {
        self.playlist = ids
            .iter()
            .map(|id| PlaylistEntry {
                video_id: id.to_string(),
                url: format!("https://www.youtube.com/watch?v={}", id),
                title: format!("Entry {}", id),
            })
            .collect();
        self
    }

    pub fn audio_fetches(&self) -> usize {
        self.audio_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn fetch_metadata(&self, url: &str) -> ScribeResult<VideoMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        match extract_video_id(url) {
            Some(video_id) => Ok(VideoMetadata {
                title: format!("Video {}", video_id),
                video_id,
                duration: Some(self.duration),
                ..VideoMetadata::default()
            }),
            None => Ok(VideoMetadata {
                title: "Mix".to_string(),
                is_playlist: true,
                entries: self.playlist.clone(),
                ..VideoMetadata::default()
            }),
        }
    }

    async fn fetch_audio(&self, _url: &str, dir: &Path, progress: ProgressCallback<'_>) -> ScribeResult<PathBuf> {
        self.audio_fetches.fetch_add(1, Ordering::SeqCst);
        progress(DownloadProgress {
            percent: 100.0,
            total_bytes: Some(10),
            eta_secs: Some(0),
        });
        let path = dir.join("audio.mp3");
        fs_err::write(&path, b"fake audio")?;
        Ok(path)
    }

    async fn fetch_video(&self, _url: &str, dir: &Path) -> ScribeResult<PathBuf> {
        self.video_fetches.fetch_add(1, Ordering::SeqCst);
        let path = dir.join("video.mp4");
        fs_err::write(&path, b"fake video")?;
        Ok(path)
    }
}

/// Writes placeholder files instead of running ffmpeg
pub struct FakeToolkit {
    pub duration: f64,
    pub extracted: AtomicUsize,
}

impl FakeToolkit {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            extracted: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AudioToolkit for FakeToolkit {
    async fn probe_duration(&self, _path: &Path) -> ScribeResult<f64> {
        Ok(self.duration)
    }

    async fn reencode(&self, _input: &Path, output: &Path, _bitrate_kbps: u32) -> ScribeResult<()> {
        fs_err::write(output, b"small")?;
        Ok(())
    }

    async fn extract(
        &self,
        _input: &Path,
        output: &Path,
        _start: f64,
        _duration: f64,
        _format: ChunkFormat,
    ) -> ScribeResult<()> {
        self.extracted.fetch_add(1, Ordering::SeqCst);
        fs_err::write(output, b"chunk")?;
        Ok(())
    }

    async fn convert(&self, _input: &Path, output: &Path, _format: ChunkFormat) -> ScribeResult<()> {
        fs_err::write(output, b"wav")?;
        Ok(())
    }
}

/// What a [`ScriptedEngine`] does when called
pub enum Script {
    Text(String),
    Segments(Vec<TranscriptSegment>),
    Unavailable,
    Fatal,
    /// `part<N>` for chunk N, finishing in reverse chunk order
    ChunkEcho { total: usize },
    /// Signal `started`, then wait for `release`
    Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
    },
}

pub struct ScriptedEngine {
    descriptor: &'static EngineDescriptor,
    script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            descriptor: registry::resolve(name).unwrap(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn chunk_index(input: &EngineInput<'_>) -> usize {
    match input {
        EngineInput::Audio(path) => path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("chunk_"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        EngineInput::Video { .. } => 0,
    }
}

#[async_trait]
impl TranscriptionEngine for ScriptedEngine {
    fn descriptor(&self) -> &'static EngineDescriptor {
        self.descriptor
    }

    async fn transcribe(
        &self,
        input: EngineInput<'_>,
        _options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = self.descriptor.name;
        match &self.script {
            Script::Text(text) => Ok(TranscriptionResult::text_only(name, text.clone())),
            Script::Segments(segments) => Ok(TranscriptionResult::from_segments(name, segments.clone())),
            Script::Unavailable => Err(ScribeError::engine_unavailable(name, "no API key")),
            Script::Fatal => Err(ScribeError::engine_fatal(name, "unsupported audio")),
            Script::ChunkEcho { total } => {
                let index = chunk_index(&input);
                let delay = (total.saturating_sub(index)) as u64 * 5;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(TranscriptionResult::text_only(name, format!("part{}", index)))
            }
            Script::Gated { started, release } => {
                started.notify_one();
                release.notified().await;
                Ok(TranscriptionResult::text_only(name, "finished anyway"))
            }
        }
    }
}

/// Hands out pre-built engines by canonical name
pub struct FakeEngines {
    engines: HashMap<&'static str, Arc<dyn TranscriptionEngine>>,
}

impl FakeEngines {
    pub fn new(engines: Vec<Arc<dyn TranscriptionEngine>>) -> Self {
        Self {
            engines: engines.into_iter().map(|e| (e.name(), e)).collect(),
        }
    }
}

impl EngineFactory for FakeEngines {
    fn build(&self, descriptor: &'static EngineDescriptor) -> ScribeResult<Arc<dyn TranscriptionEngine>> {
        self.engines
            .get(descriptor.name)
            .cloned()
            .ok_or_else(|| ScribeError::engine_unavailable(descriptor.name, "not configured"))
    }
}

pub struct FixedText(pub &'static str);

#[async_trait]
impl TextGenerator for FixedText {
    async fn generate(&self, _text: &str, _instructions: &str) -> ScribeResult<String> {
        Ok(self.0.to_string())
    }
}

pub struct FailingText;

#[async_trait]
impl TextGenerator for FailingText {
    async fn generate(&self, _text: &str, _instructions: &str) -> ScribeResult<String> {
        Err(ScribeError::post_process("chat", "HTTP 500"))
    }
}

pub struct NeverAnswers;

#[async_trait]
impl Confirmer for NeverAnswers {
    async fn confirm(&self, _prompt: &str) -> bool {
        std::future::pending::<bool>().await
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Stages started for `job_id`, in order, without repeats
    pub fn stages(&self, job_id: i64) -> Vec<Stage> {
        let mut stages = Vec::new();
        for event in self.events() {
            if let PipelineEvent::StageStarted { job_id: id, stage, .. } = event {
                if id == job_id && stages.last() != Some(&stage) {
                    stages.push(stage);
                }
            }
        }
        stages
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        multiplier: 2.0,
        max_backoff_ms: 2,
    }
}

pub fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.paths.base = base.to_path_buf();
    config.paths.downloads = base.join("Downloads");
    config.retry.download = fast_retry();
    config.retry.engine = fast_retry();
    config.postprocess.summary = false;
    config
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub source: Arc<FakeSource>,
    pub toolkit: Arc<FakeToolkit>,
    pub progress: Arc<RecordingProgress>,
    pub dir: TempDir,
}

pub struct HarnessBuilder {
    dir: TempDir,
    config: Config,
    source: FakeSource,
    duration: f64,
    engines: Vec<Arc<dyn TranscriptionEngine>>,
    summarizer: Arc<dyn TextGenerator>,
    translator: Arc<dyn TextGenerator>,
    confirmer: Arc<dyn Confirmer>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        Self {
            dir,
            config,
            source: FakeSource::new(120.0),
            duration: 120.0,
            engines: Vec::new(),
            summarizer: Arc::new(FixedText("A short summary.")),
            translator: Arc::new(FixedText("translated")),
            confirmer: Arc::new(AutoConfirm(true)),
        }
    }

    pub fn config(mut self, edit: impl FnOnce(&mut Config)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self.source.duration = seconds;
        self
    }

    pub fn playlist(mut self, ids: &[&str]) -> Self {
        self.source = self.source.with_playlist(ids);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TranscriptionEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn summarizer(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.summarizer = generator;
        self
    }

    pub fn confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub async fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let toolkit = Arc::new(FakeToolkit::new(self.duration));
        let progress = Arc::new(RecordingProgress::default());
        let ledger = JobLedger::in_memory().await.unwrap();

        let pipeline = Pipeline::from_parts(PipelineParts {
            config: self.config,
            ledger,
            source: source.clone(),
            toolkit: toolkit.clone(),
            engines: Arc::new(FakeEngines::new(self.engines)),
            summarizer: self.summarizer,
            translator: self.translator,
            progress: progress.clone(),
            confirmer: self.confirmer,
        });

        Harness {
            pipeline,
            source,
            toolkit,
            progress,
            dir: self.dir,
        }
    }
}
