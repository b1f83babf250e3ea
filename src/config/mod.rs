use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;
use crate::transcribe::registry;

const APP_DIR: &str = "open-scribe";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output folders, database location and external tools
    pub paths: PathsConfig,

    /// Engine selection and provider settings
    pub engines: EnginesConfig,

    /// Chunk-level worker pool sizing
    pub workers: WorkersConfig,

    /// Size ceiling, re-encoding ladder and chunk overlap
    pub audio: AudioConfig,

    /// Retry budgets per call site
    pub retry: RetryConfig,

    /// Summary, translation and subtitle defaults
    pub postprocess: PostprocessConfig,

    /// Ledger and outer job concurrency
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root folder; the per-artifact folders below default to children of it
    pub base: PathBuf,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    /// Scratch space for downloads and chunk files
    pub temp: Option<PathBuf>,
    /// Where `--downloads` copies finished transcripts
    pub downloads: PathBuf,
    pub database: Option<PathBuf>,
    pub yt_dlp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// Engine used when none is given on the command line
    pub default: String,

    /// Substituted once when the selected engine is unavailable or keeps failing
    pub fallback: Option<String>,

    /// Only read from the environment; never written to disk
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,

    pub openai_base_url: String,
    pub request_timeout_secs: u64,
    pub whisper_cpp: WhisperCppConfig,

    /// Caption languages tried in order when none is requested
    pub caption_languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperCppConfig {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub threads: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub min_workers: usize,
    pub max_workers: usize,

    /// Share of available memory chunk workers may claim
    pub memory_safety_factor: f64,

    /// Assumed available memory when the system cannot report it
    pub fallback_memory_gb: f64,

    /// Audio at least this long is transcribed in parallel chunks
    pub parallel_threshold_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Upload ceiling for engines that declare one
    pub size_limit_bytes: u64,
    /// Re-encoding steps tried in order, in kbps
    pub bitrate_ladder_kbps: Vec<u32>,
    pub sample_rate: u32,
    pub chunk_overlap_secs: f64,
    pub ffmpeg: String,
    pub ffprobe: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub download: RetryPolicy,
    pub engine: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    pub summary: bool,
    /// Summary language; `None` keeps the transcript's language
    pub summary_language: Option<String>,
    pub summary_model: String,
    /// Translate by default unless the transcript is already in `translate_to`
    pub translate: bool,
    pub translation_model: String,
    pub translate_to: String,
    pub subtitle_line_width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Outer concurrency ceiling for playlist entries
    pub max_concurrent_jobs: usize,
    /// In-flight jobs idle for longer than this no longer block resubmission
    pub stale_after_minutes: i64,
    pub playlist_confirm_timeout_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            base: dirs::document_dir()
                .unwrap_or_else(|| home.join("Documents"))
                .join(APP_DIR),
            audio: None,
            video: None,
            transcript: None,
            temp: None,
            downloads: dirs::download_dir().unwrap_or_else(|| home.join("Downloads")),
            database: None,
            yt_dlp: "yt-dlp".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn audio_dir(&self) -> PathBuf {
        self.audio.clone().unwrap_or_else(|| self.base.join("audio"))
    }

    pub fn video_dir(&self) -> PathBuf {
        self.video.clone().unwrap_or_else(|| self.base.join("video"))
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript
            .clone()
            .unwrap_or_else(|| self.base.join("transcript"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp.clone().unwrap_or_else(|| self.base.join("temp_audio"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.base.join("transcription_jobs.db"))
    }

    /// Create every output folder
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.base.clone(),
            self.audio_dir(),
            self.video_dir(),
            self.transcript_dir(),
            self.temp_dir(),
        ] {
            fs_err::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            default: "gpt-4o-mini-transcribe".to_string(),
            fallback: Some("youtube-transcript-api".to_string()),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 600,
            whisper_cpp: WhisperCppConfig::default(),
            caption_languages: ["en", "ko", "ja", "zh"].map(String::from).to_vec(),
        }
    }
}

impl Default for WhisperCppConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("whisper.cpp");
        Self {
            executable: root.join("build").join("bin").join("whisper-cli"),
            model: root.join("models").join("ggml-base.bin"),
            threads: 4,
            timeout_secs: 3600,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            memory_safety_factor: 0.7,
            fallback_memory_gb: 8.0,
            parallel_threshold_secs: 600.0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            size_limit_bytes: 25 * 1024 * 1024,
            bitrate_ladder_kbps: vec![64, 48, 32, 24],
            sample_rate: 16_000,
            chunk_overlap_secs: 5.0,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            summary: true,
            summary_language: None,
            summary_model: "gpt-4o-mini".to_string(),
            translate: false,
            translation_model: "gpt-4o-mini".to_string(),
            translate_to: "ko".to_string(),
            subtitle_line_width: 42,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            stale_after_minutes: 180,
            playlist_confirm_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, `./config.yaml` or the user config directory.
    ///
    /// A missing file is created with defaults. Environment overrides are applied last.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit)?;

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            serde_yaml::from_str::<Config>(&content).context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!(path = %config_path.display(), "Created default configuration");
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Resolve the configuration file path
    pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join(APP_DIR).join("config.yaml"))
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.engines.openai_api_key = Some(key);
        }
        if let Some(base) = get("OPEN_SCRIBE_BASE_PATH") {
            self.paths.base = PathBuf::from(base);
        }
        if let Some(db) = get("OPEN_SCRIBE_DB_PATH") {
            self.paths.database = Some(PathBuf::from(db));
        }
        if let Some(downloads) = get("OPEN_SCRIBE_DOWNLOADS_PATH") {
            self.paths.downloads = PathBuf::from(downloads);
        }
        if let Some(engine) = get("OPEN_SCRIBE_ENGINE") {
            self.engines.default = engine;
        }
        if let Some(exe) = get("WHISPER_CPP_EXECUTABLE") {
            self.engines.whisper_cpp.executable = PathBuf::from(exe);
        }
        if let Some(model) = get("WHISPER_CPP_MODEL") {
            self.engines.whisper_cpp.model = PathBuf::from(model);
        }
        if let Some(model) = get("OPENAI_SUMMARY_MODEL") {
            self.postprocess.summary_model = model;
        }
        if let Some(language) = get("OPENAI_SUMMARY_LANGUAGE") {
            self.postprocess.summary_language = (!language.eq_ignore_ascii_case("auto")).then_some(language);
        }
        if let Some(model) = get("OPENAI_TRANSLATE_MODEL") {
            self.postprocess.translation_model = model;
        }
        if let Some(language) = get("OPENAI_TRANSLATE_LANGUAGE") {
            self.postprocess.translate_to = language;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let workers = &self.workers;
        if workers.min_workers == 0 {
            anyhow::bail!("workers.min_workers must be at least 1");
        }
        if workers.min_workers > workers.max_workers {
            anyhow::bail!(
                "workers.min_workers ({}) exceeds workers.max_workers ({})",
                workers.min_workers,
                workers.max_workers
            );
        }
        if !(workers.memory_safety_factor > 0.0 && workers.memory_safety_factor <= 1.0) {
            anyhow::bail!("workers.memory_safety_factor must be in (0, 1]");
        }
        if self.audio.bitrate_ladder_kbps.is_empty() {
            anyhow::bail!("audio.bitrate_ladder_kbps must not be empty");
        }
        if self.audio.chunk_overlap_secs < 0.0 {
            anyhow::bail!("audio.chunk_overlap_secs must not be negative");
        }
        if self.retry.download.max_attempts == 0 || self.retry.engine.max_attempts == 0 {
            anyhow::bail!("retry budgets need at least one attempt");
        }
        if self.jobs.max_concurrent_jobs == 0 {
            anyhow::bail!("jobs.max_concurrent_jobs must be at least 1");
        }

        registry::resolve(&self.engines.default)
            .with_context(|| format!("engines.default = {}", self.engines.default))?;
        if let Some(fallback) = &self.engines.fallback {
            registry::resolve(fallback).with_context(|| format!("engines.fallback = {}", fallback))?;
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Base path: {}", self.paths.base.display());
        println!("  Transcripts: {}", self.paths.transcript_dir().display());
        println!("  Database: {}", self.paths.database_path().display());
        println!("  Default engine: {}", self.engines.default);
        println!(
            "  Fallback engine: {}",
            self.engines.fallback.as_deref().unwrap_or("none")
        );
        println!(
            "  OpenAI API key: {}",
            if self.engines.openai_api_key.is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!(
            "  Workers: {}-{}",
            self.workers.min_workers, self.workers.max_workers
        );
        println!("  Concurrent jobs: {}", self.jobs.max_concurrent_jobs);
        println!("  Summary: {}", self.postprocess.summary);
    }
}
