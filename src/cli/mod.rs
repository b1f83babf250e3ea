use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::ledger::{JobQuery, JobStatus};
use crate::pipeline::SubmitOptions;
use crate::postprocess::SubtitleFormat;

#[derive(Parser)]
#[command(
    name = "open-scribe",
    about = "Open-Scribe - turn YouTube videos into transcripts, summaries, subtitles and translations",
    version,
    long_about = "Transcribes YouTube videos and playlists with pluggable engines (OpenAI cloud models, a local whisper.cpp binary or YouTube captions). Every job is tracked in a local SQLite ledger so repeated submissions are detected and results can be searched later."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: ./config.yaml, then the user config directory)
    #[arg(long, global = true, env = "OPEN_SCRIBE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe a YouTube video or playlist
    Transcribe(TranscribeArgs),

    /// List and search recorded jobs
    Jobs(JobsArgs),

    /// Show every detail of one job
    Show {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Job counts by status and engine
    Stats,

    /// Cancel a pending or running job
    Cancel {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Delete finished jobs older than the given age
    Prune {
        /// Age in days
        #[arg(long, value_name = "DAYS")]
        days: u32,
    },

    /// List transcription engines and their aliases
    Engines,

    /// Show the configuration file location and contents
    Config {
        /// Only show a short summary
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// YouTube video or playlist URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// Engine name or alias (high, medium, whisper-cloud, whisper-local, youtube)
    #[arg(short, long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Include [MM:SS] timestamps in the transcript
    #[arg(short, long)]
    pub timestamps: bool,

    /// Generate a summary
    #[arg(long, conflicts_with = "no_summary")]
    pub summary: bool,

    /// Skip the summary even if enabled in the configuration
    #[arg(long)]
    pub no_summary: bool,

    /// Translate the transcript
    #[arg(long, conflicts_with = "no_translate")]
    pub translate: bool,

    /// Never translate
    #[arg(long)]
    pub no_translate: bool,

    /// Translation target language (default from configuration)
    #[arg(long, value_name = "LANG")]
    pub to: Option<String>,

    /// Write an SRT subtitle file
    #[arg(long, conflicts_with = "vtt")]
    pub srt: bool,

    /// Write a WebVTT subtitle file
    #[arg(long)]
    pub vtt: bool,

    /// Keep the downloaded audio
    #[arg(long)]
    pub audio: bool,

    /// Also download the video
    #[arg(long)]
    pub video: bool,

    /// Copy the results into the downloads folder
    #[arg(long)]
    pub downloads: bool,

    /// Run even if the same URL and engine were already transcribed
    #[arg(short, long)]
    pub force: bool,

    /// Spoken language hint (auto-detect if not specified)
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// Do not ask before transcribing a whole playlist
    #[arg(short, long)]
    pub yes: bool,

    /// Fixed number of parallel chunk workers
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..=64))]
    pub parallel: Option<u16>,
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl TranscribeArgs {
    pub fn submit_options(&self) -> SubmitOptions {
        let subtitles = if self.srt {
            Some(SubtitleFormat::Srt)
        } else if self.vtt {
            Some(SubtitleFormat::Vtt)
        } else {
            None
        };

        SubmitOptions {
            engine: self.engine.clone(),
            timestamps: self.timestamps,
            summary: flag_pair(self.summary, self.no_summary),
            translate: flag_pair(self.translate, self.no_translate),
            translate_to: self.to.clone(),
            subtitles,
            keep_audio: self.audio,
            download_video: self.video,
            copy_to_downloads: self.downloads,
            force: self.force,
            language: self.language.clone(),
            assume_yes: self.yes,
            parallel_workers: self.parallel.map(usize::from),
        }
    }
}

#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Match against title or URL
    #[arg(short, long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Only jobs with this status
    #[arg(long, value_name = "STATUS")]
    pub status: Option<JobStatus>,

    /// Only jobs run with this engine
    #[arg(short, long, value_name = "ENGINE")]
    pub engine: Option<String>,

    #[arg(long, default_value = "1")]
    pub page: u32,

    #[arg(long, default_value = "20")]
    pub per_page: u32,

    /// Print the page as JSON
    #[arg(long)]
    pub json: bool,
}

impl JobsArgs {
    pub fn query(&self) -> JobQuery {
        JobQuery {
            text: self.search.clone(),
            status: self.status,
            engine: self.engine.clone(),
            page: self.page,
            per_page: self.per_page,
        }
    }
}
