use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AudioConfig;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::source::{MediaSource, ProgressCallback};
use crate::transcribe::EngineDescriptor;
use crate::{ScribeError, ScribeResult};

pub mod chunking;
pub mod ffmpeg;

pub use chunking::{plan_chunks, AudioChunk, ChunkFormat, ChunkSpan};
pub use ffmpeg::{AudioToolkit, Ffmpeg};

/// Produces audio artifacts an engine can consume
pub struct AudioPreparer {
    source: Arc<dyn MediaSource>,
    toolkit: Arc<dyn AudioToolkit>,
    settings: AudioConfig,
    download_retry: RetryPolicy,
}

impl AudioPreparer {
    pub fn new(
        source: Arc<dyn MediaSource>,
        toolkit: Arc<dyn AudioToolkit>,
        settings: AudioConfig,
        download_retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            toolkit,
            settings,
            download_retry,
        }
    }

    pub fn overlap_secs(&self) -> f64 {
        self.settings.chunk_overlap_secs
    }

    /// Download the audio track into `dir`, retrying transient failures
    pub async fn download(
        &self,
        url: &str,
        dir: &Path,
        progress: ProgressCallback<'_>,
    ) -> RetryOutcome<PathBuf> {
        self.download_retry
            .run("download", ScribeError::is_retryable, move |attempt| async move {
                if attempt > 1 {
                    tracing::info!(url, attempt, "Retrying audio download");
                }
                self.source.fetch_audio(url, dir, progress).await
            })
            .await
    }

    pub async fn probe_duration(&self, path: &Path) -> ScribeResult<f64> {
        self.toolkit.probe_duration(path).await
    }

    /// Re-encode down the bitrate ladder until the file fits under the ceiling.
    ///
    /// Each step encodes from the original, so the loop runs at most once per ladder rung.
    pub async fn enforce_size_limit(&self, audio: &Path, dir: &Path) -> ScribeResult<PathBuf> {
        let ceiling = self.settings.size_limit_bytes;
        let mut size = fs_err::metadata(audio)?.len();
        if size <= ceiling {
            return Ok(audio.to_path_buf());
        }

        tracing::info!(size, ceiling, "Audio exceeds upload ceiling, compressing");

        for &bitrate in &self.settings.bitrate_ladder_kbps {
            let output = dir.join(format!("compressed_{}k.mp3", bitrate));
            self.toolkit.reencode(audio, &output, bitrate).await?;
            size = fs_err::metadata(&output)?.len();

            tracing::debug!(bitrate, size, "Compressed audio");
            if size <= ceiling {
                return Ok(output);
            }
        }

        Err(ScribeError::AudioTooLarge { size, ceiling })
    }

    /// Whole-file audio in the shape `engine` accepts
    pub async fn prepare_for(
        &self,
        audio: &Path,
        engine: &EngineDescriptor,
        dir: &Path,
    ) -> ScribeResult<PathBuf> {
        match engine.chunk_format {
            ChunkFormat::Wav => {
                let output = dir.join("whole.wav");
                self.toolkit.convert(audio, &output, ChunkFormat::Wav).await?;
                Ok(output)
            }
            ChunkFormat::Mp3 { .. } if engine.upload_limited => {
                self.enforce_size_limit(audio, dir).await
            }
            ChunkFormat::Mp3 { .. } => Ok(audio.to_path_buf()),
        }
    }

    /// Cut `audio` into overlapping chunk files sized for `engine`
    pub async fn split(
        &self,
        audio: &Path,
        duration: f64,
        engine: &EngineDescriptor,
        dir: &Path,
    ) -> ScribeResult<Vec<AudioChunk>> {
        let spans = plan_chunks(
            duration,
            engine.chunk_seconds as f64,
            self.settings.chunk_overlap_secs,
        );
        let format = engine.chunk_format;

        let mut chunks = Vec::with_capacity(spans.len());
        for span in spans {
            let path = dir.join(format!("chunk_{:04}.{}", span.index, format.extension()));
            self.toolkit
                .extract(audio, &path, span.start, span.extract_duration(), format)
                .await?;
            chunks.push(AudioChunk { span, path });
        }

        tracing::info!(chunks = chunks.len(), duration, engine = engine.name, "Audio split into chunks");
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DownloadProgress, VideoMetadata};
    use crate::transcribe::registry::{descriptor, EngineKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Writes `bytes_per_kbps * bitrate` bytes for every re-encode
    struct SizedToolkit {
        bytes_per_kbps: u64,
        reencodes: AtomicU32,
        extracts: Mutex<Vec<(f64, f64)>>,
    }

    impl SizedToolkit {
        fn new(bytes_per_kbps: u64) -> Self {
            Self {
                bytes_per_kbps,
                reencodes: AtomicU32::new(0),
                extracts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AudioToolkit for SizedToolkit {
        async fn probe_duration(&self, _path: &Path) -> ScribeResult<f64> {
            Ok(3900.0)
        }

        async fn reencode(&self, _input: &Path, output: &Path, bitrate_kbps: u32) -> ScribeResult<()> {
            self.reencodes.fetch_add(1, Ordering::SeqCst);
            fs_err::write(output, vec![0u8; (self.bytes_per_kbps * bitrate_kbps as u64) as usize])?;
            Ok(())
        }

        async fn extract(
            &self,
            _input: &Path,
            output: &Path,
            start: f64,
            duration: f64,
            _format: ChunkFormat,
        ) -> ScribeResult<()> {
            self.extracts.lock().unwrap().push((start, duration));
            fs_err::write(output, b"chunk")?;
            Ok(())
        }

        async fn convert(&self, _input: &Path, output: &Path, _format: ChunkFormat) -> ScribeResult<()> {
            fs_err::write(output, b"wav")?;
            Ok(())
        }
    }

    struct FlakySource {
        failures: AtomicU32,
    }

    #[async_trait]
    impl MediaSource for FlakySource {
        async fn fetch_metadata(&self, _url: &str) -> ScribeResult<VideoMetadata> {
            Ok(VideoMetadata::default())
        }

        async fn fetch_audio(
            &self,
            _url: &str,
            dir: &Path,
            progress: ProgressCallback<'_>,
        ) -> ScribeResult<PathBuf> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ScribeError::DownloadError("connection reset".into()));
            }
            progress(DownloadProgress {
                percent: 100.0,
                ..DownloadProgress::default()
            });
            let path = dir.join("audio.mp3");
            fs_err::write(&path, b"audio")?;
            Ok(path)
        }

        async fn fetch_video(&self, _url: &str, _dir: &Path) -> ScribeResult<PathBuf> {
            Err(ScribeError::SourceUnavailable("no video".into()))
        }
    }

    fn settings(limit: u64) -> AudioConfig {
        AudioConfig {
            size_limit_bytes: limit,
            ..AudioConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            multiplier: 1.0,
            max_backoff_ms: 1,
        }
    }

    fn preparer(toolkit: Arc<SizedToolkit>, limit: u64, failures: u32) -> AudioPreparer {
        AudioPreparer::new(
            Arc::new(FlakySource {
                failures: AtomicU32::new(failures),
            }),
            toolkit,
            settings(limit),
            fast_retry(),
        )
    }

    #[tokio::test]
    async fn test_small_audio_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        fs_err::write(&audio, vec![0u8; 100]).unwrap();

        let toolkit = Arc::new(SizedToolkit::new(30));
        let prepared = preparer(toolkit.clone(), 1000, 0)
            .enforce_size_limit(&audio, dir.path())
            .await
            .unwrap();

        assert_eq!(prepared, audio);
        assert_eq!(toolkit.reencodes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compression_stops_at_first_fitting_bitrate() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        fs_err::write(&audio, vec![0u8; 5000]).unwrap();

        // 64k -> 1920 bytes, 48k -> 1440, 32k -> 960
        let toolkit = Arc::new(SizedToolkit::new(30));
        let prepared = preparer(toolkit.clone(), 1000, 0)
            .enforce_size_limit(&audio, dir.path())
            .await
            .unwrap();

        assert_eq!(prepared, dir.path().join("compressed_32k.mp3"));
        assert_eq!(toolkit.reencodes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_compression_gives_up_after_the_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        fs_err::write(&audio, vec![0u8; 5000]).unwrap();

        let toolkit = Arc::new(SizedToolkit::new(100));
        let err = preparer(toolkit.clone(), 1000, 0)
            .enforce_size_limit(&audio, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ScribeError::AudioTooLarge { size: 2400, ceiling: 1000 }));
        assert_eq!(toolkit.reencodes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_download_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = preparer(Arc::new(SizedToolkit::new(1)), 1000, 2)
            .download("https://youtu.be/abc", dir.path(), &|_: DownloadProgress| {})
            .await;

        assert_eq!(outcome.result.unwrap(), dir.path().join("audio.mp3"));
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn test_split_extracts_with_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        fs_err::write(&audio, b"audio").unwrap();

        let toolkit = Arc::new(SizedToolkit::new(1));
        let chunks = preparer(toolkit.clone(), 1000, 0)
            .split(&audio, 3900.0, descriptor(EngineKind::WhisperCpp), dir.path())
            .await
            .unwrap();

        assert_eq!(chunks.len(), 13);
        assert_eq!(chunks[0].path, dir.path().join("chunk_0000.wav"));
        assert!(chunks.iter().all(|c| c.path.exists()));

        let extracts = toolkit.extracts.lock().unwrap();
        assert_eq!(extracts[0], (0.0, 305.0));
        assert_eq!(extracts[12], (3600.0, 300.0));
    }

    #[tokio::test]
    async fn test_prepare_for_local_engine_converts_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        fs_err::write(&audio, b"audio").unwrap();

        let prepared = preparer(Arc::new(SizedToolkit::new(1)), 1000, 0)
            .prepare_for(&audio, descriptor(EngineKind::WhisperCpp), dir.path())
            .await
            .unwrap();
        assert_eq!(prepared, dir.path().join("whole.wav"));
    }
}
