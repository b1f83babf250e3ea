use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::ChunkFormat;
use crate::{ScribeError, ScribeResult};

/// Local audio operations needed by preparation
#[async_trait]
pub trait AudioToolkit: Send + Sync {
    /// Duration in seconds
    async fn probe_duration(&self, path: &Path) -> ScribeResult<f64>;

    /// Re-encode to mono MP3 at `bitrate_kbps`
    async fn reencode(&self, input: &Path, output: &Path, bitrate_kbps: u32) -> ScribeResult<()>;

    /// Cut `[start, start + duration)` into `output`
    async fn extract(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        format: ChunkFormat,
    ) -> ScribeResult<()>;

    /// Whole-file conversion into `format`
    async fn convert(&self, input: &Path, output: &Path, format: ChunkFormat) -> ScribeResult<()>;
}

/// ffmpeg/ffprobe command-line implementation
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
    sample_rate: u32,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            sample_rate,
        }
    }

    fn codec_args(&self, format: ChunkFormat) -> Vec<String> {
        let mut args = vec![
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
        ];
        match format {
            ChunkFormat::Wav => args.extend(["-acodec", "pcm_s16le"].map(String::from)),
            ChunkFormat::Mp3 { bitrate_kbps } => {
                args.extend(["-acodec".to_string(), "libmp3lame".to_string()]);
                args.extend(["-b:a".to_string(), format!("{}k", bitrate_kbps)]);
            }
        }
        args
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> ScribeResult<()> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ScribeError::Io(std::io::Error::other(format!(
                "ffmpeg failed: {}",
                error.trim()
            ))));
        }

        Ok(())
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe", 16_000)
    }
}

#[async_trait]
impl AudioToolkit for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> ScribeResult<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ScribeError::Io(std::io::Error::other(format!(
                "Failed to analyze {} with ffprobe: {}",
                path.display(),
                error.trim()
            ))));
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ScribeError::Io(std::io::Error::other(e)))?;

        info["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| {
                ScribeError::Io(std::io::Error::other(format!(
                    "ffprobe reported no duration for {}",
                    path.display()
                )))
            })
    }

    async fn reencode(&self, input: &Path, output: &Path, bitrate_kbps: u32) -> ScribeResult<()> {
        tracing::debug!(input = %input.display(), bitrate_kbps, "Re-encoding audio");

        let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];
        args.extend(self.codec_args(ChunkFormat::Mp3 { bitrate_kbps }));
        args.push(output.to_string_lossy().into_owned());
        self.run_ffmpeg(args).await
    }

    async fn extract(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        format: ChunkFormat,
    ) -> ScribeResult<()> {
        let mut args = vec![
            "-ss".to_string(),
            format!("{:.3}", start),
            "-t".to_string(),
            format!("{:.3}", duration),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];
        args.extend(self.codec_args(format));
        args.push(output.to_string_lossy().into_owned());
        self.run_ffmpeg(args).await
    }

    async fn convert(&self, input: &Path, output: &Path, format: ChunkFormat) -> ScribeResult<()> {
        tracing::debug!(input = %input.display(), format = format.extension(), "Converting audio");

        let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];
        args.extend(self.codec_args(format));
        args.push(output.to_string_lossy().into_owned());
        self.run_ffmpeg(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_args() {
        let ffmpeg = Ffmpeg::default();
        let wav = ffmpeg.codec_args(ChunkFormat::Wav);
        assert!(wav.windows(2).any(|w| w[0] == "-acodec" && w[1] == "pcm_s16le"));
        assert!(wav.windows(2).any(|w| w[0] == "-ar" && w[1] == "16000"));

        let mp3 = ffmpeg.codec_args(ChunkFormat::Mp3 { bitrate_kbps: 48 });
        assert!(mp3.windows(2).any(|w| w[0] == "-b:a" && w[1] == "48k"));
        assert!(mp3.windows(2).any(|w| w[0] == "-ac" && w[1] == "1"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let ffmpeg = Ffmpeg::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe", 16_000);
        let err = ffmpeg.probe_duration(Path::new("/tmp/x.mp3")).await.unwrap_err();
        assert!(matches!(err, ScribeError::Io(_)));
    }
}
