use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::normalize::parse_srt;
use super::registry::EngineDescriptor;
use super::{EngineInput, TranscribeOptions, TranscriptionEngine, TranscriptionResult};
use crate::config::WhisperCppConfig;
use crate::{ScribeError, ScribeResult};

/// Local whisper.cpp binary, run once per audio file with SRT output
pub struct WhisperCpp {
    descriptor: &'static EngineDescriptor,
    settings: WhisperCppConfig,
}

impl WhisperCpp {
    pub fn new(descriptor: &'static EngineDescriptor, settings: WhisperCppConfig) -> Self {
        Self {
            descriptor,
            settings,
        }
    }

    fn check_installation(&self) -> ScribeResult<()> {
        let name = self.descriptor.name;
        if !self.settings.executable.exists() {
            return Err(ScribeError::engine_unavailable(
                name,
                format!("executable not found: {}", self.settings.executable.display()),
            ));
        }
        if !self.settings.model.exists() {
            return Err(ScribeError::engine_unavailable(
                name,
                format!("model not found: {}", self.settings.model.display()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperCpp {
    fn descriptor(&self) -> &'static EngineDescriptor {
        self.descriptor
    }

    async fn transcribe(
        &self,
        input: EngineInput<'_>,
        options: &TranscribeOptions,
    ) -> ScribeResult<TranscriptionResult> {
        let name = self.descriptor.name;
        let EngineInput::Audio(audio) = input else {
            return Err(ScribeError::engine_fatal(name, "an audio file is required"));
        };
        self.check_installation()?;

        let out_dir = tempfile::tempdir()?;
        let prefix = out_dir.path().join("transcript");

        let mut command = Command::new(&self.settings.executable);
        command
            .arg("-m")
            .arg(&self.settings.model)
            .arg("-f")
            .arg(audio)
            .arg("-t")
            .arg(self.settings.threads.max(1).to_string())
            .arg("-osrt")
            .arg("-of")
            .arg(&prefix)
            .arg("-np")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match options.language.as_deref() {
            Some(language) => command.arg("-l").arg(language),
            None => command.arg("-l").arg("auto"),
        };

        tracing::debug!(engine = name, file = %audio.display(), "Running whisper.cpp");

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(output) => output.map_err(|e| {
                ScribeError::engine_unavailable(name, format!("failed to run whisper.cpp: {}", e))
            })?,
            Err(_) => {
                return Err(ScribeError::engine_transient(
                    name,
                    format!("timed out after {}s", timeout.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScribeError::engine_fatal(
                name,
                format!("whisper.cpp failed: {}", stderr.trim()),
            ));
        }

        let srt_path = prefix.with_extension("srt");
        let srt = tokio::fs::read_to_string(&srt_path).await.map_err(|e| {
            ScribeError::engine_fatal(name, format!("missing SRT output {}: {}", srt_path.display(), e))
        })?;

        let segments = parse_srt(&srt);
        let result = if segments.is_empty() {
            TranscriptionResult::text_only(name, String::from_utf8_lossy(&output.stdout).trim())
        } else {
            TranscriptionResult::from_segments(name, segments)
        };

        tracing::info!(engine = name, chars = result.text.len(), "Transcription completed");
        Ok(result.with_language(options.language.clone()))
    }
}
