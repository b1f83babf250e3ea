use futures_util::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioChunk;
use crate::retry::RetryPolicy;
use crate::transcribe::{EngineInput, TranscribeOptions, TranscriptionEngine, TranscriptionResult};
use crate::{ScribeError, ScribeResult};

pub mod merge;
pub mod sizing;

pub use merge::{merge_chunks, ChunkTranscript};
pub use sizing::WorkerSizing;

/// Progress of a parallel transcription
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub eta: Option<Duration>,
}

impl ChunkProgress {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.finished() as f64 * 100.0 / self.total as f64
    }
}

pub type ChunkProgressCallback<'a> = &'a (dyn Fn(ChunkProgress) + Send + Sync);

/// Merged transcript of a dispatched chunk set
#[derive(Debug)]
pub struct DispatchOutcome {
    pub transcript: TranscriptionResult,
    /// Chunk indices that produced no text
    pub gaps: Vec<usize>,
    /// Retries spent across every chunk
    pub retries: u32,
}

struct ChunkAttempt {
    chunk: AudioChunk,
    result: ScribeResult<TranscriptionResult>,
    retries: u32,
}

/// Runs chunk transcriptions on a bounded number of concurrent workers
pub struct ParallelDispatcher {
    workers: usize,
    retry: RetryPolicy,
}

impl ParallelDispatcher {
    pub fn new(workers: usize, retry: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            retry,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    async fn transcribe_chunk(
        &self,
        engine: &dyn TranscriptionEngine,
        chunk: &AudioChunk,
        options: &TranscribeOptions,
        cancel: &CancellationToken,
    ) -> ChunkAttempt {
        if cancel.is_cancelled() {
            return ChunkAttempt {
                chunk: chunk.clone(),
                result: Err(ScribeError::Cancelled),
                retries: 0,
            };
        }

        tracing::debug!(chunk = chunk.index(), start = chunk.span.start, "Chunk started");
        let outcome = self
            .retry
            .run("chunk", ScribeError::is_retryable, move |_| {
                engine.transcribe(EngineInput::Audio(&chunk.path), options)
            })
            .await;

        match &outcome.result {
            Ok(_) => tracing::debug!(chunk = chunk.index(), retries = outcome.retries, "Chunk finished"),
            Err(e) => tracing::warn!(chunk = chunk.index(), error = %e, "Chunk failed, leaving a gap"),
        }

        ChunkAttempt {
            chunk: chunk.clone(),
            result: outcome.result,
            retries: outcome.retries,
        }
    }

    /// Transcribe every chunk and merge the results in chunk order.
    ///
    /// A failed chunk becomes a gap; the call fails only when no chunk succeeds.
    /// Chunks not yet started when `cancel` fires are skipped.
    pub async fn run(
        &self,
        engine: &dyn TranscriptionEngine,
        chunks: &[AudioChunk],
        options: &TranscribeOptions,
        progress: ChunkProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> ScribeResult<DispatchOutcome> {
        let total = chunks.len();
        tracing::info!(chunks = total, workers = self.workers, engine = engine.name(), "Parallel transcription started");

        let started = Instant::now();
        let mut state = ChunkProgress {
            completed: 0,
            failed: 0,
            total,
            eta: None,
        };
        progress(state);

        let attempts: Vec<ChunkAttempt> = stream::iter(chunks)
            .map(|chunk| self.transcribe_chunk(engine, chunk, options, cancel))
            .buffer_unordered(self.workers)
            .inspect(|attempt| {
                if attempt.result.is_ok() {
                    state.completed += 1;
                } else {
                    state.failed += 1;
                }
                let done = state.finished();
                let remaining = total - done;
                state.eta = (done > 0).then(|| started.elapsed().mul_f64(remaining as f64 / done as f64));
                progress(state);
            })
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(ScribeError::Cancelled);
        }

        let retries = attempts.iter().map(|a| a.retries).sum();
        let mut successes = Vec::with_capacity(total);
        let mut gaps = Vec::new();
        let mut last_error = None;

        let mut attempts = attempts;
        attempts.sort_by_key(|a| a.chunk.index());
        for attempt in attempts {
            match attempt.result {
                Ok(result) => successes.push(ChunkTranscript {
                    span: attempt.chunk.span,
                    result,
                }),
                Err(e) => {
                    gaps.push(attempt.chunk.index());
                    last_error = Some(e);
                }
            }
        }

        if successes.is_empty() {
            let source = last_error.unwrap_or_else(|| ScribeError::engine_fatal(engine.name(), "no chunks to transcribe"));
            return Err(ScribeError::AllChunksFailed {
                chunks: total,
                source: Box::new(source),
            });
        }

        let transcript = merge_chunks(engine.name(), successes, options.timestamps);
        tracing::info!(
            chunks = total,
            gaps = gaps.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Parallel transcription finished"
        );

        Ok(DispatchOutcome {
            transcript,
            gaps,
            retries,
        })
    }
}
