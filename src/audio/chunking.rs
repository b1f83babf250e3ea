use std::path::PathBuf;

/// Remainders shorter than this are folded into the previous chunk
const MIN_TAIL_SECS: f64 = 1.0;

/// Encoding used for chunk files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    /// 16-bit PCM WAV, what local whisper.cpp expects
    Wav,
    Mp3 { bitrate_kbps: u32 },
}

impl ChunkFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ChunkFormat::Wav => "wav",
            ChunkFormat::Mp3 { .. } => "mp3",
        }
    }
}

/// A time range of the source audio, before extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    /// Position in reassembly order
    pub index: usize,
    /// Absolute start offset in seconds
    pub start: f64,
    /// Nominal duration in seconds, excluding overlap
    pub duration: f64,
    /// Extra seconds extracted past the nominal end, shared with the next chunk
    pub overlap: f64,
}

impl ChunkSpan {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Length actually cut from the source
    pub fn extract_duration(&self) -> f64 {
        self.duration + self.overlap
    }
}

/// An extracted chunk file ready for a worker
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub span: ChunkSpan,
    pub path: PathBuf,
}

impl AudioChunk {
    pub fn index(&self) -> usize {
        self.span.index
    }
}

/// Split `total` seconds into consecutive spans of `chunk_len` seconds.
///
/// Spans cover `[0, total)` without gaps; chunk `i` starts at `i * chunk_len`.
/// Every span but the last carries up to `overlap` seconds of lookahead.
pub fn plan_chunks(total: f64, chunk_len: f64, overlap: f64) -> Vec<ChunkSpan> {
    if !(total > 0.0) || !(chunk_len > 0.0) {
        return Vec::new();
    }

    // tolerate float noise so exact multiples do not produce an empty tail
    let mut count = ((total / chunk_len) - 1e-9).ceil().max(1.0) as usize;
    if count > 1 && total - (count - 1) as f64 * chunk_len < MIN_TAIL_SECS {
        count -= 1;
    }

    (0..count)
        .map(|index| {
            let start = index as f64 * chunk_len;
            let last = index + 1 == count;
            let duration = if last { total - start } else { chunk_len };
            let overlap = if last {
                0.0
            } else {
                overlap.max(0.0).min(total - (start + duration))
            };
            ChunkSpan {
                index,
                start,
                duration,
                overlap,
            }
        })
        .collect()
}
