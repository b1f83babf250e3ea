//! Reassembly of chunk transcripts into one result.
//!
//! Adjacent chunks share an overlap window. When both neighbours carry native segments the
//! overlap is first removed by time; in every case the repeated words left at the seam are
//! then removed from the head of the later chunk.

use crate::audio::ChunkSpan;
use crate::transcribe::normalize::{collapse_whitespace, join_segment_text};
use crate::transcribe::{TranscriptSegment, TranscriptionResult};

/// Longest seam, in words, searched for duplicated text
pub const DEDUPE_WINDOW_WORDS: usize = 30;

/// Shorter repeats are treated as coincidence
const MIN_DEDUPE_WORDS: usize = 2;

/// A successfully transcribed chunk
#[derive(Debug, Clone)]
pub struct ChunkTranscript {
    pub span: ChunkSpan,
    pub result: TranscriptionResult,
}

struct Piece {
    index: usize,
    start: f64,
    end: f64,
    text: String,
    segments: Vec<TranscriptSegment>,
    native: bool,
}

fn comparable(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Number of words that end `previous` and start `next`
pub fn seam_overlap(previous: &str, next: &str, window: usize) -> usize {
    let prev: Vec<String> = previous.split_whitespace().map(comparable).collect();
    let next: Vec<String> = next.split_whitespace().map(comparable).collect();
    let limit = window.min(prev.len()).min(next.len());

    (MIN_DEDUPE_WORDS..=limit)
        .rev()
        .find(|&k| prev[prev.len() - k..] == next[..k] && next[..k].iter().any(|w| !w.is_empty()))
        .unwrap_or(0)
}

fn drop_leading_words(text: &str, count: usize) -> String {
    text.split_whitespace().skip(count).collect::<Vec<_>>().join(" ")
}

fn drop_leading_segment_words(segments: Vec<TranscriptSegment>, mut count: usize) -> Vec<TranscriptSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            if count == 0 {
                return Some(segment);
            }
            let words = segment.text.split_whitespace().count();
            if words <= count {
                count -= words;
                return None;
            }
            segment.text = drop_leading_words(&segment.text, count);
            count = 0;
            Some(segment)
        })
        .collect()
}

fn into_piece(part: ChunkTranscript) -> Piece {
    let ChunkTranscript { span, result } = part;
    let native = result.has_segments();
    let text = collapse_whitespace(&result.text);
    let segments = match result.segments {
        Some(segments) if native => segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start_time: s.start_time + span.start,
                end_time: s.end_time + span.start,
                ..s
            })
            .collect(),
        _ if text.is_empty() => Vec::new(),
        _ => vec![TranscriptSegment::new(span.start, span.end(), text.clone())],
    };

    Piece {
        index: span.index,
        start: span.start,
        end: span.end(),
        text,
        segments,
        native,
    }
}

fn trim_by_time(piece: &mut Piece, cutoff: f64) {
    piece.segments.retain(|s| s.start_time < cutoff);
    for segment in &mut piece.segments {
        segment.end_time = segment.end_time.min(cutoff);
    }
    piece.text = join_segment_text(&piece.segments);
}

/// Merge chunk transcripts ordered by chunk index.
///
/// Missing indices are gaps; only directly adjacent chunks are deduplicated.
pub fn merge_chunks(engine: &str, mut parts: Vec<ChunkTranscript>, timestamps: bool) -> TranscriptionResult {
    parts.sort_by_key(|p| p.span.index);
    let language = parts.iter().find_map(|p| p.result.language.clone());
    let duration = parts.last().map(|p| p.span.end());

    let mut pieces: Vec<Piece> = parts.into_iter().map(into_piece).collect();

    for i in 1..pieces.len() {
        let (before, after) = pieces.split_at_mut(i);
        let prev = &mut before[i - 1];
        let next = &mut after[0];
        if prev.index + 1 != next.index {
            continue;
        }

        if prev.native && next.native {
            trim_by_time(prev, next.start);
        }

        // a segment straddling the cutoff still carries words the next chunk repeats
        let repeated = seam_overlap(&prev.text, &next.text, DEDUPE_WINDOW_WORDS);
        if repeated > 0 {
            tracing::debug!(chunk = next.index, words = repeated, "Removed duplicated seam words");
            next.text = drop_leading_words(&next.text, repeated);
            next.segments = drop_leading_segment_words(std::mem::take(&mut next.segments), repeated);
            if !next.native && !next.text.is_empty() {
                next.segments = vec![TranscriptSegment::new(next.start, next.end, next.text.clone())];
            }
        }
    }

    let mut result = if timestamps {
        let segments: Vec<TranscriptSegment> = pieces.into_iter().flat_map(|p| p.segments).collect();
        TranscriptionResult::from_segments(engine, segments)
    } else {
        let text = pieces
            .iter()
            .map(|p| p.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        TranscriptionResult::text_only(engine, text)
    };

    result.duration = duration;
    result.with_language(language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::plan_chunks;

    fn text_part(span: ChunkSpan, text: &str) -> ChunkTranscript {
        ChunkTranscript {
            span,
            result: TranscriptionResult::text_only("whisper-api", text),
        }
    }

    #[test]
    fn test_seam_overlap() {
        assert_eq!(seam_overlap("and then we went home", "we went home after dinner", 30), 3);
        assert_eq!(seam_overlap("Hello, World.", "world hello", 30), 0);
        assert_eq!(seam_overlap("the cat", "the dog", 30), 0);
        assert_eq!(seam_overlap("a b c d", "c d e", 1), 0);
    }

    #[test]
    fn test_text_merge_dedupes_seams() {
        let spans = plan_chunks(900.0, 300.0, 5.0);
        let parts = vec![
            text_part(spans[2], "the end of the talk"),
            text_part(spans[0], "welcome to the show today we"),
            text_part(spans[1], "today we discuss rust and the end"),
        ];

        let merged = merge_chunks("whisper-api", parts, false);
        assert_eq!(
            merged.text,
            "welcome to the show today we discuss rust and the end of the talk"
        );
        assert!(merged.segments.is_none());
        assert_eq!(merged.duration, Some(900.0));
    }

    #[test]
    fn test_gap_breaks_adjacency() {
        let spans = plan_chunks(900.0, 300.0, 5.0);
        let parts = vec![text_part(spans[0], "one two three"), text_part(spans[2], "two three four")];
        let merged = merge_chunks("whisper-api", parts, false);
        assert_eq!(merged.text, "one two three two three four");
    }

    #[test]
    fn test_native_segments_trim_by_time_and_offset() {
        let spans = plan_chunks(600.0, 300.0, 5.0);
        let first = TranscriptionResult::from_segments(
            "whisper-cpp",
            vec![
                TranscriptSegment::new(0.0, 150.0, "first half"),
                TranscriptSegment::new(150.0, 299.0, "second half"),
                TranscriptSegment::new(300.5, 304.0, "overlap"),
            ],
        );
        let second = TranscriptionResult::from_segments(
            "whisper-cpp",
            vec![
                TranscriptSegment::new(0.0, 4.0, "overlap"),
                TranscriptSegment::new(4.0, 300.0, "rest"),
            ],
        );
        let parts = vec![
            ChunkTranscript { span: spans[1], result: second },
            ChunkTranscript { span: spans[0], result: first },
        ];

        let merged = merge_chunks("whisper-cpp", parts, true);
        let segments = merged.segments.as_ref().unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[2].start_time, 300.0);
        assert_eq!(segments[3].end_time, 600.0);
        assert_eq!(merged.text, "first half second half overlap rest");
        for pair in segments.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }

    #[test]
    fn test_segment_straddling_the_cutoff_is_not_repeated() {
        let spans = plan_chunks(600.0, 300.0, 5.0);
        let first = TranscriptionResult::from_segments(
            "whisper-cpp",
            vec![
                TranscriptSegment::new(0.0, 290.0, "intro"),
                TranscriptSegment::new(290.0, 306.0, "we talk about rust today"),
            ],
        );
        let second = TranscriptionResult::from_segments(
            "whisper-cpp",
            vec![
                TranscriptSegment::new(0.0, 6.0, "about rust today"),
                TranscriptSegment::new(6.0, 20.0, "and more"),
            ],
        );
        let parts = vec![
            ChunkTranscript { span: spans[0], result: first },
            ChunkTranscript { span: spans[1], result: second },
        ];

        let merged = merge_chunks("whisper-cpp", parts, true);
        assert_eq!(merged.text, "intro we talk about rust today and more");
        let segments = merged.segments.unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].end_time, 300.0);
        assert_eq!(segments[2].start_time, 306.0);
    }

    #[test]
    fn test_timestamps_synthesized_for_text_only_engines() {
        let spans = plan_chunks(700.0, 600.0, 5.0);
        let parts = vec![
            text_part(spans[0], "alpha beta gamma"),
            text_part(spans[1], "beta gamma delta"),
        ];
        let merged = merge_chunks("gpt-4o-transcribe", parts, true);
        let segments = merged.segments.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].start_time, 600.0);
        assert_eq!(segments[1].text, "delta");
        assert_eq!(merged.text, "alpha beta gamma delta");
    }
}
