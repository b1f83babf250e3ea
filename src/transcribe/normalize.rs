//! Provider response normalization into [`TranscriptSegment`]s

use serde::Deserialize;

use super::TranscriptSegment;

/// Collapse all runs of whitespace into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered concatenation of segment texts
pub fn join_segment_text(segments: &[TranscriptSegment]) -> String {
    collapse_whitespace(
        &segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Parse `HH:MM:SS,mmm` (or `.mmm`) into seconds
pub fn parse_srt_timestamp(value: &str) -> Option<f64> {
    let value = value.trim().replace(',', ".");
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse SRT cues into segments; malformed cues are skipped
pub fn parse_srt(content: &str) -> Vec<TranscriptSegment> {
    let normalized = content.replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());

        let mut timing = match lines.next() {
            Some(line) => line,
            None => continue,
        };
        // cue number is optional
        if !timing.contains("-->") {
            timing = match lines.next() {
                Some(line) => line,
                None => continue,
            };
        }

        let Some((start, end)) = timing.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_srt_timestamp(start), parse_srt_timestamp(end)) else {
            continue;
        };

        let text = collapse_whitespace(&lines.collect::<Vec<_>>().join(" "));
        if !text.is_empty() {
            segments.push(TranscriptSegment::new(start, end, text));
        }
    }

    segments
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs")]
    start_ms: Option<u64>,
    #[serde(rename = "dDurationMs")]
    duration_ms: Option<u64>,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a YouTube `json3` caption track
pub fn parse_json3(content: &str) -> serde_json::Result<Vec<TranscriptSegment>> {
    let track: Json3 = serde_json::from_str(content)?;

    let segments = track
        .events
        .into_iter()
        .filter_map(|event| {
            let start_ms = event.start_ms?;
            let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            let text = collapse_whitespace(&text);
            if text.is_empty() {
                return None;
            }
            let start = start_ms as f64 / 1000.0;
            let end = start + event.duration_ms.unwrap_or(0) as f64 / 1000.0;
            Some(TranscriptSegment::new(start, end, text))
        })
        .collect();

    Ok(dedupe_consecutive(segments))
}

/// Drop segments repeating the previous segment's text (rolling auto-captions)
pub fn dedupe_consecutive(segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    let mut out: Vec<TranscriptSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match out.last_mut() {
            Some(prev) if prev.text == segment.text => {
                prev.end_time = prev.end_time.max(segment.end_time);
            }
            _ => out.push(segment),
        }
    }
    out
}
