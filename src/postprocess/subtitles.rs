use std::fmt::Write as _;
use std::str::FromStr;

use crate::transcribe::TranscriptSegment;

/// Line width commonly used for broadcast subtitles
pub const DEFAULT_LINE_WIDTH: usize = 42;

/// Cues shorter than this are stretched so players keep them on screen
const MIN_CUE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Ok(SubtitleFormat::Vtt),
            other => Err(format!("unknown subtitle format: {}", other)),
        }
    }
}

/// `HH:MM:SS,mmm` for SRT, `HH:MM:SS.mmm` for WebVTT
pub fn format_cue_time(seconds: f64, format: SubtitleFormat) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    let separator = match format {
        SubtitleFormat::Srt => ',',
        SubtitleFormat::Vtt => '.',
    };
    format!("{:02}:{:02}:{:02}{}{:03}", hours, minutes, secs, separator, millis)
}

/// Greedy word wrap; words longer than `width` (unspaced scripts) are split by character
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            let piece: String = piece.iter().collect();
            let piece_len = piece.chars().count();

            if current_len > 0 && current_len + 1 + piece_len > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Render segments as an SRT or WebVTT document
pub fn render(segments: &[TranscriptSegment], format: SubtitleFormat, line_width: usize) -> String {
    let mut out = String::new();
    if format == SubtitleFormat::Vtt {
        out.push_str("WEBVTT\n\n");
    }

    let cues = segments.iter().filter(|s| !s.text.trim().is_empty());
    for (index, segment) in cues.enumerate() {
        let start = segment.start_time.max(0.0);
        let end = if segment.end_time - start < MIN_CUE_SECS {
            start + MIN_CUE_SECS
        } else {
            segment.end_time
        };

        if format == SubtitleFormat::Srt {
            let _ = writeln!(out, "{}", index + 1);
        }
        let _ = writeln!(
            out,
            "{} --> {}",
            format_cue_time(start, format),
            format_cue_time(end, format)
        );
        for line in wrap_text(&segment.text, line_width) {
            let _ = writeln!(out, "{}", line);
        }
        out.push('\n');
    }

    out
}
