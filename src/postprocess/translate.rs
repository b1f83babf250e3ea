use std::collections::HashMap;

use super::language::display_name;
use super::TextGenerator;
use crate::transcribe::TranscriptSegment;
use crate::{ScribeError, ScribeResult};

/// Segments sent per translation request
pub const SEGMENT_BATCH: usize = 50;

fn plain_instructions(source: Option<&str>, target: &str) -> String {
    let from = source
        .map(|s| format!(" from {}", display_name(s)))
        .unwrap_or_default();
    format!(
        "You are a professional translator. Translate the following transcript{} to {}.\n\
         Keep the meaning, tone and paragraph structure. Return only the translation.",
        from,
        display_name(target)
    )
}

fn numbered_instructions(source: Option<&str>, target: &str) -> String {
    let from = source
        .map(|s| format!(" from {}", display_name(s)))
        .unwrap_or_default();
    format!(
        "You are a professional subtitle translator. Translate the following subtitles{} to {}.\n\
         Maintain natural speech patterns and keep translations concise and readable.\n\
         Preserve any speaker names or sound descriptions in brackets.\n\
         Return ONLY the translations in the same numbered format, one per line, no explanations.",
        from,
        display_name(target)
    )
}

/// Render texts as `1. text` lines
pub fn number_lines(texts: &[&str]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `N. text` lines back into a map from 1-based number to text
pub fn parse_numbered(reply: &str) -> HashMap<usize, String> {
    reply
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let dot = line.find('.')?;
            let number: usize = line[..dot].trim().parse().ok()?;
            let text = line[dot + 1..].trim();
            (!text.is_empty()).then(|| (number, text.to_string()))
        })
        .collect()
}

/// Translate free text in one request
pub async fn translate_text(
    generator: &dyn TextGenerator,
    text: &str,
    source: Option<&str>,
    target: &str,
) -> ScribeResult<String> {
    tracing::info!(source, target, chars = text.len(), "Translating transcript");
    generator
        .generate(text, &plain_instructions(source, target))
        .await
        .map_err(|e| ScribeError::post_process("translation", e.to_string()))
}

/// Translate segment texts in numbered batches, keeping every timestamp.
///
/// A segment the reply skips keeps its original text; a batch with no usable lines fails.
pub async fn translate_segments(
    generator: &dyn TextGenerator,
    segments: &[TranscriptSegment],
    source: Option<&str>,
    target: &str,
) -> ScribeResult<Vec<TranscriptSegment>> {
    let instructions = numbered_instructions(source, target);
    let mut translated = Vec::with_capacity(segments.len());

    for (batch_index, batch) in segments.chunks(SEGMENT_BATCH).enumerate() {
        let texts: Vec<&str> = batch.iter().map(|s| s.text.as_str()).collect();
        tracing::debug!(batch = batch_index, segments = batch.len(), "Translating segment batch");

        let reply = generator
            .generate(&number_lines(&texts), &instructions)
            .await
            .map_err(|e| ScribeError::post_process("translation", e.to_string()))?;
        let mut lines = parse_numbered(&reply);
        if lines.is_empty() {
            return Err(ScribeError::post_process(
                "translation",
                format!("batch {} returned no numbered lines", batch_index + 1),
            ));
        }

        let missing = (1..=batch.len()).filter(|n| !lines.contains_key(n)).count();
        if missing > 0 {
            tracing::warn!(batch = batch_index, missing, "Translation skipped segments, keeping originals");
        }

        translated.extend(batch.iter().enumerate().map(|(i, segment)| TranscriptSegment {
            text: lines.remove(&(i + 1)).unwrap_or_else(|| segment.text.clone()),
            ..segment.clone()
        }));
    }

    Ok(translated)
}
