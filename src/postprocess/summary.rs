use super::language::display_name;
use super::TextGenerator;
use crate::{ScribeError, ScribeResult};

/// Transcript characters sent for summarization
pub const SUMMARY_INPUT_CHARS: usize = 15_000;

const BANNER: &str = "================================================================================";

fn instructions(language: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant that creates concise, well-structured summaries of video transcripts.\n\
         Your summaries should:\n\
         1. Capture the main topics and key points\n\
         2. Be organized with clear sections if the content covers multiple topics\n\
         3. Include important details, facts, or insights mentioned\n\
         4. Be written in clear, professional language\n\
         5. Use bullet points for lists when appropriate\n\n\
         Structure the summary with a brief overview (1-2 sentences), the main topics covered, \
         key points and takeaways, and any important conclusions or recommendations.",
    );
    match language {
        Some(language) => prompt.push_str(&format!("\n\nWrite the summary in {}.", display_name(language))),
        None => prompt.push_str("\n\nWrite the summary in the same language as the transcript."),
    }
    prompt
}

/// Longest prefix of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Summarize the start of a transcript, in `language` or the transcript's own language
pub async fn summarize(
    generator: &dyn TextGenerator,
    transcript: &str,
    language: Option<&str>,
) -> ScribeResult<String> {
    let input = truncate_chars(transcript.trim(), SUMMARY_INPUT_CHARS);
    if input.is_empty() {
        return Err(ScribeError::post_process("summary", "transcript is empty"));
    }

    tracing::info!(chars = input.chars().count(), "Generating summary");
    generator
        .generate(input, &instructions(language))
        .await
        .map_err(|e| ScribeError::post_process("summary", e.to_string()))
}

/// Summary file contents with a title banner
pub fn format_summary(summary: &str, title: &str) -> String {
    format!(
        "{banner}\nVIDEO SUMMARY\n{banner}\n\nTitle: {title}\n\n{summary}\n\n{banner}\n",
        banner = BANNER,
        title = title,
        summary = summary.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::MockTextGenerator;
    use mockall::predicate::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("안녕하세요", 2), "안녕");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn test_summary_input_is_capped() {
        let transcript = "a".repeat(SUMMARY_INPUT_CHARS + 500);
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .withf(|text, instructions| {
                text.len() == SUMMARY_INPUT_CHARS && instructions.contains("in Korean")
            })
            .times(1)
            .returning(|_, _| Ok("- point".to_string()));

        let summary = summarize(&generator, &transcript, Some("ko")).await.unwrap();
        assert_eq!(summary, "- point");
    }

    #[tokio::test]
    async fn test_generator_failure_is_post_process_error() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .with(eq("hello"), always())
            .returning(|_, _| Err(ScribeError::post_process("gpt-4o-mini", "status 500")));

        let err = summarize(&generator, "hello", None).await.unwrap_err();
        assert!(matches!(err, ScribeError::PostProcessError { ref processor, .. } if processor == "summary"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_rejected() {
        let generator = MockTextGenerator::new();
        assert!(summarize(&generator, "   ", None).await.is_err());
    }

    #[test]
    fn test_format_summary() {
        let formatted = format_summary("Overview\n", "My Video");
        assert!(formatted.contains("Title: My Video"));
        assert!(formatted.contains("VIDEO SUMMARY"));
        assert!(formatted.ends_with(&format!("{}\n", BANNER)));
    }
}
