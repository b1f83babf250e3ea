use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::{ScribeError, ScribeResult};

pub mod language;
pub mod subtitles;
pub mod summary;
pub mod translate;

pub use subtitles::SubtitleFormat;

/// Text-generation service used by the summary and translation steps
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Apply `instructions` to `text` and return the generated text
    async fn generate(&self, text: &str, instructions: &str) -> ScribeResult<String>;
}

/// OpenAI-compatible chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Summary and translation generators built from the configuration
    pub fn from_config(config: &Config) -> ScribeResult<(Self, Self)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.engines.request_timeout_secs))
            .user_agent(concat!("open-scribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScribeError::post_process("chat client", e.to_string()))?;

        let key = config.engines.openai_api_key.clone();
        let base = config.engines.openai_base_url.clone();
        let post = &config.postprocess;
        Ok((
            Self::new(client.clone(), key.clone(), base.clone(), post.summary_model.clone(), 1_000),
            Self::new(client, key, base, post.translation_model.clone(), 4_000),
        ))
    }

    /// Reasoning models only accept their default sampling settings
    fn fixed_sampling(&self) -> bool {
        let mut chars = self.model.chars();
        self.model.starts_with("gpt-5")
            || (chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit()))
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    async fn generate(&self, text: &str, instructions: &str) -> ScribeResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ScribeError::post_process(&self.model, "OPENAI_API_KEY is not set"))?;

        let fixed = self.fixed_sampling();
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: instructions,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: (!fixed).then_some(0.3),
            max_tokens: (!fixed).then_some(self.max_tokens),
        };

        tracing::debug!(model = %self.model, chars = text.len(), "Requesting chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScribeError::post_process(&self.model, format!("request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScribeError::post_process(
                &self.model,
                format!("status {}: {}", status, body.trim()),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScribeError::post_process(&self.model, format!("invalid response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ScribeError::post_process(&self.model, "empty completion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_post_process_error() {
        let chat = OpenAiChat::new(reqwest::Client::new(), None, "http://127.0.0.1:9", "gpt-4o-mini", 100);
        let err = chat.generate("text", "summarize").await.unwrap_err();
        assert!(matches!(err, ScribeError::PostProcessError { .. }));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "hello",
                },
            ],
            temperature: None,
            max_tokens: Some(10),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["max_tokens"], 10);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_reasoning_models_use_default_sampling() {
        let client = reqwest::Client::new();
        assert!(OpenAiChat::new(client.clone(), None, "x", "gpt-5-mini", 1).fixed_sampling());
        assert!(!OpenAiChat::new(client, None, "x", "gpt-4o-mini", 1).fixed_sampling());
    }
}
