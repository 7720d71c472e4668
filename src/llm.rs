//! Language model providers for answer synthesis.
//!
//! - **`disabled`**: [`DisabledModel`], every call fails, so answers degrade
//!   to the flagged general-knowledge fallback.
//! - **`openai`**: [`OpenAiCompatibleModel`], any endpoint speaking the
//!   OpenAI `chat/completions` protocol (OpenAI, DeepSeek, vLLM, ...).
//!
//! Transient failures (429, 5xx, network) are retried with the same
//! exponential backoff as the embedding providers. The synthesizer's own
//! timeout bounds the whole sequence.
//!
//! Streaming requests set `"stream": true` and read the server-sent event
//! body: each `data:` line carries a `choices[0].delta.content` piece, and
//! `data: [DONE]` ends it. Retries only cover getting the stream started.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use jedai_core::answer::{CompletionStream, LanguageModel};
use jedai_core::error::{CoreError, Result};
use jedai_core::prompt::Prompt;

use crate::config::LlmConfig;

pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiCompatibleModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        Err(CoreError::ModelInvocation(
            "no language model configured (llm.provider = \"disabled\")".into(),
        ))
    }
}

pub struct OpenAiCompatibleModel {
    model: String,
    endpoint: String,
    api_key: String,
    temperature: f64,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            model,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, prompt: &Prompt, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    /// POST `body`, retrying transient failures. Returns the first
    /// successful response with its body unread.
    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(model = %self.model, attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("API error {}: {}", status, body_text));
                        continue;
                    }
                    return Err(CoreError::ModelInvocation(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(CoreError::ModelInvocation(format!(
            "failed after {} attempts: {}",
            self.max_retries + 1,
            last_err.unwrap_or_default()
        )))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chat_response(json: serde_json::Value) -> Result<String> {
    let response: ChatResponse = serde_json::from_value(json)
        .map_err(|e| CoreError::ModelInvocation(format!("malformed response: {}", e)))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CoreError::ModelInvocation("response has no message content".into()))
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One SSE `data:` payload to a text piece. `None` for the `[DONE]` marker
/// and for chunks without content (role headers, finish reasons).
fn parse_stream_event(data: &str) -> Option<Result<String>> {
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Some(Err(CoreError::ModelInvocation(format!(
                    "stream error: {}",
                    error
                ))));
            }
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|content| !content.is_empty())
                .map(Ok)
        }
        Err(e) => Some(Err(CoreError::ModelInvocation(format!(
            "malformed stream chunk: {}",
            e
        )))),
    }
}

fn sse_to_stream(response: reqwest::Response) -> CompletionStream {
    let events = response.bytes_stream().eventsource();
    Box::pin(events.filter_map(|event| match event {
        Ok(event) => parse_stream_event(&event.data),
        Err(e) => Some(Err(CoreError::ModelInvocation(format!(
            "stream interrupted: {}",
            e
        )))),
    }))
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let response = self.send(&self.request_body(prompt, false)).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::ModelInvocation(format!("unreadable response: {}", e)))?;
        parse_chat_response(json)
    }

    async fn complete_stream(&self, prompt: &Prompt) -> Result<CompletionStream> {
        let response = self.send(&self.request_body(prompt, true)).await?;
        Ok(sse_to_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_model_always_fails() {
        let prompt = Prompt {
            system: String::new(),
            user: "q".into(),
            excerpts: 0,
        };
        let err = DisabledModel.complete(&prompt).await.unwrap_err();
        assert!(matches!(err, CoreError::ModelInvocation(_)));
    }

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Recursion [1]." } }]
        });
        assert_eq!(parse_chat_response(json).unwrap(), "Recursion [1].");
    }

    #[test]
    fn empty_choices_is_a_model_error() {
        let err = parse_chat_response(serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, CoreError::ModelInvocation(_)));
        let err = parse_chat_response(serde_json::json!({ "error": "quota" })).unwrap_err();
        assert!(matches!(err, CoreError::ModelInvocation(_)));
    }

    #[test]
    fn request_body_carries_both_messages() {
        let model = OpenAiCompatibleModel {
            model: "deepseek-v3.2-exp".into(),
            endpoint: "http://localhost/chat/completions".into(),
            api_key: "k".into(),
            temperature: 0.3,
            max_tokens: Some(512),
            max_retries: 0,
            client: reqwest::Client::new(),
        };
        let prompt = Prompt {
            system: "sys".into(),
            user: "usr".into(),
            excerpts: 0,
        };
        let body = model.request_body(&prompt, false);
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["stream"], false);
        assert_eq!(model.request_body(&prompt, true)["stream"], true);
    }

    #[test]
    fn stream_events_yield_content_pieces() {
        let piece = r#"{"choices":[{"index":0,"delta":{"content":"Recursion "}}]}"#;
        assert_eq!(parse_stream_event(piece).unwrap().unwrap(), "Recursion ");

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert!(parse_stream_event(role_only).is_none());
        let finished = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert!(parse_stream_event(finished).is_none());
        assert!(parse_stream_event("[DONE]").is_none());
    }

    #[test]
    fn broken_stream_events_are_model_errors() {
        let err = parse_stream_event("{not json").unwrap().unwrap_err();
        assert!(matches!(err, CoreError::ModelInvocation(_)));

        let err = parse_stream_event(r#"{"error":{"message":"overloaded"}}"#)
            .unwrap()
            .unwrap_err();
        match err {
            CoreError::ModelInvocation(msg) => assert!(msg.contains("overloaded"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn disabled_model_fails_to_stream() {
        let prompt = Prompt {
            system: String::new(),
            user: "q".into(),
            excerpts: 0,
        };
        assert!(DisabledModel.complete_stream(&prompt).await.is_err());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let config = LlmConfig {
            provider: "openai".into(),
            model: Some("m".into()),
            api_key_env: "JEDAI_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        let err = create_model(&config).err().unwrap();
        assert!(err.to_string().contains("JEDAI_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
