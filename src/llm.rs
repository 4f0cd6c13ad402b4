//! Generation backend abstraction and the Ollama implementation.
//!
//! [`Generator`] is the seam between the retrieval chain / session layer
//! and the model server. The Ollama implementation streams NDJSON from
//! `POST /api/generate` (single-shot, with an opaque continuation
//! `context`) and `POST /api/chat` (role-tagged message history), and lists
//! installed models via `GET /api/tags`.
//!
//! Streaming responses carry no overall deadline — a long generation must
//! not be killed mid-stream — so the HTTP client only bounds connection
//! establishment; dropping the returned stream aborts the request.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;

use crate::config::OllamaConfig;
use crate::models::ChatMessage;

/// One unit of a streamed generation.
#[derive(Debug, Clone)]
pub struct GenChunk {
    /// Text fragment (may be empty on the terminal line).
    pub text: String,
    /// True on the final line of the stream.
    pub done: bool,
    /// Continuation token returned by `/api/generate` on the final line.
    pub context: Option<Vec<i64>>,
}

pub type GenStream = Pin<Box<dyn Stream<Item = Result<GenChunk>> + Send>>;

/// Streaming text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Identifier of the generation model (e.g. `"gemma3n"`).
    fn model_name(&self) -> &str;

    /// Single-shot generation conditioned on a prompt and an optional
    /// continuation token from a previous run.
    async fn stream_generate(&self, prompt: &str, context: &[i64]) -> Result<GenStream>;

    /// Chat-style generation over a role-tagged message history.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<GenStream>;
}

/// Generation backend using a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    num_ctx: u32,
}

impl OllamaGenerator {
    /// Build a generator for `model` (the configured default or a switched
    /// one) against the configured Ollama instance.
    pub fn new(config: &OllamaConfig, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: model.into(),
            temperature: config.temperature,
            num_ctx: config.context_window,
        })
    }

    async fn post_stream(&self, endpoint: &str, payload: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.url, endpoint))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_generate(&self, prompt: &str, context: &[i64]) -> Result<GenStream> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "context": context,
            "stream": true,
            "options": { "temperature": self.temperature, "num_ctx": self.num_ctx },
        });

        let response = self.post_stream("/api/generate", payload).await?;
        Ok(Box::pin(ndjson_lines(response).map(|line| {
            let line = line?;
            let parsed: GenerateLine = serde_json::from_str(&line)?;
            Ok(GenChunk {
                text: parsed.response,
                done: parsed.done,
                context: parsed.context,
            })
        })))
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<GenStream> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": { "temperature": self.temperature, "num_ctx": self.num_ctx },
        });

        let response = self.post_stream("/api/chat", payload).await?;
        Ok(Box::pin(ndjson_lines(response).map(|line| {
            let line = line?;
            let parsed: ChatLine = serde_json::from_str(&line)?;
            Ok(GenChunk {
                text: parsed.message.map(|m| m.content).unwrap_or_default(),
                done: parsed.done,
                context: None,
            })
        })))
    }
}

#[derive(Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    context: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

/// Split a streaming response body into complete NDJSON lines.
fn ndjson_lines(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            buf.extend_from_slice(&bytes);
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                if !text.trim().is_empty() {
                    yield text;
                }
            }
        }
        if !buf.is_empty() {
            let text = String::from_utf8_lossy(&buf).into_owned();
            if !text.trim().is_empty() {
                yield text;
            }
        }
    }
}

/// List the models installed on the Ollama instance (`GET /api/tags`).
pub async fn list_models(config: &OllamaConfig) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    struct Tags {
        #[serde(default)]
        models: Vec<TagModel>,
    }
    #[derive(Deserialize)]
    struct TagModel {
        name: String,
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let tags: Tags = client
        .get(format!("{}/api/tags", config.url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(tags.models.into_iter().map(|m| m.name).collect())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_line_parses_fragment_and_terminal() {
        let mid: GenerateLine =
            serde_json::from_str(r#"{"model":"m","response":"Hel","done":false}"#).unwrap();
        assert_eq!(mid.response, "Hel");
        assert!(!mid.done);
        assert!(mid.context.is_none());

        let end: GenerateLine =
            serde_json::from_str(r#"{"model":"m","response":"","done":true,"context":[1,2,3]}"#)
                .unwrap();
        assert!(end.done);
        assert_eq!(end.context, Some(vec![1, 2, 3]));
    }

    #[test]
    fn chat_line_parses_message_content() {
        let mid: ChatLine = serde_json::from_str(
            r#"{"message":{"role":"assistant","content":"hi"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(mid.message.unwrap().content, "hi");

        let end: ChatLine = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(end.done);
        assert!(end.message.is_none());
    }

    #[tokio::test]
    async fn scripted_generator_yields_fragments_then_done() {
        use testing::ScriptedGenerator;
        let g = ScriptedGenerator::new(&["a", "b"]);
        let mut stream = g.stream_generate("prompt", &[]).await.unwrap();
        let mut texts = Vec::new();
        while let Some(item) = stream.next().await {
            let chunk = item.unwrap();
            if chunk.done {
                break;
            }
            texts.push(chunk.text);
        }
        assert_eq!(texts, vec!["a", "b"]);
    }
}
