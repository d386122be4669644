//! HTTP client for the local inference runtime.
//!
//! Generation, chat and model pulls are all delegated to an
//! Ollama-compatible server; nothing in this process touches model
//! weights.

use crate::infrastructure::entities;
use anyhow::{Context, Result, anyhow};
use di::inject;
use di::injectable;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_RUNTIME_HOST: &str = "http://localhost:11434";

/// One turn of a chat transcript in the runtime's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<entities::Message> for ChatMessage {
    fn from(m: entities::Message) -> Self {
        Self {
            content: m.text,
            role: match m.kind {
                entities::MessageKind::System => ChatRole::System,
                entities::MessageKind::User => ChatRole::User,
                entities::MessageKind::Bot => ChatRole::Assistant,
            },
        }
    }
}

pub struct RuntimeClient {
    client: reqwest::Client,
    host: String,
}

#[injectable]
impl RuntimeClient {
    #[inject]
    pub fn create() -> RuntimeClient {
        dotenvy::dotenv().ok();
        let host = env::var("RUNTIME_HOST").unwrap_or_else(|_| DEFAULT_RUNTIME_HOST.to_owned());
        RuntimeClient::with_host(host)
    }
}

impl RuntimeClient {
    pub fn with_host(host: String) -> RuntimeClient {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("failed to build runtime HTTP client");

        RuntimeClient { client, host }
    }

    fn base_url(&self) -> String {
        // RUNTIME_HOST is sometimes just 'host:port' without a scheme
        let trimmed = self.host.trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_owned()
        } else {
            format!("http://{trimmed}")
        }
    }

    /// One-shot completion, used by the diagnosis agent.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url());
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "prompt": prompt, "stream": false }))
            .send()
            .await
            .with_context(|| format!("runtime unreachable at {url}"))?
            .error_for_status()
            .context("runtime rejected generate request")?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("malformed generate response")?;
        Ok(body.response)
    }

    /// Asks the runtime to fetch a model into its local store.
    pub async fn pull_model(&self, source_id: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url());
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": source_id, "stream": false }))
            .send()
            .await
            .with_context(|| format!("runtime unreachable at {url}"))?
            .error_for_status()
            .with_context(|| format!("runtime failed to pull '{source_id}'"))?;

        let body: PullResponse = response.json().await.context("malformed pull response")?;
        if body.status == "success" {
            Ok(())
        } else {
            Err(anyhow!("unexpected pull status: {}", body.status))
        }
    }

    /// Streams a chat completion, forwarding each content chunk to
    /// `chunks`. Returns once the runtime reports the turn done or the
    /// receiver hangs up.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        chunks: mpsc::Sender<String>,
    ) -> Result<()> {
        let url = format!("{}/api/chat", self.base_url());
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "messages": messages, "stream": true }))
            .send()
            .await
            .with_context(|| format!("runtime unreachable at {url}"))?
            .error_for_status()
            .context("runtime rejected chat request")?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("runtime stream interrupted")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: ChatStreamEvent =
                    serde_json::from_str(line).context("malformed chat stream event")?;

                if let Some(message) = event.message {
                    if !message.content.is_empty() && chunks.send(message.content).await.is_err() {
                        // receiver hung up, nobody is reading this turn
                        return Ok(());
                    }
                }
                if event.done {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamEvent {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    content: String,
}
