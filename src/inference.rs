//! Streaming client for the hosted chat-completion API

use crate::config::InferenceConfig;
use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Sent to the sink in place of a live answer when no API key is configured
pub const FALLBACK_MESSAGE: &str = "[No GROQ_API_KEY set]\n\nAdd your free Groq key to the service environment:\n\nGROQ_API_KEY=gsk_...";

/// Fixed system instruction selecting the model's response style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Code,
    Creative,
    Reasoning,
}

impl Persona {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Code => {
                "You are CodeBot v2, an elite full-stack AI engineer secured by DataHaven on Quai Network.\n\
                 You write clean, production-ready code in any language. Always include brief explanations.\n\
                 Format code in markdown fenced blocks with language tags. Be concise but thorough.\n\
                 Never refuse a coding question."
            }
            Self::Creative => {
                "You are CreativeWriter, a powerful creative AI secured by DataHaven on Quai Network.\n\
                 You craft vivid stories, poems, scripts, and marketing copy with literary flair.\n\
                 Respond with creative energy and originality. Match the tone the user implies.\n\
                 Never refuse a creative prompt."
            }
            Self::Reasoning => {
                "You are QuantumReason, an advanced analytical AI secured by DataHaven on Quai Network.\n\
                 You excel at logic, mathematics, scientific reasoning, and structured argumentation.\n\
                 Break down problems step by step. Use numbered lists for multi-part reasoning.\n\
                 Show your work. Be precise and rigorous."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Receives incremental text as it arrives
pub type TokenSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Backend producing a streamed chat answer
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream the answer to `history` under `persona`, returning the full text
    async fn stream_chat(
        &self,
        persona: Persona,
        history: &[ChatMessage],
        sink: &mut TokenSink<'_>,
    ) -> VaultResult<String>;
}

/// OpenAI-compatible streaming client
pub struct InferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(&self, persona: Persona, history: &[ChatMessage]) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": persona.system_prompt() })];
        messages.extend(history.iter().map(|m| json!(m)));
        json!({
            "model": self.config.model,
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        })
    }
}

#[async_trait]
impl ChatBackend for InferenceClient {
    async fn stream_chat(
        &self,
        persona: Persona,
        history: &[ChatMessage],
        sink: &mut TokenSink<'_>,
    ) -> VaultResult<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            sink(FALLBACK_MESSAGE);
            return Ok(FALLBACK_MESSAGE.to_string());
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(persona, history))
            .send()
            .await
            .map_err(|e| VaultError::Inference(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Inference(format!(
                "API error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let mut decoder = SseDecoder::default();
        let mut full = String::new();
        let mut stream = response.bytes_stream();

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| VaultError::Inference(e.to_string()))?;
            for item in decoder.push(&chunk) {
                match item {
                    SseItem::Token(token) => {
                        full.push_str(&token);
                        sink(&token);
                    }
                    SseItem::Done => break 'read,
                }
            }
        }

        tracing::debug!(persona = ?persona, chars = full.len(), "Inference stream finished");
        Ok(full)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseItem {
    Token(String),
    Done,
}

/// Line-buffered decoder for `data:` frames; partial lines wait for the next chunk
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                items.push(SseItem::Done);
                break;
            }
            // Malformed frames are skipped
            let Ok(frame) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if let Some(token) = frame["choices"][0]["delta"]["content"].as_str()
                && !token.is_empty()
            {
                items.push(SseItem::Token(token.to_string()));
            }
        }

        items
    }
}
