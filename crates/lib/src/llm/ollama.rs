//! Ollama chat API (http://127.0.0.1:11434 by default), non-streaming.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{clean_reply, CandidateCommand, TranslateError, Translator};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3.2:latest";

/// Translator backed by a local Ollama instance.
#[derive(Clone)]
pub struct OllamaTranslator {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaTranslator {
    pub fn new(
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            base_url,
            model,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    /// POST /api/chat with stream: false.
    async fn translate(&self, system: &str, task: &str) -> Result<CandidateCommand, TranslateError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: task,
                },
            ],
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::from_reqwest(e, self.timeout))?;
        if !res.status().is_success() {
            return Err(TranslateError::from_status(res).await);
        }
        let data: ChatResponse = res
            .json()
            .await
            .map_err(|e| TranslateError::from_reqwest(e, self.timeout))?;
        if let Some(err) = data.error {
            return Err(TranslateError::Malformed(err));
        }
        let content = data
            .message
            .map(|m| m.content)
            .ok_or_else(|| TranslateError::Malformed("no message in response".to_string()))?;
        clean_reply(&content)
    }

    fn describe(&self) -> String {
        format!("ollama {} ({})", self.model, self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
