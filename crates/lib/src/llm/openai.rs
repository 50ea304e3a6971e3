//! OpenAI-compatible chat completions (`POST {base}/chat/completions`).
//! Works with OpenAI itself and with compatible proxies and local servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{clean_reply, CandidateCommand, TranslateError, Translator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Translator backed by an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiTranslator {
    base_url: String,
    model: String,
    api_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiTranslator {
    pub fn new(
        base_url: Option<String>,
        model: Option<String>,
        api_token: Option<String>,
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
            api_token,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, system: &str, task: &str) -> Result<CandidateCommand, TranslateError> {
        let url = format!("{}/chat/completions", self.base_url);
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
            temperature: 0.0,
            stream: false,
        };
        let mut req = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(ref token) = self.api_token {
            req = req.bearer_auth(token);
        }
        let res = req
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
        let content = data
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| TranslateError::Malformed("no message content in choices".to_string()))?;
        clean_reply(&content)
    }

    fn describe(&self) -> String {
        format!("openai {} ({})", self.model, self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
