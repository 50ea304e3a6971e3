//! Instruction translator: task text in, candidate command text out.
//!
//! The provider is an opaque text generator behind the [`Translator`] trait. Failures are
//! typed ([`TranslateError`]) and never come back as command text.

mod ollama;
mod openai;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Config, TranslatorBackend};

pub use ollama::OllamaTranslator;
pub use openai::OpenAiTranslator;

/// Longest provider error body kept in a [`TranslateError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// Raw, untrusted text produced by a translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCommand(String);

impl CandidateCommand {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("provider did not respond within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl TranslateError {
    /// Classify a reqwest failure; `timeout` is the limit that was applied to the request.
    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            TranslateError::Timeout(timeout)
        } else if e.is_decode() {
            TranslateError::Malformed(e.to_string())
        } else {
            TranslateError::Transport(e.to_string())
        }
    }

    pub(crate) async fn from_status(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let mut body = res.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        TranslateError::Http { status, body }
    }
}

/// Turns a task description into a candidate command.
#[async_trait]
pub trait Translator: Send + Sync {
    /// `system` is the instruction from [`system_instruction`]; `task` is the caller's text, unchanged.
    async fn translate(&self, system: &str, task: &str) -> Result<CandidateCommand, TranslateError>;

    /// Short description for logs (backend and model).
    fn describe(&self) -> String;
}

/// Build the system instruction: rules for the reply shape followed by the registry rendering.
pub fn system_instruction(registry_rendering: &str, data_root: &Path, today: &str) -> String {
    let mut out = String::new();
    out.push_str("Today's date: ");
    out.push_str(today);
    out.push_str("\n\n");
    out.push_str(
        "You turn a task description into exactly one command that runs one of the approved scripts listed below.\n",
    );
    out.push_str("Rules:\n");
    out.push_str("- Reply with the command only, on a single line: <script-path> <arg1> <arg2> ...\n");
    out.push_str("- Use the script path exactly as shown in its usage line.\n");
    out.push_str("- Pass the arguments in the documented order, one word each.\n");
    out.push_str(&format!(
        "- Files live under {}; always use absolute paths.\n",
        data_root.display()
    ));
    out.push_str("- No explanations, quotes, markdown, pipes, redirects or additional commands.\n");
    out.push_str("- If no approved script fits the task, reply with NONE.\n\n");
    out.push_str(registry_rendering.trim_end());
    out.push('\n');
    out
}

/// Trim the reply and unwrap a single surrounding markdown code fence, if any.
pub(crate) fn clean_reply(reply: &str) -> Result<CandidateCommand, TranslateError> {
    let mut text = reply.trim();
    if let Some(inner) = text.strip_prefix("```") {
        // Drop the info string (e.g. "sh") up to the first newline.
        let inner = match inner.find('\n') {
            Some(i) => &inner[i + 1..],
            None => inner,
        };
        text = inner.trim_end().strip_suffix("```").unwrap_or(inner).trim();
    }
    if text.is_empty() {
        return Err(TranslateError::Malformed("empty completion".to_string()));
    }
    Ok(CandidateCommand::new(text))
}

/// Build the configured translator.
pub fn translator_from_config(config: &Config) -> Arc<dyn Translator> {
    let t = &config.translator;
    match t.backend {
        TranslatorBackend::Openai => Arc::new(OpenAiTranslator::new(
            t.base_url.clone(),
            t.model.clone(),
            config::resolve_api_token(config),
            t.timeout(),
        )),
        TranslatorBackend::Ollama => Arc::new(OllamaTranslator::new(
            t.base_url.clone(),
            t.model.clone(),
            t.timeout(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_reply_trims_whitespace() {
        let c = clean_reply("  /app/scripts/a.sh x \n").expect("reply");
        assert_eq!(c.as_str(), "/app/scripts/a.sh x");
    }

    #[test]
    fn clean_reply_unwraps_code_fence() {
        let c = clean_reply("```sh\n/app/scripts/a.sh x\n```").expect("reply");
        assert_eq!(c.as_str(), "/app/scripts/a.sh x");
        let c = clean_reply("```\n/app/scripts/a.sh y\n```\n").expect("reply");
        assert_eq!(c.as_str(), "/app/scripts/a.sh y");
    }

    #[test]
    fn clean_reply_rejects_empty() {
        assert!(matches!(clean_reply("   \n"), Err(TranslateError::Malformed(_))));
        assert!(matches!(clean_reply("```\n```"), Err(TranslateError::Malformed(_))));
    }

    #[test]
    fn system_instruction_embeds_rendering() {
        let s = system_instruction("## Approved scripts\n\n### a.sh\n", Path::new("/data"), "2024-01-05");
        assert!(s.starts_with("Today's date: 2024-01-05\n"));
        assert!(s.contains("Files live under /data"));
        assert!(s.ends_with("### a.sh\n"));
    }

    #[test]
    fn timeout_error_reports_seconds() {
        let e = TranslateError::Timeout(Duration::from_secs(15));
        assert_eq!(e.to_string(), "provider did not respond within 15s");
    }
}
