//! OpenRouter completion client
//!
//! Wraps the remote chat-completion call behind [`CompletionClient::reply`],
//! which always resolves to a displayable string. Configuration errors,
//! upstream failures, and transport errors are logged and rendered as
//! in-band reply text so the relay always has a bot turn to broadcast.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::protocol::Mode;

const COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Token ceiling for a single reply
const MAX_REPLY_TOKENS: u32 = 300;

const PRACTICE_PROMPT: &str = "You are a strict but encouraging English speaking practice teacher. \
    You lead the conversation. Always: 1) Briefly correct the user's last sentence if needed. \
    2) Give a very short explanation (1-2 lines). 3) Ask ONE simple follow-up question in English \
    to keep the conversation going. Keep your whole reply under 70 words.";

const FREE_PROMPT: &str = "You are a strict but kind English teacher. Always reply in simple \
    English. If the user makes grammar or vocabulary mistakes, first correct their sentence, then \
    briefly explain the mistake, then ask a short follow-up question to keep the conversation \
    going. Keep answers under 80 words.";

/// Reply when no API key is configured
const NO_KEY_REPLY: &str = "AI config error (no API key)";
/// Reply when the response carried no message content
const NO_CONTENT_REPLY: &str = "Sorry, I couldn't generate a reply.";
/// Reply when sanitization leaves nothing worth displaying
const ENGAGE_REPLY: &str = "Thanks! Can you tell me more?";
/// Reply on transport failures
const RETRY_REPLY: &str = "Sorry, I couldn't respond. Try again.";

/// Errors on the completion request path. None of these escape
/// [`CompletionClient::reply`].
#[derive(Debug, thiserror::Error)]
enum CompletionError {
    #[error("completion endpoint returned status {status}")]
    Upstream {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Stateless client for the OpenRouter chat-completions endpoint.
/// Cloning is cheap; concurrent calls are fully independent.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl CompletionClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Produce a displayable reply for the given user text and mode.
    /// Never fails: every error is rendered as a reply string.
    pub async fn reply(&self, text: &str, mode: Mode) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::error!("no OpenRouter API key configured");
            return NO_KEY_REPLY.to_string();
        };

        match self.fetch(api_key, text, mode).await {
            Ok(content) => shape_reply(content),
            Err(err) => error_reply(&err),
        }
    }

    /// Issue the completion request and extract the first choice's content
    async fn fetch(
        &self,
        api_key: &str,
        text: &str,
        mode: Mode,
    ) -> Result<Option<String>, CompletionError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: system_prompt(mode),
                },
                RequestMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: MAX_REPLY_TOKENS,
        };

        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Upstream { status, body });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

/// System instruction for the tutor persona of the given mode
fn system_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Practice => PRACTICE_PROMPT,
        Mode::Free => FREE_PROMPT,
    }
}

/// Render a request failure as an in-band reply
fn error_reply(err: &CompletionError) -> String {
    match err {
        CompletionError::Upstream { status, body } => {
            tracing::error!("OpenRouter error: {} {}", status, body);
            format!("Sorry, AI service error. (status {})", status.as_u16())
        }
        CompletionError::Transport(e) => {
            tracing::error!("error calling OpenRouter: {}", e);
            RETRY_REPLY.to_string()
        }
    }
}

/// Turn raw provider content into the final displayable reply
fn shape_reply(content: Option<String>) -> String {
    let Some(raw) = content else {
        return NO_CONTENT_REPLY.to_string();
    };

    let cleaned = strip_reasoning(&raw);
    if cleaned.chars().count() < 2 {
        ENGAGE_REPLY.to_string()
    } else {
        cleaned
    }
}

/// Remove `<think>` reasoning markup some models leak into their replies:
/// paired blocks, an unterminated opening tag through end of input, and
/// stray closing tags. Matching is ASCII case-insensitive.
fn strip_reasoning(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut kept = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = find_ignore_case(rest, OPEN) {
        kept.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        match find_ignore_case(after_open, CLOSE) {
            Some(end) => rest = &after_open[end + CLOSE.len()..],
            // Unterminated block: drop everything after the opening tag
            None => {
                rest = "";
            }
        }
    }
    kept.push_str(rest);

    let mut cleaned = String::with_capacity(kept.len());
    let mut rest = kept.as_str();
    while let Some(start) = find_ignore_case(rest, CLOSE) {
        cleaned.push_str(&rest[..start]);
        rest = &rest[start + CLOSE.len()..];
    }
    cleaned.push_str(rest);

    cleaned.trim().to_string()
}

/// Byte offset of the first ASCII case-insensitive occurrence of `needle`
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}
