use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// A two-part chat prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Which key funds a call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Shared key, gated by the usage meter
    Trial(String),
    /// Brought by the user, ungated
    User(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Self::Trial(key) | Self::User(key) => key,
        }
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Self::Trial(_))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trial(_) => f.write_str("Credential::Trial(***)"),
            Self::User(_) => f.write_str("Credential::User(***)"),
        }
    }
}

/// Failure of an external text-generation call.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error: {status}{}{}", status_hint(.status), body_excerpt(.body))]
    Status { status: u16, body: String },

    #[error("request timed out after {:?}", .0)]
    Timeout(Duration),

    #[error("malformed provider response: {0}")]
    Decode(String),

    #[error("unknown LLM provider: {0}")]
    UnknownProvider(String),
}

fn status_hint(status: &u16) -> &'static str {
    match *status {
        401 => " - Invalid API key",
        429 => " - Rate limit exceeded",
        500..=599 => " - Server error",
        _ => "",
    }
}

const ERROR_BODY_CHARS: usize = 200;

/// Provider error text, flattened to one line and truncated.
fn body_excerpt(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return String::new();
    }
    let mut excerpt: String = flat.chars().take(ERROR_BODY_CHARS).collect();
    if flat.chars().count() > ERROR_BODY_CHARS {
        excerpt.push_str("...");
    }
    format!(": {excerpt}")
}

fn send_error(e: reqwest::Error, timeout: Duration) -> RequestError {
    if e.is_timeout() {
        RequestError::Timeout(timeout)
    } else {
        RequestError::Transport(e.to_string())
    }
}

/// External text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt, credential: &Credential)
        -> Result<String, RequestError>;
}

/// Ollama or OpenAI-compatible chat completion over HTTP.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpGenerator {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        credential: &Credential,
    ) -> Result<String, RequestError> {
        let content = match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, prompt).await?,
            "openai" => call_openai(&self.client, &self.config, prompt, credential).await?,
            other => return Err(RequestError::UnknownProvider(other.to_string())),
        };
        Ok(content.trim().to_string())
    }
}

fn messages(prompt: &Prompt) -> Vec<Message> {
    vec![
        Message {
            role: "system".to_string(),
            content: prompt.system.clone(),
        },
        Message {
            role: "user".to_string(),
            content: prompt.user.clone(),
        },
    ]
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(RequestError::Status { status, body })
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    prompt: &Prompt,
) -> Result<String, RequestError> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages: messages(prompt),
        stream: false,
        options: OllamaOptions {
            temperature: config.temperature,
            num_predict: config.max_tokens,
        },
    };

    let resp = client
        .post(&url)
        .timeout(config.timeout())
        .json(&req)
        .send()
        .await
        .map_err(|e| send_error(e, config.timeout()))?;
    let resp = error_for_status(resp).await?;

    let body: OllamaChatResponse = resp
        .json()
        .await
        .map_err(|e| RequestError::Decode(e.to_string()))?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    prompt: &Prompt,
    credential: &Credential,
) -> Result<String, RequestError> {
    let url = format!("{}/v1/chat/completions", config.base_url);

    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages: messages(prompt),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let resp = client
        .post(&url)
        .timeout(config.timeout())
        .header("Authorization", format!("Bearer {}", credential.secret()))
        .json(&req)
        .send()
        .await
        .map_err(|e| send_error(e, config.timeout()))?;
    let resp = error_for_status(resp).await?;

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .map_err(|e| RequestError::Decode(e.to_string()))?;
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RequestError::Decode("response contained no choices".to_string()))
}
