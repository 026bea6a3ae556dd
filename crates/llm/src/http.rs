//! HTTP-based providers.
//!
//! Speaks the OpenAI-compatible wire format (OpenAI, Google Gemini, DeepSeek,
//! local proxies) for both chat completions and embeddings.

use crate::provider::{
    BoxFuture, CompletionRequest, CompletionResponse, EmbeddingProvider, LlmError, LlmProvider,
    Role,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion model used when no model variable is set.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";
/// Embedding model used when no model variable is set.
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-ada-002";

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Google,
    DeepSeek,
    /// Falls back to OpenAI-compatible defaults.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("text-embedding-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
        {
            Self::OpenAi
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }
}

// ── OpenAI-compatible request/response types ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Serialize)]
struct OaiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OaiEmbeddingResponse {
    data: Vec<OaiEmbedding>,
}

#[derive(Deserialize)]
struct OaiEmbedding {
    embedding: Vec<f32>,
}

// ── Provider ──

/// HTTP-based provider for one model. The same type serves completion models
/// and embedding models; which trait a caller uses decides the endpoint.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from model name + API key + optional base URL override.
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::from_model(&model);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    /// Replace the HTTP client with one that aborts requests after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Unknown => "unknown",
        }
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<R, LlmError> {
        let resp = self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LlmError::Unavailable(e.to_string())
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        resp.json().await.map_err(|e| LlmError::MalformedResponse(e.to_string()))
    }

    async fn complete_openai(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = OaiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(|m| OaiMessage {
                role: role_str(&m.role),
                content: m.content.clone(),
            }).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let api: OaiResponse = self.post_json(self.chat_endpoint(), &body).await?;

        let content = api.choices.into_iter().next()
            .and_then(|c| c.message.content).unwrap_or_default();
        let (input_tokens, output_tokens) = api.usage
            .map(|u| (u.prompt_tokens, u.completion_tokens)).unwrap_or((0, 0));

        tracing::debug!(
            provider = self.kind_name(),
            model = %self.model,
            input_tokens,
            output_tokens,
            "completion finished"
        );
        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = OaiEmbeddingRequest { model: &self.model, input: text };
        let api: OaiEmbeddingResponse = self.post_json(self.embeddings_endpoint(), &body).await?;
        let embedding = api.data.into_iter().next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::MalformedResponse("no embedding in response".into()))?;
        if embedding.is_empty() {
            return Err(LlmError::MalformedResponse("empty embedding".into()));
        }
        Ok(embedding)
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else if status.is_server_error() {
        LlmError::Unavailable(format!("{status}: {body}"))
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind_name()
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResponse, LlmError>> {
        Box::pin(self.complete_openai(request))
    }
}

impl EmbeddingProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind_name()
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>> {
        Box::pin(self.embed_openai(text))
    }
}

/// Build a provider from a variable lookup.
/// Reads `<model_key>` (falling back to `default_model`), `COPYDESK_LLM_API_KEY`
/// (falling back to `OPENAI_API_KEY`), and optionally `COPYDESK_LLM_BASE_URL`.
/// Returns `None` if no API key is set.
pub fn from_vars(
    lookup: impl Fn(&str) -> Option<String>,
    model_key: &str,
    default_model: &str,
) -> Option<HttpProvider> {
    let api_key = lookup("COPYDESK_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"))?;
    let model = lookup(model_key).unwrap_or_else(|| default_model.to_owned());
    let base_url = lookup("COPYDESK_LLM_BASE_URL");
    Some(HttpProvider::new(model, api_key, base_url))
}

/// Chat completion provider from the process environment (`COPYDESK_LLM_MODEL`).
pub fn from_env() -> Option<HttpProvider> {
    from_vars(|k| std::env::var(k).ok(), "COPYDESK_LLM_MODEL", DEFAULT_CHAT_MODEL)
}

/// Embedding provider from the process environment (`COPYDESK_EMBED_MODEL`).
pub fn embed_from_env() -> Option<HttpProvider> {
    from_vars(|k| std::env::var(k).ok(), "COPYDESK_EMBED_MODEL", DEFAULT_EMBED_MODEL)
}
