use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// A single message in a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// LLM completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text of the first choice. Empty when the model returned no content.
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error type for LLM and embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for chat completion providers (OpenAI, Gemini, DeepSeek, etc.)
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResponse, LlmError>>;
}

/// Trait for text embedding providers.
///
/// Every vector returned by one provider has the same dimensionality.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>>;
}

/// Mock completion provider for testing — returns a fixed response.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub response: Result<String, String>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: Ok(response.into()) }
    }

    /// Create a mock whose every call fails with `LlmError::Unavailable`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { response: Err(reason.into()) }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(
        &self,
        _request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResponse, LlmError>> {
        let response = self.response.clone();
        Box::pin(async move {
            let content = response.map_err(LlmError::Unavailable)?;
            Ok(CompletionResponse { content, input_tokens: 10, output_tokens: 20 })
        })
    }
}

/// Mock embedder for testing — returns a fixed vector for every input,
/// or a per-text override when one is registered.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    vector: Result<Vec<f32>, String>,
    overrides: Vec<(String, Vec<f32>)>,
}

impl MockEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector: Ok(vector), overrides: Vec::new() }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self { vector: Err(reason.into()), overrides: Vec::new() }
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.push((text.into(), vector));
        self
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>> {
        Box::pin(async move {
            if let Some((_, v)) = self.overrides.iter().find(|(t, _)| t == text) {
                return Ok(v.clone());
            }
            self.vector.clone().map_err(LlmError::Unavailable)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_returns_response() {
        let mock = MockProvider::new("1. Save changes");
        let req = CompletionRequest {
            messages: vec![ChatMessage::user("rewrite")],
            max_tokens: 100,
            temperature: 0.5,
        };
        let resp = mock.complete(req).await.unwrap();
        assert_eq!(resp.content, "1. Save changes");
    }

    #[tokio::test]
    async fn failing_provider_is_unavailable() {
        let mock = MockProvider::failing("quota");
        let req = CompletionRequest { messages: vec![], max_tokens: 10, temperature: 0.0 };
        let err = mock.complete(req).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(ref r) if r == "quota"));
    }

    #[tokio::test]
    async fn mock_embedder_uses_override() {
        let e = MockEmbedder::new(vec![0.0, 1.0]).with("save", vec![1.0, 0.0]);
        assert_eq!(e.embed("save").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(e.embed("other").await.unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn failing_embedder() {
        let e = MockEmbedder::failing("timeout");
        assert!(e.embed("x").await.is_err());
    }

    #[test]
    fn message_constructors() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
    }
}
