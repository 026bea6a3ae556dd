//! The rewrite pipeline: validate → embed → retrieve → generate → post-process.

pub mod postprocess;
pub mod prompt;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use copydesk_llm::provider::{CompletionRequest, EmbeddingProvider, LlmError, LlmProvider};

use crate::config::ServiceCfg;
use crate::corpus::CorpusError;
use crate::retrieval::{RetrievalError, Retriever};
use crate::types::{SuggestionRequest, SuggestionResponse};

/// Why a suggestion request failed. Each variant is a distinct category for
/// the caller; none of them carries partial results.
#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("Missing nodeText or styleGuideText")]
    Invalid,
    #[error("could not compute embedding: {0}")]
    EmbeddingUnavailable(#[source] LlmError),
    #[error("could not read corpus: {0}")]
    CorpusUnavailable(String),
    #[error("corpus corrupted: {0}")]
    CorpusCorrupted(String),
    #[error("could not generate suggestions: {0}")]
    GenerationUnavailable(#[source] LlmError),
}

impl SuggestError {
    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid_request",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::CorpusUnavailable(_) => "corpus_unavailable",
            Self::CorpusCorrupted(_) => "corpus_corrupted",
            Self::GenerationUnavailable(_) => "generation_unavailable",
        }
    }
}

impl From<RetrievalError> for SuggestError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::Corpus(CorpusError::Unavailable(msg)) => Self::CorpusUnavailable(msg),
            RetrievalError::Corpus(CorpusError::Corrupted(msg)) => Self::CorpusCorrupted(msg),
            // A dimension mismatch means the corpus was embedded with a
            // different model than the query.
            RetrievalError::Select(e) => Self::CorpusCorrupted(e.to_string()),
        }
    }
}

/// One request pipeline, shared by every handler. Holds only immutable state.
pub struct SuggestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<dyn Retriever>,
    cfg: Arc<ServiceCfg>,
}

impl SuggestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<dyn Retriever>,
        cfg: Arc<ServiceCfg>,
    ) -> Self {
        Self { embedder, llm, retriever, cfg }
    }

    pub fn retriever_name(&self) -> &str {
        self.retriever.name()
    }

    pub fn corpus_loaded_at(&self) -> Option<DateTime<Utc>> {
        self.retriever.corpus_loaded_at()
    }

    /// Corpus lines closest to `text`, best first.
    pub async fn reuse_suggestions(&self, text: &str) -> Result<Vec<String>, SuggestError> {
        let query = self.embedder.embed(text).await.map_err(SuggestError::EmbeddingUnavailable)?;
        if query.is_empty() {
            return Err(SuggestError::EmbeddingUnavailable(LlmError::MalformedResponse(
                "empty embedding".into(),
            )));
        }
        let ranked = self.retriever.top_k(&query, self.cfg.reuse_k).await?;
        Ok(ranked.into_iter().map(|c| c.label).collect())
    }

    /// Freshly generated rewrites of the request's text.
    pub async fn new_suggestions(&self, req: &SuggestionRequest) -> Result<Vec<String>, SuggestError> {
        let request = CompletionRequest {
            messages: prompt::build_messages(req, self.cfg.max_new_suggestions),
            max_tokens: self.cfg.max_tokens,
            temperature: self.cfg.temperature,
        };
        let response = self.llm.complete(request).await.map_err(SuggestError::GenerationUnavailable)?;
        Ok(postprocess::parse_suggestions(&response.content, self.cfg.max_new_suggestions))
    }

    /// Run the whole pipeline. Retrieval and generation run concurrently; the
    /// first failure cancels the other branch.
    pub async fn run(&self, req: &SuggestionRequest) -> Result<SuggestionResponse, SuggestError> {
        let (Some(node_text), Some(_)) = (req.node_text(), req.style_guide_text()) else {
            return Err(SuggestError::Invalid);
        };

        let (reuse_suggestions, new_suggestions) = tokio::try_join!(
            self.reuse_suggestions(node_text),
            self.new_suggestions(req),
        )?;

        tracing::info!(
            retriever = self.retriever.name(),
            reuse = reuse_suggestions.len(),
            generated = new_suggestions.len(),
            "suggestions ready"
        );
        Ok(SuggestionResponse { reuse_suggestions, new_suggestions })
    }
}
