use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RetrievalError, Retriever};
use crate::corpus::CorpusError;
use crate::select::SelectError;
use crate::types::ScoredCandidate;

/// Delegates the search to a hosted vector index speaking the
/// `POST /query` protocol (`vector`, `topK`, `includeMetadata`).
///
/// Each match's label comes from its `metadata.line`, or its id when the
/// index stores no metadata.
#[derive(Debug, Clone)]
pub struct HostedIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Deserialize)]
struct MatchMetadata {
    line: Option<String>,
}

impl HostedIndex {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), host, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        host: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{host}")
        };
        Self {
            client,
            host: host.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn query_endpoint(&self) -> String {
        format!("{}/query", self.host)
    }
}

/// Convert index matches into a ranking: descending score, the index's own
/// order breaking ties, cut to `k`.
fn rank_matches(matches: Vec<QueryMatch>, k: usize) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<ScoredCandidate> = matches
        .into_iter()
        .map(|m| {
            let label = m.metadata.and_then(|md| md.line).unwrap_or(m.id);
            let score = if m.score.is_nan() { f32::NEG_INFINITY } else { m.score };
            ScoredCandidate { label, score }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(k);
    ranked
}

#[async_trait]
impl Retriever for HostedIndex {
    fn name(&self) -> &str {
        "hosted"
    }

    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredCandidate>, RetrievalError> {
        if query.is_empty() {
            return Err(SelectError::InvalidArgument("query vector is empty").into());
        }
        if k == 0 {
            return Err(SelectError::InvalidArgument("k must be positive").into());
        }

        let body = QueryRequest {
            vector: query,
            top_k: k,
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };
        let resp = self.client
            .post(self.query_endpoint())
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CorpusError::Unavailable(format!("{}: {e}", self.host)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CorpusError::Unavailable(format!("{}: HTTP {status}: {text}", self.host)).into());
        }

        let api: QueryResponse = resp
            .json()
            .await
            .map_err(|e| CorpusError::Corrupted(format!("index response: {e}")))?;

        tracing::debug!(matches = api.matches.len(), "hosted index answered");
        Ok(rank_matches(api.matches, k))
    }
}
