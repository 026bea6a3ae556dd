use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RetrievalError, Retriever};
use crate::corpus::CorpusHandle;
use crate::select::StreamingTopKSelector;
use crate::types::ScoredCandidate;

/// Brute-force scan over a corpus loaded at startup.
#[derive(Debug, Clone)]
pub struct LocalScan {
    corpus: CorpusHandle,
}

impl LocalScan {
    pub fn new(corpus: CorpusHandle) -> Self {
        Self { corpus }
    }

    pub fn corpus(&self) -> &CorpusHandle {
        &self.corpus
    }
}

#[async_trait]
impl Retriever for LocalScan {
    fn name(&self) -> &str {
        "local"
    }

    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredCandidate>, RetrievalError> {
        let mut selector = StreamingTopKSelector::new(query, k)?;
        for entry in self.corpus.entries() {
            selector.offer_entry(entry)?;
        }
        let result = selector.finish();
        tracing::debug!(scanned = self.corpus.len(), kept = result.len(), "local scan finished");
        Ok(result.into_vec())
    }

    fn corpus_loaded_at(&self) -> Option<DateTime<Utc>> {
        Some(self.corpus.loaded_at())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::SelectError;
    use crate::types::CorpusEntry;

    fn corpus() -> CorpusHandle {
        CorpusHandle::new(vec![
            CorpusEntry { line: "Save".into(), embedding: vec![1.0, 0.0] },
            CorpusEntry { line: "Cancel".into(), embedding: vec![0.0, 1.0] },
            CorpusEntry { line: "Save changes".into(), embedding: vec![0.9, 0.1] },
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn ranks_corpus_lines() {
        let scan = LocalScan::new(corpus());
        let top = scan.top_k(&[1.0, 0.0], 2).await.unwrap();
        let labels: Vec<_> = top.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Save", "Save changes"]);
    }

    #[tokio::test]
    async fn wrong_query_dimension_fails_whole_request() {
        let scan = LocalScan::new(corpus());
        let err = scan.top_k(&[1.0, 0.0, 0.0], 2).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Select(SelectError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn empty_corpus_yields_nothing() {
        let scan = LocalScan::new(CorpusHandle::new(Vec::new()).unwrap());
        assert!(scan.top_k(&[1.0], 5).await.unwrap().is_empty());
    }

    #[test]
    fn exposes_corpus_load_time() {
        let c = corpus();
        let scan = LocalScan::new(c.clone());
        assert_eq!(scan.corpus_loaded_at(), Some(c.loaded_at()));
    }
}
