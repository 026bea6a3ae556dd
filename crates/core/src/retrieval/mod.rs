//! Nearest-neighbour retrieval over the reuse corpus.
//!
//! Every strategy answers the same question through [`Retriever`]: which `k`
//! corpus lines are closest to this query embedding, best first.

mod hosted;
mod local;
mod remote;

pub use hosted::HostedIndex;
pub use local::LocalScan;
pub use remote::{RemoteScan, select_from_stream};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::corpus::CorpusError;
use crate::select::SelectError;
use crate::types::ScoredCandidate;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Select(#[from] SelectError),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    /// At most `k` candidates ordered by descending score. Fails rather than
    /// returning a partial ranking.
    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredCandidate>, RetrievalError>;

    /// When the in-process corpus was loaded. `None` for strategies that
    /// read the corpus elsewhere on every query.
    fn corpus_loaded_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}
