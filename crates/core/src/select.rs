//! Streaming top-K nearest-neighbour selection by cosine similarity.
//!
//! [`StreamingTopKSelector`] consumes candidates one at a time and keeps only
//! the `k` best seen so far in a bounded min-heap: O(log k) per candidate and
//! O(k) memory regardless of corpus length.
//!
//! Ranking is by descending score. Equal scores rank by arrival order, and a
//! later candidate never evicts an earlier one with the same score, so the
//! result equals a stable descending sort of the whole stream cut to `k`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{CorpusEntry, ScoredCandidate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("dimension mismatch: query has {expected} dimensions, candidate has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Cosine similarity of two equal-length vectors.
///
/// Zero-magnitude input has no direction; it scores `-inf` so it can never
/// outrank a real match. Any other non-finite result is treated the same way.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SelectError> {
    if a.len() != b.len() {
        return Err(SelectError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    Ok(cosine_with_norm(a, norm(a), b))
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// `a_norm` is precomputed so a fixed query is only measured once per pass.
fn cosine_with_norm(a: &[f32], a_norm: f64, b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut b_sq = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x) * f64::from(y);
        b_sq += f64::from(y) * f64::from(y);
    }
    let denom = a_norm * b_sq.sqrt();
    if denom == 0.0 {
        return f32::NEG_INFINITY;
    }
    let score = (dot / denom) as f32;
    if score.is_nan() {
        f32::NEG_INFINITY
    } else if score == 0.0 {
        // fold -0.0 so equal scores compare equal under total_cmp
        0.0
    } else {
        score
    }
}

/// Working-set entry. `Ord` puts the worst-ranked entry on top of the
/// max-heap: lowest score first, and among equal scores the latest arrival.
#[derive(Debug, Clone)]
struct HeapEntry {
    score: f32,
    seq: u64,
    label: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.score.total_cmp(&self.score).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Final ranking of one selection pass, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopKResult {
    entries: Vec<ScoredCandidate>,
}

impl TopKResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[ScoredCandidate] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredCandidate> {
        self.entries.iter()
    }

    /// Labels in rank order.
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.label.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<ScoredCandidate> {
        self.entries
    }
}

impl IntoIterator for TopKResult {
    type Item = ScoredCandidate;
    type IntoIter = std::vec::IntoIter<ScoredCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Bounded accumulator for the `k` candidates most similar to a fixed query.
///
/// Single pass: [`offer`](Self::offer) each candidate, then
/// [`finish`](Self::finish). After `finish`, further offers fail with
/// [`SelectError::InvalidState`] until [`reset`](Self::reset) starts a new pass.
#[derive(Debug)]
pub struct StreamingTopKSelector {
    query: Vec<f32>,
    query_norm: f64,
    k: usize,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    finished: bool,
}

impl StreamingTopKSelector {
    pub fn new(query: impl Into<Vec<f32>>, k: usize) -> Result<Self, SelectError> {
        let query = query.into();
        if query.is_empty() {
            return Err(SelectError::InvalidArgument("query vector is empty"));
        }
        if k == 0 {
            return Err(SelectError::InvalidArgument("k must be positive"));
        }
        let query_norm = norm(&query);
        Ok(Self {
            query,
            query_norm,
            k,
            heap: BinaryHeap::with_capacity(k),
            next_seq: 0,
            finished: false,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dimension(&self) -> usize {
        self.query.len()
    }

    /// Number of entries currently held (never more than `k`).
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Score one candidate and admit it if it ranks among the best `k`.
    /// Returns whether it was admitted. On error the working set is unchanged.
    pub fn offer(&mut self, label: &str, vector: &[f32]) -> Result<bool, SelectError> {
        if self.finished {
            return Err(SelectError::InvalidState("offer after finish; call reset first"));
        }
        if vector.len() != self.query.len() {
            return Err(SelectError::DimensionMismatch {
                expected: self.query.len(),
                actual: vector.len(),
            });
        }

        let score = cosine_with_norm(&self.query, self.query_norm, vector);
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.heap.len() < self.k {
            self.heap.push(HeapEntry { score, seq, label: label.to_owned() });
            return Ok(true);
        }

        // Full: replace the current worst only on a strictly higher score.
        match self.heap.peek_mut() {
            Some(mut worst) if score > worst.score => {
                *worst = HeapEntry { score, seq, label: label.to_owned() };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn offer_entry(&mut self, entry: &CorpusEntry) -> Result<bool, SelectError> {
        self.offer(&entry.line, &entry.embedding)
    }

    /// Snapshot of the held entries, best first. Idempotent.
    pub fn finish(&mut self) -> TopKResult {
        self.finished = true;
        let mut held: Vec<&HeapEntry> = self.heap.iter().collect();
        held.sort_unstable();
        TopKResult {
            entries: held
                .into_iter()
                .map(|e| ScoredCandidate { label: e.label.clone(), score: e.score })
                .collect(),
        }
    }

    /// Drop the working set and accept offers for a new pass with the same query.
    pub fn reset(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
        self.finished = false;
    }
}

/// Run one full pass over a fallible candidate sequence.
///
/// Stops at the first error, from either the source or the selector, and
/// returns it instead of a partial ranking.
pub fn scan<I, L, V, E>(query: &[f32], k: usize, candidates: I) -> Result<TopKResult, E>
where
    I: IntoIterator<Item = Result<(L, V), E>>,
    L: AsRef<str>,
    V: AsRef<[f32]>,
    E: From<SelectError>,
{
    let mut selector = StreamingTopKSelector::new(query, k)?;
    for candidate in candidates {
        let (label, vector) = candidate?;
        selector.offer(label.as_ref(), vector.as_ref())?;
    }
    Ok(selector.finish())
}
