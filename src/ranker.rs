use crate::store::{ReferenceRecord, StoreError};
use facematch_embed::similarity::{ensure_normalizable, similarity, SimilarityError};
use facematch_embed::Embedding;
use log::{debug, warn};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("k must be at least 1")]
    InvalidK,
    #[error("query embedding has zero norm")]
    DegenerateVector,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A reference record scored against the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub key: String,
    pub similarity: f32,
    /// Index of the record in the source stream.
    pub position: usize,
}

/// Outcome of one ranking pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    /// Best candidates, most similar first.
    pub candidates: Vec<ScoredCandidate>,
    pub scored: usize,
    pub dimension_mismatches: usize,
    pub degenerate: usize,
}

/// Heap entry ordered from worst to best candidate: lower similarity is
/// worse, and among equal similarities the later record is worse.
#[derive(Debug)]
struct Ranked(ScoredCandidate);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .similarity
            .total_cmp(&other.0.similarity)
            .then_with(|| other.0.position.cmp(&self.0.position))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Bounded set of the `k` best candidates seen so far.
pub struct Shortlist {
    k: usize,
    // Min-heap: the root is the current worst entry.
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl Shortlist {
    pub fn new(k: usize) -> Result<Self, RankError> {
        if k == 0 {
            return Err(RankError::InvalidK);
        }
        Ok(Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(1024) + 1),
        })
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn offer(&mut self, candidate: ScoredCandidate) {
        let candidate = Ranked(candidate);
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return;
        }
        if let Some(mut worst) = self.heap.peek_mut() {
            if candidate > worst.0 {
                *worst = Reverse(candidate);
            }
        }
    }

    /// Best first.
    pub fn into_sorted(self) -> Vec<ScoredCandidate> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(Ranked(c))| c)
            .collect()
    }
}

/// Rank an in-memory record source. See [`try_top_k`].
pub fn top_k<I>(query: &Embedding, source: I, k: usize) -> Result<Ranking, RankError>
where
    I: IntoIterator<Item = ReferenceRecord>,
{
    try_top_k(query, source.into_iter().map(Ok::<_, StoreError>), k)
}

/// Score every record against `query` and keep the `k` most similar.
///
/// Equal similarities keep their source order. Records of another dimension
/// or with a zero-norm embedding are skipped and counted; a source error
/// aborts the pass.
pub fn try_top_k<I>(query: &Embedding, source: I, k: usize) -> Result<Ranking, RankError>
where
    I: IntoIterator<Item = Result<ReferenceRecord, StoreError>>,
{
    let mut shortlist = Shortlist::new(k)?;
    ensure_normalizable(query).map_err(|_| RankError::DegenerateVector)?;

    let mut ranking = Ranking::default();
    for (position, record) in source.into_iter().enumerate() {
        let record = record?;
        match similarity(query, &record.embedding) {
            Ok(score) => {
                ranking.scored += 1;
                shortlist.offer(ScoredCandidate {
                    key: record.key,
                    // -0.0 and 0.0 must tie
                    similarity: score + 0.0,
                    position,
                });
            }
            Err(SimilarityError::DimensionMismatch { expected, actual }) => {
                ranking.dimension_mismatches += 1;
                debug!(
                    "skipping {:?}: dimension {} does not match query dimension {}",
                    record.key, actual, expected
                );
            }
            Err(SimilarityError::DegenerateVector) => {
                ranking.degenerate += 1;
                warn!("skipping {:?}: zero-norm embedding", record.key);
            }
        }
    }

    ranking.candidates = shortlist.into_sorted();
    debug!(
        "ranked {} records, kept {}, {} dimension mismatches, {} degenerate",
        ranking.scored,
        ranking.candidates.len(),
        ranking.dimension_mismatches,
        ranking.degenerate
    );
    Ok(ranking)
}
