use crate::format::{self, MatchRecord, PathResolver};
use crate::ranker::{self, RankError};
use crate::store::{ReferenceStore, StoreError};
use facematch_embed::{Embedding, EmbeddingProvider, ProviderError};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a query did or did not produce matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Matched,
    /// The collection held no record comparable with the probe.
    NoMatches,
    NoFace,
    InvalidProbe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub status: QueryStatus,
    pub matches: Vec<MatchRecord>,
    pub malformed_records: usize,
    pub dimension_mismatches: usize,
    pub degenerate_records: usize,
}

impl QueryReport {
    fn empty(status: QueryStatus) -> Self {
        Self {
            status,
            matches: Vec::new(),
            malformed_records: 0,
            dimension_mismatches: 0,
            degenerate_records: 0,
        }
    }
}

/// Rank the store against an already computed embedding.
pub fn rank_embedding<R>(
    query: &Embedding,
    store: &ReferenceStore,
    resolver: &R,
    k: usize,
) -> Result<QueryReport, QueryError>
where
    R: PathResolver + ?Sized,
{
    let mut records = store.records()?;
    let ranking = ranker::try_top_k(query, &mut records, k)?;
    let malformed = records.skipped();
    if malformed > 0 {
        warn!("{} malformed record(s) in {}", malformed, store.path().display());
    }

    let matches = format::format(&ranking.candidates, resolver);
    info!("Found {} match(es)", matches.len());

    Ok(QueryReport {
        status: if matches.is_empty() {
            QueryStatus::NoMatches
        } else {
            QueryStatus::Matched
        },
        matches,
        malformed_records: malformed,
        dimension_mismatches: ranking.dimension_mismatches,
        degenerate_records: ranking.degenerate,
    })
}

/// Embed `probe` with `provider`, then rank the store against it.
///
/// Provider failures are reported through [`QueryReport::status`] with an
/// empty match list; only structural failures are returned as errors.
pub fn run_query<P, R>(
    provider: &mut P,
    probe: &[u8],
    store: &ReferenceStore,
    resolver: &R,
    k: usize,
) -> Result<QueryReport, QueryError>
where
    P: EmbeddingProvider + ?Sized,
    R: PathResolver + ?Sized,
{
    if k == 0 {
        return Err(RankError::InvalidK.into());
    }

    let query = match provider.produce_embedding(probe) {
        Ok(query) => query,
        Err(ProviderError::NoFaceDetected) => {
            warn!("No face detected");
            return Ok(QueryReport::empty(QueryStatus::NoFace));
        }
        Err(e @ ProviderError::Decode(_)) => {
            warn!("{}", e);
            return Ok(QueryReport::empty(QueryStatus::InvalidProbe));
        }
    };
    info!("Descriptor generated ({} dimensions)", query.dim());

    rank_embedding(&query, store, resolver, k)
}
