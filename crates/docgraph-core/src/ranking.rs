//! Result shaping for the retrieval pipeline.
//!
//! # Ranking
//!
//! 1. Multiply each hit's raw cosine score by its document's promotion boost.
//! 2. Group by document, keeping the hit with the highest boosted score.
//! 3. Sort groups by boosted score (desc), raw score (desc), document id (asc).
//! 4. Truncate to `max_results`.
//!
//! Confidence is computed from raw scores only, so promotion never inflates it.

use std::collections::HashMap;

use crate::vector::VectorHit;

/// Hard ceiling on the vector-search fan-out.
pub const MAX_OVER_FETCH: usize = 100;

/// Resolve a caller's result-count hint against the default and cap.
///
/// Out-of-range values clamp; they are never an error.
pub fn clamp_max_results(requested: Option<i64>, default: usize, cap: usize) -> usize {
    let cap = cap.max(1) as i64;
    let value = requested.unwrap_or(default as i64);
    value.clamp(1, cap) as usize
}

/// Number of chunks to request from the vector store.
pub fn over_fetch_k(max_results: usize, factor: usize) -> usize {
    max_results
        .saturating_mul(factor.max(1))
        .clamp(max_results.min(MAX_OVER_FETCH), MAX_OVER_FETCH)
}

/// A document's representative hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub hit: VectorHit,
    pub boosted_score: f64,
}

pub fn rank_by_document(hits: Vec<VectorHit>, max_results: usize) -> Vec<RankedHit> {
    let mut best: HashMap<String, RankedHit> = HashMap::new();
    for hit in hits {
        let boosted_score = hit.score * hit.metadata.promotion.boost();
        let candidate = RankedHit { hit, boosted_score };
        match best.get(&candidate.hit.metadata.document_id) {
            Some(current) if !outranks(&candidate, current) => {}
            _ => {
                best.insert(candidate.hit.metadata.document_id.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<RankedHit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.boosted_score
            .total_cmp(&a.boosted_score)
            .then_with(|| b.hit.score.total_cmp(&a.hit.score))
            .then_with(|| a.hit.metadata.document_id.cmp(&b.hit.metadata.document_id))
    });
    ranked.truncate(max_results);
    ranked
}

/// Within one document: higher boosted score wins, then lower chunk id.
fn outranks(a: &RankedHit, b: &RankedHit) -> bool {
    match a.boosted_score.total_cmp(&b.boosted_score) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.hit.chunk_id < b.hit.chunk_id,
    }
}

/// `min(1, avg(raw) × scale)`, floored at zero; `0.0` for no results.
pub fn confidence(ranked: &[RankedHit], scale: f64) -> f64 {
    if ranked.is_empty() {
        return 0.0;
    }
    let avg = ranked.iter().map(|r| r.hit.score).sum::<f64>() / ranked.len() as f64;
    (avg * scale).clamp(0.0, 1.0)
}
