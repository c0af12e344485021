//! Rank fusion for hybrid search.

use brainstore_types::search::{FusionMode, FusionParams};
use std::cmp::Ordering;
use std::collections::HashMap;

/// One candidate from a single branch. Branch lists are in rank order, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchHit {
    pub id: String,
    pub score: f64,
}

impl BranchHit {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// A candidate after fusion, with the raw branch scores it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub score: f64,
    pub vector_score: Option<f64>,
    pub text_score: Option<f64>,
}

#[derive(Default)]
struct Entry {
    vector: Option<(usize, f64)>,
    text: Option<(usize, f64)>,
}

/// Combine two ranked lists and keep the best `limit`.
///
/// Ordering is by fused score descending, then id ascending, so exact ties
/// come out the same way on every call.
pub fn fuse(
    vector_hits: &[BranchHit],
    text_hits: &[BranchHit],
    mode: FusionMode,
    params: &FusionParams,
    limit: usize,
) -> Vec<FusedHit> {
    let mut entries: HashMap<&str, Entry> = HashMap::new();
    for (idx, hit) in vector_hits.iter().enumerate() {
        let entry = entries.entry(hit.id.as_str()).or_default();
        entry.vector.get_or_insert((idx + 1, hit.score));
    }
    for (idx, hit) in text_hits.iter().enumerate() {
        let entry = entries.entry(hit.id.as_str()).or_default();
        entry.text.get_or_insert((idx + 1, hit.score));
    }

    let mut fused: Vec<FusedHit> = entries
        .into_iter()
        .map(|(id, entry)| {
            let score = match mode {
                FusionMode::Weighted => {
                    params.vector_weight * entry.vector.map_or(0.0, |(_, s)| s)
                        + params.text_weight * entry.text.map_or(0.0, |(_, s)| s)
                }
                FusionMode::Rrf => {
                    let k = f64::from(params.rrf_k);
                    [entry.vector, entry.text]
                        .iter()
                        .flatten()
                        .map(|(rank, _)| 1.0 / (k + *rank as f64))
                        .sum::<f64>()
                }
            };
            FusedHit {
                id: id.to_string(),
                score,
                vector_score: entry.vector.map(|(_, s)| s),
                text_score: entry.text.map(|(_, s)| s),
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(limit);
    fused
}
