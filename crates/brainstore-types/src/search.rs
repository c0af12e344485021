//! Hybrid search types: fusion policy, scope filters, ranked results.

use crate::config::SearchDefaults;
use crate::graph::{Node, TaxonomyPath};
use serde::{Deserialize, Serialize};

/// How the vector and lexical rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Linear combination of the two raw scores.
    Weighted,
    /// Reciprocal-rank fusion over 1-based branch ranks.
    Rrf,
}

impl std::str::FromStr for FusionMode {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weighted" => Ok(FusionMode::Weighted),
            "rrf" => Ok(FusionMode::Rrf),
            other => Err(crate::error::StoreError::Validation(format!(
                "unknown fusion mode '{other}'"
            ))),
        }
    }
}

/// Tunables for both fusion policies. Only the fields of the selected mode are read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    pub vector_weight: f64,
    pub text_weight: f64,
    /// The `k` in `1 / (k + rank)`.
    pub rrf_k: u32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.8,
            text_weight: 0.2,
            rrf_k: 60,
        }
    }
}

impl From<&SearchDefaults> for FusionParams {
    fn from(defaults: &SearchDefaults) -> Self {
        Self {
            vector_weight: defaults.vector_weight,
            text_weight: defaults.text_weight,
            rrf_k: defaults.rrf_k,
        }
    }
}

/// Optional narrowing applied to both search branches. Tenant is always enforced separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    /// Rows owned by this user or by no user.
    pub user_id: Option<String>,
    /// Rows whose taxonomy path lies at or below this path.
    pub path_scope: Option<TaxonomyPath>,
    /// Rows whose `source_type` is one of these. Empty means no restriction.
    pub source_types: Vec<String>,
}

impl ScopeFilter {
    pub fn is_unrestricted(&self) -> bool {
        self.user_id.is_none() && self.path_scope.is_none() && self.source_types.is_empty()
    }
}

/// A hybrid search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchRequest {
    pub tenant_id: String,
    /// Free text for the lexical branch. Blank disables that branch.
    pub query_text: String,
    /// Precomputed query embedding for the vector branch.
    pub query_vector: Vec<f32>,
    /// Candidates pulled from each branch before fusion.
    pub candidate_k: u32,
    /// Results returned after fusion; clamped to `candidate_k`.
    pub limit: u32,
    pub scope: ScopeFilter,
    pub fusion: FusionMode,
    pub params: FusionParams,
}

impl HybridSearchRequest {
    /// A request populated from configured defaults.
    pub fn new(
        tenant_id: impl Into<String>,
        query_text: impl Into<String>,
        query_vector: Vec<f32>,
        defaults: &SearchDefaults,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            query_text: query_text.into(),
            query_vector,
            candidate_k: defaults.candidate_k,
            limit: defaults.limit,
            scope: ScopeFilter::default(),
            fusion: defaults.fusion,
            params: FusionParams::from(defaults),
        }
    }

    /// Effective result count, or `None` when the bounds admit no results.
    pub fn effective_limit(&self) -> Option<u32> {
        if self.candidate_k == 0 || self.limit == 0 {
            return None;
        }
        Some(self.limit.min(self.candidate_k))
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub node: Node,
    /// Fused score; higher is better.
    pub score: f64,
    /// Cosine similarity mapped to "higher is better", if the vector branch returned this node.
    pub vector_score: Option<f64>,
    /// Lexical rank, if the text branch returned this node.
    pub text_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(candidate_k: u32, limit: u32) -> HybridSearchRequest {
        HybridSearchRequest {
            candidate_k,
            limit,
            ..HybridSearchRequest::new("acme", "q", vec![0.0; 3], &SearchDefaults::default())
        }
    }

    #[test]
    fn test_effective_limit_clamps_to_candidate_k() {
        assert_eq!(request(5, 20).effective_limit(), Some(5));
        assert_eq!(request(50, 8).effective_limit(), Some(8));
    }

    #[test]
    fn test_effective_limit_zero_bounds() {
        assert_eq!(request(0, 8).effective_limit(), None);
        assert_eq!(request(50, 0).effective_limit(), None);
    }

    #[test]
    fn test_fusion_mode_parse() {
        assert_eq!("RRF".parse::<FusionMode>().unwrap(), FusionMode::Rrf);
        assert_eq!("weighted".parse::<FusionMode>().unwrap(), FusionMode::Weighted);
        assert!("max".parse::<FusionMode>().is_err());
        let json = serde_json::to_string(&FusionMode::Rrf).unwrap();
        assert_eq!(json, "\"rrf\"");
    }

    #[test]
    fn test_request_uses_defaults() {
        let defaults = SearchDefaults {
            rrf_k: 10,
            ..Default::default()
        };
        let req = HybridSearchRequest::new("acme", "hello", vec![1.0], &defaults);
        assert_eq!(req.params.rrf_k, 10);
        assert_eq!(req.candidate_k, 50);
        assert!(req.scope.is_unrestricted());
    }
}
