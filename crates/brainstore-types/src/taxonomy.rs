//! Commerce taxonomy catalog types.

use crate::error::StoreError;
use crate::graph::TaxonomyPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Catalog domain. Both singular and plural spellings are accepted and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyDomain {
    Category,
    Color,
    Size,
    Gender,
}

impl TaxonomyDomain {
    pub fn singular(&self) -> &'static str {
        match self {
            TaxonomyDomain::Category => "category",
            TaxonomyDomain::Color => "color",
            TaxonomyDomain::Size => "size",
            TaxonomyDomain::Gender => "gender",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            TaxonomyDomain::Category => "categories",
            TaxonomyDomain::Color => "colors",
            TaxonomyDomain::Size => "sizes",
            TaxonomyDomain::Gender => "genders",
        }
    }

    /// Every stored spelling, for the domain CHECK constraint.
    pub fn all_spellings() -> Vec<&'static str> {
        [
            TaxonomyDomain::Category,
            TaxonomyDomain::Color,
            TaxonomyDomain::Size,
            TaxonomyDomain::Gender,
        ]
        .iter()
        .flat_map(|d| [d.singular(), d.plural()])
        .collect()
    }
}

impl fmt::Display for TaxonomyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for TaxonomyDomain {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" | "categories" => Ok(TaxonomyDomain::Category),
            "color" | "colors" => Ok(TaxonomyDomain::Color),
            "size" | "sizes" => Ok(TaxonomyDomain::Size),
            "gender" | "genders" => Ok(TaxonomyDomain::Gender),
            other => Err(StoreError::Validation(format!(
                "unknown taxonomy domain '{other}'"
            ))),
        }
    }
}

/// A catalog node, unique per (tenant, domain, path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub tenant_id: String,
    pub domain: TaxonomyDomain,
    pub name: String,
    pub path: TaxonomyPath,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set by the database; ignored on write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaxonomyEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        domain: TaxonomyDomain,
        name: impl Into<String>,
        path: TaxonomyPath,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            domain,
            name: name.into(),
            path,
            keywords: Vec::new(),
            embedding: None,
            metadata: HashMap::new(),
            updated_at: None,
        }
    }
}
