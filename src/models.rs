//! Core data models used throughout folheto.
//!
//! These types represent the products, aliases, merchants, price
//! observations, and flyer images that flow through the ingestion and
//! resolution pipeline.

use serde::{Deserialize, Serialize};

/// A product identity stored in SQLite. The unit that price observations
/// attach to.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Derived from `name` via [`crate::normalize::normalize`]; never
    /// mutated independently.
    pub name_normalized: String,
    pub brand: Option<String>,
    pub category_id: Option<String>,
    /// Raw category string suggested by the extractor, kept distinct from
    /// the resolved category for later re-mapping audits.
    pub category_suggested: Option<String>,
    pub barcode: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Origin of an alias entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOrigin {
    Auto,
    SemiAuto,
    Manual,
    Llm,
}

impl AliasOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasOrigin::Auto => "auto",
            AliasOrigin::SemiAuto => "semi-auto",
            AliasOrigin::Manual => "manual",
            AliasOrigin::Llm => "llm",
        }
    }

}

/// An alternate name for a product. Owned by exactly one product and
/// destroyed with it.
#[derive(Debug, Clone)]
pub struct Alias {
    pub id: String,
    pub product_id: String,
    pub alias: String,
    pub alias_normalized: String,
    pub origin: String,
    pub confidence: f64,
    pub created_by: String,
    pub created_at: i64,
}

/// Processing state of a flyer image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Pending,
    Processed,
    Error,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Processed => "processed",
            ImageStatus::Error => "error",
        }
    }
}

/// Strategy that produced a resolver match. Surfaced to callers for
/// logging and audit, not silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    AliasExact,
    AliasFuzzy,
    ProductFuzzy,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::AliasExact => "alias-exact",
            MatchStrategy::AliasFuzzy => "alias-fuzzy",
            MatchStrategy::ProductFuzzy => "product-fuzzy",
        }
    }
}

/// Resolver result: the matched product, how it was matched, and the
/// similarity score for the fuzzy strategies.
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub product: Product,
    pub strategy: MatchStrategy,
    /// `Some` for fuzzy strategies, `None` for exact matches.
    pub similarity: Option<f64>,
}

/// A candidate duplicate pair reported by the detector. Derived on demand,
/// never stored.
#[derive(Debug, Clone)]
pub struct DuplicateCandidate {
    pub product_a: Product,
    pub product_b: Product,
    pub similarity: f64,
    pub distance: usize,
}

/// A bidirectional-alias defect: each product carries an alias equal to the
/// other's name. Signals a merge that never happened.
#[derive(Debug, Clone)]
pub struct BidirectionalAliasPair {
    pub product_a: Product,
    pub alias_a: String,
    pub product_b: Product,
    pub alias_b: String,
}

/// Outcome of a single merge, all counts taken inside the transaction.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub kept_id: String,
    pub discarded_id: String,
    pub prices_moved: u64,
    pub aliases_dropped: u64,
    /// Whether the discarded display name was inserted as a new alias on
    /// the kept product (false when it already existed there).
    pub alias_created: bool,
    pub fields_backfilled: Vec<&'static str>,
}

/// One product line as produced by the extraction collaborator, before
/// expansion and resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProduct {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price: Option<f64>,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub on_promotion: bool,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Full payload returned by the extraction collaborator for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub products: Vec<RawProduct>,
}

/// Per-image ingestion tally. Soft errors are collected, not raised.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub image_id: String,
    pub products_seen: usize,
    pub products_new: usize,
    pub products_existing: usize,
    pub prices_saved: usize,
    pub errors: Vec<String>,
}
