use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub categories: CategoriesConfig,
    #[serde(default)]
    pub merchant: MerchantConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

impl ExtractionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Minimum similarity for the fuzzy resolver strategies.
    #[serde(default = "default_resolve_threshold")]
    pub threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            threshold: default_resolve_threshold(),
        }
    }
}

fn default_resolve_threshold() -> f64 {
    0.85
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// Similarity floor for reported duplicate candidates.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Edit-distance band for the pairwise scan. Pairs outside
    /// `distance_min..=distance_max` are skipped before scoring.
    #[serde(default = "default_distance_min")]
    pub distance_min: usize,
    #[serde(default = "default_distance_max")]
    pub distance_max: usize,
    #[serde(default = "default_dedup_limit")]
    pub limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            distance_min: default_distance_min(),
            distance_max: default_distance_max(),
            limit: default_dedup_limit(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.80
}
fn default_distance_min() -> usize {
    1
}
fn default_distance_max() -> usize {
    3
}
fn default_dedup_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    /// Similarity floor for unattended `merge --auto` runs.
    #[serde(default = "default_auto_min_similarity")]
    pub auto_min_similarity: f64,
    /// Optional product fields considered by back-fill and by the
    /// principal-selection "most populated" tie-break. Explicit so adding a
    /// column later is a deliberate policy change.
    #[serde(default = "default_backfill_fields")]
    pub backfill_fields: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_min_similarity: default_auto_min_similarity(),
            backfill_fields: default_backfill_fields(),
        }
    }
}

fn default_auto_min_similarity() -> f64 {
    0.95
}
fn default_backfill_fields() -> Vec<String> {
    ["brand", "category_id", "barcode", "description"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpansionConfig {
    /// Conjunction word that joins interchangeable products in one line.
    #[serde(default = "default_conjunction")]
    pub conjunction: String,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            conjunction: default_conjunction(),
        }
    }
}

fn default_conjunction() -> String {
    "ou".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoriesConfig {
    /// Sentinel category for anything the map cannot place.
    #[serde(default = "default_fallback_category")]
    pub fallback: String,
    /// Extra synonym -> canonical entries merged over the built-in map.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_category(),
            map: BTreeMap::new(),
        }
    }
}

fn default_fallback_category() -> String {
    "Outros".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MerchantConfig {
    /// Merchant used when the extractor cannot identify one.
    #[serde(default = "default_unknown_merchant")]
    pub unknown_name: String,
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self {
            unknown_name: default_unknown_merchant(),
        }
    }
}

fn default_unknown_merchant() -> String {
    "Desconhecido".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.resolver.threshold) {
        anyhow::bail!("resolver.threshold must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.dedup.min_similarity) {
        anyhow::bail!("dedup.min_similarity must be in [0.0, 1.0]");
    }

    if config.dedup.distance_min > config.dedup.distance_max {
        anyhow::bail!("dedup.distance_min must be <= dedup.distance_max");
    }

    if config.dedup.distance_min == 0 {
        anyhow::bail!("dedup.distance_min must be >= 1 (distance 0 is an exact duplicate, prevented by the unique index)");
    }

    if !(0.0..=1.0).contains(&config.merge.auto_min_similarity) {
        anyhow::bail!("merge.auto_min_similarity must be in [0.0, 1.0]");
    }

    for field in &config.merge.backfill_fields {
        match field.as_str() {
            "brand" | "category_id" | "barcode" | "description" => {}
            other => anyhow::bail!(
                "merge.backfill_fields: unknown field '{}'. Must be one of brand, category_id, barcode, description.",
                other
            ),
        }
    }

    if config.expansion.conjunction.trim().is_empty()
        || config.expansion.conjunction.chars().any(|c| c.is_whitespace())
    {
        anyhow::bail!("expansion.conjunction must be a single non-empty word");
    }

    match config.extraction.provider.as_str() {
        "disabled" | "openai" | "anthropic" | "gemini" | "fixture" => {}
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be disabled, openai, anthropic, gemini, or fixture.",
            other
        ),
    }

    if config.extraction.is_enabled()
        && config.extraction.provider != "fixture"
        && config.extraction.model.is_none()
    {
        anyhow::bail!(
            "extraction.model must be specified when provider is '{}'",
            config.extraction.provider
        );
    }

    Ok(config)
}
