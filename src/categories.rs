//! Category mapping.
//!
//! The extractor returns free-text category suggestions ("Carnes Bovinas",
//! "Bebidas Alcoólicas", "Frios e Laticínios"). Those are mapped onto a
//! fixed canonical set through an immutable synonym table built once at
//! startup from built-in defaults plus `[categories.map]` config entries.
//! Matching is exact-then-substring on normalized synonyms, falling back to
//! the configured sentinel ("Outros"). The suggestion itself is stored on
//! the product untouched so mappings can be audited and re-run later.

use anyhow::Result;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{CategoriesConfig, Config};
use crate::db;
use crate::normalize::normalize;

/// How a suggestion was placed into a canonical category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryMatch {
    Exact,
    Substring,
    Fallback,
}

impl CategoryMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryMatch::Exact => "exact",
            CategoryMatch::Substring => "substring",
            CategoryMatch::Fallback => "fallback",
        }
    }
}

/// Immutable synonym -> canonical category table.
#[derive(Debug, Clone)]
pub struct CategoryMap {
    /// Keyed by normalized synonym.
    entries: BTreeMap<String, String>,
    fallback: String,
}

/// Built-in synonym table for pt-BR flyer vocabulary. Config entries are
/// merged over these and win on collision.
const BUILTIN_MAP: &[(&str, &str)] = &[
    ("carnes", "Carnes"),
    ("carne", "Carnes"),
    ("acougue", "Carnes"),
    ("aves", "Carnes"),
    ("frango", "Carnes"),
    ("peixes", "Carnes"),
    ("bebidas", "Bebidas"),
    ("bebida", "Bebidas"),
    ("refrigerantes", "Bebidas"),
    ("sucos", "Bebidas"),
    ("cervejas", "Bebidas"),
    ("vinhos", "Bebidas"),
    ("hortifruti", "Hortifruti"),
    ("frutas", "Hortifruti"),
    ("verduras", "Hortifruti"),
    ("legumes", "Hortifruti"),
    ("laticinios", "Laticínios"),
    ("frios", "Laticínios"),
    ("queijos", "Laticínios"),
    ("leites", "Laticínios"),
    ("leite", "Laticínios"),
    ("padaria", "Padaria"),
    ("paes", "Padaria"),
    ("confeitaria", "Padaria"),
    ("mercearia", "Mercearia"),
    ("alimentos", "Mercearia"),
    ("graos", "Mercearia"),
    ("cereais", "Mercearia"),
    ("massas", "Mercearia"),
    ("enlatados", "Mercearia"),
    ("doces", "Mercearia"),
    ("limpeza", "Limpeza"),
    ("higiene", "Higiene"),
    ("perfumaria", "Higiene"),
    ("congelados", "Congelados"),
    ("sorvetes", "Congelados"),
    ("pet", "Pet"),
    ("racao", "Pet"),
];

impl CategoryMap {
    pub fn from_config(config: &CategoriesConfig) -> Self {
        let mut entries = BTreeMap::new();
        for (synonym, canonical) in BUILTIN_MAP {
            entries.insert(synonym.to_string(), canonical.to_string());
        }
        for (synonym, canonical) in &config.map {
            entries.insert(normalize(synonym), canonical.clone());
        }
        Self {
            entries,
            fallback: config.fallback.clone(),
        }
    }

    /// Every canonical name this map can produce, fallback included.
    pub fn canonical_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.entries.values().map(String::as_str).collect();
        names.insert(self.fallback.as_str());
        names
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Map a suggestion onto a canonical category name.
    ///
    /// Exact match on the normalized suggestion first; otherwise the
    /// longest synonym contained in the suggestion wins; otherwise the
    /// fallback sentinel.
    pub fn resolve(&self, suggestion: Option<&str>) -> (String, CategoryMatch) {
        let suggestion = match suggestion {
            Some(s) if !s.trim().is_empty() => normalize(s),
            _ => return (self.fallback.clone(), CategoryMatch::Fallback),
        };

        if let Some(canonical) = self.entries.get(&suggestion) {
            return (canonical.clone(), CategoryMatch::Exact);
        }

        let mut best: Option<(&str, &str)> = None;
        for (synonym, canonical) in &self.entries {
            if suggestion.contains(synonym.as_str()) {
                let longer = best.map(|(s, _)| synonym.len() > s.len()).unwrap_or(true);
                if longer {
                    best = Some((synonym, canonical));
                }
            }
        }

        match best {
            Some((_, canonical)) => (canonical.to_string(), CategoryMatch::Substring),
            None => (self.fallback.clone(), CategoryMatch::Fallback),
        }
    }
}

/// Run the `categories` command: audit how extractor suggestions map onto
/// the canonical set and list the most frequent unmapped ones.
pub async fn run_categories(config: &Config, limit: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let map = CategoryMap::from_config(&config.categories);

    let rows = sqlx::query(
        "SELECT name, category_suggested FROM products WHERE category_suggested IS NOT NULL",
    )
    .fetch_all(&pool)
    .await?;

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    // suggestion -> (count, sample product names)
    let mut unmapped: BTreeMap<String, (usize, Vec<String>)> = BTreeMap::new();

    for row in &rows {
        let name: String = row.get("name");
        let suggested: String = row.get("category_suggested");
        let (_, kind) = map.resolve(Some(&suggested));
        *counts.entry(kind.as_str()).or_default() += 1;

        if kind == CategoryMatch::Fallback {
            let entry = unmapped.entry(suggested).or_insert((0, Vec::new()));
            entry.0 += 1;
            if entry.1.len() < 3 {
                entry.1.push(name);
            }
        }
    }

    let total = rows.len();
    println!("Category mapping audit");
    println!("======================");
    println!();
    println!("  Products with a suggestion: {}", total);
    for kind in ["exact", "substring", "fallback"] {
        let n = counts.get(kind).copied().unwrap_or(0);
        let pct = if total > 0 { n * 100 / total } else { 0 };
        println!("  {:<10} {:>6}  ({}%)", kind, n, pct);
    }

    if !unmapped.is_empty() {
        let mut ranked: Vec<(&String, &(usize, Vec<String>))> = unmapped.iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.0.cmp(b.0)));

        println!();
        println!(
            "  Unmapped suggestions (classified as '{}'):",
            map.fallback()
        );
        println!("  {:<30} {:>5}   EXAMPLES", "SUGGESTION", "COUNT");
        println!("  {}", "-".repeat(72));
        for (suggestion, (count, examples)) in ranked.into_iter().take(limit) {
            println!(
                "  {:<30} {:>5}   {}",
                suggestion,
                count,
                examples.join(", ")
            );
        }
    } else if total > 0 {
        println!();
        println!("  All suggestions mapped.");
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> CategoryMap {
        CategoryMap::from_config(&CategoriesConfig::default())
    }

    #[test]
    fn test_exact_match() {
        let (cat, kind) = map().resolve(Some("Carnes"));
        assert_eq!(cat, "Carnes");
        assert_eq!(kind, CategoryMatch::Exact);
    }

    #[test]
    fn test_exact_match_accent_insensitive() {
        let (cat, kind) = map().resolve(Some("Laticínios"));
        assert_eq!(cat, "Laticínios");
        assert_eq!(kind, CategoryMatch::Exact);
    }

    #[test]
    fn test_substring_match() {
        let (cat, kind) = map().resolve(Some("Bebidas Alcoólicas"));
        assert_eq!(cat, "Bebidas");
        assert_eq!(kind, CategoryMatch::Substring);
    }

    #[test]
    fn test_fallback() {
        let (cat, kind) = map().resolve(Some("Eletrônicos"));
        assert_eq!(cat, "Outros");
        assert_eq!(kind, CategoryMatch::Fallback);
    }

    #[test]
    fn test_missing_or_blank_suggestion() {
        let (cat, kind) = map().resolve(None);
        assert_eq!(cat, "Outros");
        assert_eq!(kind, CategoryMatch::Fallback);

        let (_, kind) = map().resolve(Some("   "));
        assert_eq!(kind, CategoryMatch::Fallback);
    }

    #[test]
    fn test_config_entries_override_builtin() {
        let mut cfg = CategoriesConfig::default();
        cfg.map.insert("pet".to_string(), "Animais".to_string());
        let map = CategoryMap::from_config(&cfg);
        let (cat, _) = map.resolve(Some("Pet"));
        assert_eq!(cat, "Animais");
    }

    #[test]
    fn test_canonical_names_include_fallback() {
        let m = map();
        let names = m.canonical_names();
        assert!(names.contains("Outros"));
        assert!(names.contains("Carnes"));
    }
}
