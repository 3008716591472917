//! Duplicate detection.
//!
//! Scans product identities pairwise for near-duplicate names and reports
//! advisory candidates; nothing here mutates state. Two hard rules shape
//! the scan:
//!
//! - **brand filter**: a pair is only a candidate when both products carry
//!   the same brand (case-insensitive) or neither carries one. "Ketchup
//!   BrandX" and "Ketchup BrandY" are different products no matter how
//!   similar the names.
//! - **distance band**: only pairs whose edit distance falls inside the
//!   configured band (default 1..=3) are scored. Distance 0 cannot occur —
//!   the unique index on normalized names forbids exact twins.
//!
//! The bidirectional-alias check reports a data defect the merge engine
//! should have prevented: two surviving products aliased to each other.
//! It is reported, never auto-corrected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::models::{BidirectionalAliasPair, DuplicateCandidate, Product};
use crate::normalize::{edit_distance, normalize, similarity};
use crate::resolver::{product_from_row, PRODUCT_COLUMNS};

/// Scan all product pairs and return candidates above `min_similarity`,
/// descending by similarity, capped at `limit`.
pub async fn find_candidates(
    pool: &SqlitePool,
    min_similarity: f64,
    distance_band: (usize, usize),
    limit: usize,
) -> Result<Vec<DuplicateCandidate>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM products ORDER BY created_at ASC, id ASC",
        PRODUCT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let products: Vec<Product> = rows.iter().map(product_from_row).collect();
    let (dist_min, dist_max) = distance_band;

    let mut candidates = Vec::new();

    for i in 0..products.len() {
        for j in (i + 1)..products.len() {
            let a = &products[i];
            let b = &products[j];

            if !brands_compatible(a.brand.as_deref(), b.brand.as_deref()) {
                continue;
            }

            // Edit distance is at least the length difference; skip cheap.
            let len_a = a.name_normalized.chars().count();
            let len_b = b.name_normalized.chars().count();
            if len_a.abs_diff(len_b) > dist_max {
                continue;
            }

            let distance = edit_distance(&a.name_normalized, &b.name_normalized);
            if distance < dist_min || distance > dist_max {
                continue;
            }

            let score = similarity(&a.name_normalized, &b.name_normalized);
            if score < min_similarity {
                continue;
            }

            candidates.push(DuplicateCandidate {
                product_a: a.clone(),
                product_b: b.clone(),
                similarity: score,
                distance,
            });
        }
    }

    candidates.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.product_a.id.cmp(&y.product_a.id))
            .then_with(|| x.product_b.id.cmp(&y.product_b.id))
    });
    candidates.truncate(limit);

    Ok(candidates)
}

/// Hard precondition for candidacy: equal brands (case-insensitive) or
/// neither recorded. Empty strings count as absent.
fn brands_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (non_empty(a), non_empty(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => normalize(a) == normalize(b),
        _ => false,
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Report product pairs that alias each other: A has an alias equal to B's
/// normalized name and B has one equal to A's. Each pair appears once
/// (ordered by id).
pub async fn find_bidirectional_aliases(pool: &SqlitePool) -> Result<Vec<BidirectionalAliasPair>> {
    let rows = sqlx::query(&format!("SELECT {} FROM products", PRODUCT_COLUMNS))
        .fetch_all(pool)
        .await?;
    let products: Vec<Product> = rows.iter().map(product_from_row).collect();

    let alias_rows =
        sqlx::query("SELECT product_id, alias, alias_normalized FROM product_aliases")
            .fetch_all(pool)
            .await?;

    // product_id -> { alias_normalized -> alias display text }
    let mut aliases: HashMap<String, HashMap<String, String>> = HashMap::new();
    for row in &alias_rows {
        let product_id: String = row.get("product_id");
        let alias: String = row.get("alias");
        let alias_normalized: String = row.get("alias_normalized");
        aliases
            .entry(product_id)
            .or_default()
            .insert(alias_normalized, alias);
    }

    let mut pairs = Vec::new();
    let empty = HashMap::new();

    for i in 0..products.len() {
        for j in (i + 1)..products.len() {
            let (a, b) = order_by_id(&products[i], &products[j]);
            let aliases_a = aliases.get(&a.id).unwrap_or(&empty);
            let aliases_b = aliases.get(&b.id).unwrap_or(&empty);

            let a_points_at_b = aliases_a.get(&b.name_normalized);
            let b_points_at_a = aliases_b.get(&a.name_normalized);

            if let (Some(alias_a), Some(alias_b)) = (a_points_at_b, b_points_at_a) {
                pairs.push(BidirectionalAliasPair {
                    product_a: a.clone(),
                    alias_a: alias_a.clone(),
                    product_b: b.clone(),
                    alias_b: alias_b.clone(),
                });
            }
        }
    }

    pairs.sort_by(|x, y| {
        x.product_a
            .id
            .cmp(&y.product_a.id)
            .then_with(|| x.product_b.id.cmp(&y.product_b.id))
    });

    Ok(pairs)
}

fn order_by_id<'a>(a: &'a Product, b: &'a Product) -> (&'a Product, &'a Product) {
    if a.id <= b.id {
        (a, b)
    } else {
        (b, a)
    }
}

/// Run the `duplicates` command: list candidate pairs without touching them.
pub async fn run_duplicates(
    config: &Config,
    min_similarity: Option<f64>,
    limit: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let min_similarity = min_similarity.unwrap_or(config.dedup.min_similarity);
    let limit = limit.unwrap_or(config.dedup.limit);
    let band = (config.dedup.distance_min, config.dedup.distance_max);

    let candidates = find_candidates(&pool, min_similarity, band, limit).await?;

    if candidates.is_empty() {
        println!("No duplicate candidates at similarity >= {}.", min_similarity);
        pool.close().await;
        return Ok(());
    }

    println!("{} duplicate candidate(s):", candidates.len());
    println!();
    for (idx, c) in candidates.iter().enumerate() {
        println!(
            "{:>3}. {:.1}%  (distance {})",
            idx + 1,
            c.similarity * 100.0,
            c.distance
        );
        println!(
            "     A: {}  [{}]  brand: {}",
            c.product_a.name,
            c.product_a.id,
            c.product_a.brand.as_deref().unwrap_or("-")
        );
        println!(
            "     B: {}  [{}]  brand: {}",
            c.product_b.name,
            c.product_b.id,
            c.product_b.brand.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("Review and merge with: folheto merge <keep-id> <discard-id>");

    pool.close().await;
    Ok(())
}
