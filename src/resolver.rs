//! Layered product resolution.
//!
//! Given a raw extracted name, find the product it refers to — or report
//! that none exists. Strategies run in order and stop at the first hit:
//!
//! 1. exact match on the normalized product name;
//! 2. exact match on a normalized alias;
//! 3. fuzzy match against aliases at or above the threshold;
//! 4. fuzzy match against product names at or above the threshold.
//!
//! Every hit is tagged with its strategy (and similarity for the fuzzy
//! paths) so callers can log and audit how a name landed where it did.
//! [`resolve`] is read-only and safe to call repeatedly; creation lives in
//! [`resolve_or_create`], which falls back to one re-resolve when the
//! unique index on the normalized name reports that another writer got
//! there first.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::categories::CategoryMap;
use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{MatchStrategy, Product, RawProduct, ResolvedProduct};
use crate::normalize::{normalize, similarity};

pub(crate) fn product_from_row(row: &SqliteRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        name_normalized: row.get("name_normalized"),
        brand: row.get("brand"),
        category_id: row.get("category_id"),
        category_suggested: row.get("category_suggested"),
        barcode: row.get("barcode"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

pub(crate) const PRODUCT_COLUMNS: &str =
    "id, name, name_normalized, brand, category_id, category_suggested, barcode, description, created_at";

/// Resolve a raw name to an existing product, or `None` if no strategy
/// succeeds. Read-only.
pub async fn resolve(
    pool: &SqlitePool,
    raw_name: &str,
    threshold: f64,
) -> Result<Option<ResolvedProduct>> {
    let needle = normalize(raw_name);
    if needle.is_empty() {
        return Ok(None);
    }

    // 1. Exact normalized name. Duplicates should be impossible under the
    // unique index; the ORDER BY pins the latest-created policy anyway.
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE name_normalized = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        PRODUCT_COLUMNS
    ))
    .bind(&needle)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        return Ok(Some(ResolvedProduct {
            product: product_from_row(&row),
            strategy: MatchStrategy::Exact,
            similarity: None,
        }));
    }

    // 2. Exact normalized alias; highest confidence wins, then recency.
    let row = sqlx::query(&format!(
        "SELECT {cols} FROM products WHERE id = (
            SELECT product_id FROM product_aliases WHERE alias_normalized = ?
            ORDER BY confidence DESC, created_at DESC, id DESC LIMIT 1
        )",
        cols = PRODUCT_COLUMNS
    ))
    .bind(&needle)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        return Ok(Some(ResolvedProduct {
            product: product_from_row(&row),
            strategy: MatchStrategy::AliasExact,
            similarity: None,
        }));
    }

    // 3. Fuzzy over aliases.
    let alias_rows = sqlx::query(
        "SELECT product_id, alias_normalized, confidence, created_at FROM product_aliases",
    )
    .fetch_all(pool)
    .await?;

    let mut best_alias: Option<(String, f64, f64, i64)> = None; // (product_id, score, confidence, created_at)
    for row in &alias_rows {
        let alias_normalized: String = row.get("alias_normalized");
        let score = similarity(&needle, &alias_normalized);
        if score < threshold {
            continue;
        }
        let confidence: f64 = row.get("confidence");
        let created_at: i64 = row.get("created_at");
        let better = match &best_alias {
            None => true,
            Some((_, s, c, t)) => {
                score > *s
                    || (score == *s && confidence > *c)
                    || (score == *s && confidence == *c && created_at > *t)
            }
        };
        if better {
            best_alias = Some((row.get("product_id"), score, confidence, created_at));
        }
    }

    if let Some((product_id, score, _, _)) = best_alias {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE id = ?",
            PRODUCT_COLUMNS
        ))
        .bind(&product_id)
        .fetch_one(pool)
        .await?;
        debug!(name = raw_name, score, "matched via fuzzy alias");
        return Ok(Some(ResolvedProduct {
            product: product_from_row(&row),
            strategy: MatchStrategy::AliasFuzzy,
            similarity: Some(score),
        }));
    }

    // 4. Fuzzy over product names.
    let product_rows = sqlx::query(&format!("SELECT {} FROM products", PRODUCT_COLUMNS))
        .fetch_all(pool)
        .await?;

    let mut best_product: Option<(Product, f64)> = None;
    for row in &product_rows {
        let name_normalized: String = row.get("name_normalized");
        let score = similarity(&needle, &name_normalized);
        if score < threshold {
            continue;
        }
        let better = match &best_product {
            None => true,
            Some((p, s)) => {
                score > *s || (score == *s && row.get::<i64, _>("created_at") > p.created_at)
            }
        };
        if better {
            best_product = Some((product_from_row(row), score));
        }
    }

    if let Some((product, score)) = best_product {
        debug!(name = raw_name, score, "matched via fuzzy product name");
        return Ok(Some(ResolvedProduct {
            product,
            strategy: MatchStrategy::ProductFuzzy,
            similarity: Some(score),
        }));
    }

    Ok(None)
}

/// Resolve a raw product or create a new identity for it.
///
/// Returns the product and whether it was created. A lost create race
/// (unique-index violation on the normalized name) falls back to one
/// re-resolve instead of failing the batch.
pub async fn resolve_or_create(
    pool: &SqlitePool,
    raw: &RawProduct,
    category_map: &CategoryMap,
    threshold: f64,
) -> Result<(ResolvedProduct, bool)> {
    if let Some(resolved) = resolve(pool, &raw.name, threshold).await? {
        return Ok((resolved, false));
    }

    match create_product(pool, raw, category_map).await {
        Ok(product) => Ok((
            ResolvedProduct {
                product,
                strategy: MatchStrategy::Exact,
                similarity: None,
            },
            true,
        )),
        Err(Error::Conflict(_)) => {
            // Another writer created it between our resolve and insert.
            let resolved = resolve(pool, &raw.name, threshold)
                .await?
                .ok_or_else(|| Error::Conflict(format!("create race on '{}'", raw.name)))?;
            Ok((resolved, false))
        }
        Err(e) => Err(e),
    }
}

async fn create_product(
    pool: &SqlitePool,
    raw: &RawProduct,
    category_map: &CategoryMap,
) -> Result<Product> {
    let (canonical, kind) = category_map.resolve(raw.category.as_deref());
    let category_id: Option<String> = sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
        .bind(&canonical)
        .fetch_optional(pool)
        .await?;

    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: raw.name.trim().to_string(),
        name_normalized: normalize(&raw.name),
        brand: raw.brand.clone().filter(|b| !b.trim().is_empty()),
        category_id,
        category_suggested: raw.category.clone().filter(|c| !c.trim().is_empty()),
        barcode: None,
        description: None,
        created_at: chrono::Utc::now().timestamp(),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO products (id, name, name_normalized, brand, category_id, category_suggested, barcode, description, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&product.id)
    .bind(&product.name)
    .bind(&product.name_normalized)
    .bind(&product.brand)
    .bind(&product.category_id)
    .bind(&product.category_suggested)
    .bind(&product.barcode)
    .bind(&product.description)
    .bind(product.created_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            info!(
                name = %product.name,
                category = %canonical,
                category_match = kind.as_str(),
                "created product"
            );
            Ok(product)
        }
        Err(sqlx::Error::Database(e))
            if matches!(e.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            Err(Error::Conflict(format!(
                "product '{}' already exists",
                product.name_normalized
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the `resolve` command: look a name up and report how it matched.
pub async fn run_resolve(config: &Config, name: &str, threshold: Option<f64>) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let threshold = threshold.unwrap_or(config.resolver.threshold);

    match resolve(&pool, name, threshold).await? {
        Some(resolved) => {
            println!("match: {}", resolved.product.name);
            println!("  id:        {}", resolved.product.id);
            println!("  strategy:  {}", resolved.strategy.as_str());
            if let Some(score) = resolved.similarity {
                println!("  similarity: {:.3}", score);
            }
            if let Some(ref brand) = resolved.product.brand {
                println!("  brand:     {}", brand);
            }
        }
        None => {
            println!("no match for '{}' (threshold {})", name, threshold);
        }
    }

    pool.close().await;
    Ok(())
}
