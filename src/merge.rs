//! Merge engine.
//!
//! Collapses a duplicate product into a surviving one. Everything happens
//! in a single transaction: price observations are re-pointed, the
//! discarded product's aliases are dropped (so a bidirectional pair cannot
//! outlive the merge), its display name becomes an alias on the survivor,
//! empty optional fields are back-filled, and the discarded row is deleted.
//! After commit nothing references the discarded id.
//!
//! Batch mode (`merge --auto`) walks the duplicate detector's candidates,
//! picks the survivor with the principal-selection policy, and treats a
//! missing side as a skip — an earlier merge in the same run may already
//! have consumed it.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::io::Write;
use tracing::info;

use crate::aliases::insert_alias;
use crate::config::Config;
use crate::db;
use crate::dedup;
use crate::error::{self, Error};
use crate::models::{AliasOrigin, MergeResult, Product};
use crate::resolver::{product_from_row, PRODUCT_COLUMNS};

/// Merge `discard_id` into `keep_id` atomically.
///
/// Fails with [`Error::NotFound`] if either product is gone — batch callers
/// treat that as a skip, single-item callers as fatal.
pub async fn merge(
    pool: &SqlitePool,
    keep_id: &str,
    discard_id: &str,
    backfill_fields: &[String],
) -> error::Result<MergeResult> {
    if keep_id == discard_id {
        return Err(Error::Validation(
            "cannot merge a product into itself".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let keep = fetch_product_tx(&mut tx, keep_id).await?;
    let discard = fetch_product_tx(&mut tx, discard_id).await?;

    // 1. Re-point every price observation.
    let prices_moved = sqlx::query("UPDATE prices SET product_id = ? WHERE product_id = ?")
        .bind(&keep.id)
        .bind(&discard.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    // 2. Drop the discarded product's aliases; they are superseded.
    let aliases_dropped = sqlx::query("DELETE FROM product_aliases WHERE product_id = ?")
        .bind(&discard.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    // 3. The discarded display name becomes an alias on the survivor.
    let alias_created = insert_alias(
        &mut tx,
        &keep,
        &discard.name,
        AliasOrigin::Auto,
        1.0,
        "merge",
    )
    .await?;

    // 4. Back-fill empty optional fields from the discarded product.
    let fields_backfilled = backfill(&mut tx, &keep, &discard, backfill_fields).await?;

    // 5. Remove the discarded identity.
    sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(&discard.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        keep = %keep.id,
        discard = %discard.id,
        prices_moved,
        "merged product"
    );

    Ok(MergeResult {
        kept_id: keep.id,
        discarded_id: discard.id,
        prices_moved,
        aliases_dropped,
        alias_created,
        fields_backfilled,
    })
}

async fn fetch_product_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: &str,
) -> error::Result<Product> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE id = ?",
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok(product_from_row(&row)),
        None => Err(Error::not_found("product", id)),
    }
}

/// Copy the configured optional fields from `discard` onto `keep` where
/// `keep` is empty and `discard` is not. Never overwrites.
async fn backfill(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    keep: &Product,
    discard: &Product,
    fields: &[String],
) -> error::Result<Vec<&'static str>> {
    let mut filled = Vec::new();

    for field in fields {
        // Config validation restricts the field list; the column name is
        // one of these literals, never caller text.
        let (column, keep_value, discard_value): (&'static str, _, _) = match field.as_str() {
            "brand" => ("brand", keep.brand.as_deref(), discard.brand.as_deref()),
            "category_id" => (
                "category_id",
                keep.category_id.as_deref(),
                discard.category_id.as_deref(),
            ),
            "barcode" => (
                "barcode",
                keep.barcode.as_deref(),
                discard.barcode.as_deref(),
            ),
            "description" => (
                "description",
                keep.description.as_deref(),
                discard.description.as_deref(),
            ),
            _ => continue,
        };

        let keep_empty = keep_value.map(str::trim).filter(|v| !v.is_empty()).is_none();
        let discard_value = discard_value.map(str::trim).filter(|v| !v.is_empty());

        if let (true, Some(value)) = (keep_empty, discard_value) {
            sqlx::query(&format!("UPDATE products SET {} = ? WHERE id = ?", column))
                .bind(value)
                .bind(&keep.id)
                .execute(&mut **tx)
                .await?;
            filled.push(column);
        }
    }

    Ok(filled)
}

/// A product plus its attached price count, as needed by principal
/// selection.
#[derive(Debug, Clone)]
pub struct PrincipalCandidate {
    pub product: Product,
    pub price_count: i64,
}

/// Pick the product to keep out of a duplicate group: most prices, then
/// most populated optional fields, then earliest creation, then id. Total
/// order — there is always exactly one winner.
pub fn choose_principal<'a>(
    group: &'a [PrincipalCandidate],
    backfill_fields: &[String],
) -> Option<&'a PrincipalCandidate> {
    group.iter().min_by(|a, b| {
        b.price_count
            .cmp(&a.price_count)
            .then_with(|| {
                populated_fields(&b.product, backfill_fields)
                    .cmp(&populated_fields(&a.product, backfill_fields))
            })
            .then_with(|| a.product.created_at.cmp(&b.product.created_at))
            .then_with(|| a.product.id.cmp(&b.product.id))
    })
}

fn populated_fields(product: &Product, fields: &[String]) -> usize {
    fields
        .iter()
        .filter(|field| {
            let value = match field.as_str() {
                "brand" => product.brand.as_deref(),
                "category_id" => product.category_id.as_deref(),
                "barcode" => product.barcode.as_deref(),
                "description" => product.description.as_deref(),
                _ => None,
            };
            value.map(str::trim).filter(|v| !v.is_empty()).is_some()
        })
        .count()
}

async fn price_count(pool: &SqlitePool, product_id: &str) -> error::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prices WHERE product_id = ?")
        .bind(product_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn fetch_candidate(
    pool: &SqlitePool,
    id: &str,
) -> error::Result<Option<PrincipalCandidate>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE id = ?",
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let product = product_from_row(&row);
            let price_count = price_count(pool, &product.id).await?;
            Ok(Some(PrincipalCandidate {
                product,
                price_count,
            }))
        }
        None => Ok(None),
    }
}

/// Run `merge <keep> <discard>`: one pair, first error is fatal.
pub async fn run_merge(config: &Config, keep_id: &str, discard_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    let result = merge(&pool, keep_id, discard_id, &config.merge.backfill_fields).await?;
    print_merge_result(&result);

    pool.close().await;
    Ok(())
}

/// Run `merge --auto`: batch-merge detector candidates at very high
/// similarity. Each merge commits on its own; a pair whose side was
/// already consumed is skipped, and the run ends with a tally.
pub async fn run_merge_auto(
    config: &Config,
    min_similarity: Option<f64>,
    limit: Option<usize>,
    assume_yes: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;

    // Unattended merges are destructive; never go below the configured
    // auto floor no matter what the flag says.
    let floor = config.merge.auto_min_similarity;
    let min_similarity = min_similarity.unwrap_or(floor).max(floor);
    let limit = limit.unwrap_or(config.dedup.limit);
    let band = (config.dedup.distance_min, config.dedup.distance_max);

    let candidates = dedup::find_candidates(&pool, min_similarity, band, limit).await?;

    if candidates.is_empty() {
        println!("No duplicate candidates at similarity >= {}.", min_similarity);
        pool.close().await;
        return Ok(());
    }

    println!(
        "{} candidate pair(s) at similarity >= {} will be merged.",
        candidates.len(),
        min_similarity
    );

    if !assume_yes && !confirm("Proceed? [y/N]: ")? {
        println!("Aborted.");
        pool.close().await;
        return Ok(());
    }

    let mut merged = 0usize;
    let mut skipped = 0usize;
    let mut errored = 0usize;
    let mut prices_moved = 0u64;

    for candidate in &candidates {
        let a = fetch_candidate(&pool, &candidate.product_a.id).await?;
        let b = fetch_candidate(&pool, &candidate.product_b.id).await?;

        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            // One side already merged away earlier in this run.
            _ => {
                skipped += 1;
                continue;
            }
        };

        let pair = [a, b];
        let principal_id = choose_principal(&pair, &config.merge.backfill_fields)
            .expect("pair is non-empty")
            .product
            .id
            .clone();
        let (keep, discard) = if pair[0].product.id == principal_id {
            (&pair[0].product, &pair[1].product)
        } else {
            (&pair[1].product, &pair[0].product)
        };

        match merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields).await {
            Ok(result) => {
                merged += 1;
                prices_moved += result.prices_moved;
                println!(
                    "merged '{}' <- '{}' ({} price(s) moved)",
                    keep.name, discard.name, result.prices_moved
                );
            }
            Err(e) if e.is_not_found() => {
                skipped += 1;
            }
            Err(e) => {
                errored += 1;
                eprintln!("error merging {} / {}: {}", keep.id, discard.id, e);
            }
        }
    }

    println!();
    println!("merge --auto finished");
    println!("  merged:       {}", merged);
    println!("  skipped:      {}", skipped);
    println!("  errors:       {}", errored);
    println!("  prices moved: {}", prices_moved);

    pool.close().await;
    Ok(())
}

fn print_merge_result(result: &MergeResult) {
    println!("merged {} into {}", result.discarded_id, result.kept_id);
    println!("  prices moved:    {}", result.prices_moved);
    println!("  aliases dropped: {}", result.aliases_dropped);
    println!(
        "  alias created:   {}",
        if result.alias_created { "yes" } else { "no (already present)" }
    );
    if !result.fields_backfilled.is_empty() {
        println!("  back-filled:     {}", result.fields_backfilled.join(", "));
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "s"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, created_at: i64, brand: Option<&str>) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Produto {}", id),
            name_normalized: format!("produto {}", id),
            brand: brand.map(String::from),
            category_id: None,
            category_suggested: None,
            barcode: None,
            description: None,
            created_at,
        }
    }

    fn fields() -> Vec<String> {
        crate::config::MergeConfig::default().backfill_fields
    }

    #[test]
    fn test_principal_prefers_more_prices() {
        let group = [
            PrincipalCandidate {
                product: product("a", 1, Some("X")),
                price_count: 1,
            },
            PrincipalCandidate {
                product: product("b", 2, None),
                price_count: 5,
            },
        ];
        let keep = choose_principal(&group, &fields()).unwrap();
        assert_eq!(keep.product.id, "b");
    }

    #[test]
    fn test_principal_ties_on_populated_fields() {
        let group = [
            PrincipalCandidate {
                product: product("a", 2, None),
                price_count: 3,
            },
            PrincipalCandidate {
                product: product("b", 3, Some("X")),
                price_count: 3,
            },
        ];
        let keep = choose_principal(&group, &fields()).unwrap();
        assert_eq!(keep.product.id, "b");
    }

    #[test]
    fn test_principal_ties_on_age_then_id() {
        let group = [
            PrincipalCandidate {
                product: product("b", 5, None),
                price_count: 0,
            },
            PrincipalCandidate {
                product: product("a", 5, None),
                price_count: 0,
            },
            PrincipalCandidate {
                product: product("c", 1, None),
                price_count: 0,
            },
        ];
        let keep = choose_principal(&group, &fields()).unwrap();
        // Oldest wins; among equals the smaller id.
        assert_eq!(keep.product.id, "c");

        let keep = choose_principal(&group[..2], &fields()).unwrap();
        assert_eq!(keep.product.id, "a");
    }
}
