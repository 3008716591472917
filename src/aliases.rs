//! Alias store.
//!
//! Aliases map alternate spellings of a product name to its identity, each
//! carrying provenance (origin tag, confidence, creator). The store is
//! append-only from the pipeline's point of view: inserting an alias that
//! already exists on the product is a no-op, and an alias matching the
//! product's own normalized display name is skipped as redundant. Aliases
//! only ever disappear when their owning product does (merge, cascade).

use anyhow::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::dedup;
use crate::error;
use crate::models::{Alias, AliasOrigin, Product};
use crate::normalize::normalize;

/// Insert an alias on a product if it adds information.
///
/// Returns `true` when a row was written. No-ops (returning `false`):
/// an alias that normalizes to the empty string, one equal to the product's
/// own normalized name, or one already present on the product.
pub async fn insert_alias(
    conn: &mut SqliteConnection,
    product: &Product,
    alias_text: &str,
    origin: AliasOrigin,
    confidence: f64,
    created_by: &str,
) -> error::Result<bool> {
    let alias_normalized = normalize(alias_text);
    if alias_normalized.is_empty() || alias_normalized == product.name_normalized {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO product_aliases (id, product_id, alias, alias_normalized, origin, confidence, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(product_id, alias_normalized) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&product.id)
    .bind(alias_text.trim())
    .bind(&alias_normalized)
    .bind(origin.as_str())
    .bind(confidence)
    .bind(created_by)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn fetch_product(pool: &SqlitePool, id: &str) -> error::Result<Product> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE id = ?",
        crate::resolver::PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(crate::resolver::product_from_row(&row)),
        None => Err(error::Error::not_found("product", id)),
    }
}

/// Run `aliases list`: print aliases, optionally for one product.
pub async fn run_list(config: &Config, product_id: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = match product_id {
        Some(id) => {
            sqlx::query(
                "SELECT a.id, a.product_id, a.alias, a.alias_normalized, a.origin, a.confidence, a.created_by, a.created_at, p.name AS product_name
                 FROM product_aliases a JOIN products p ON p.id = a.product_id
                 WHERE a.product_id = ? ORDER BY a.created_at ASC",
            )
            .bind(id)
            .fetch_all(&pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT a.id, a.product_id, a.alias, a.alias_normalized, a.origin, a.confidence, a.created_by, a.created_at, p.name AS product_name
                 FROM product_aliases a JOIN products p ON p.id = a.product_id
                 ORDER BY p.name ASC, a.created_at ASC",
            )
            .fetch_all(&pool)
            .await?
        }
    };

    if rows.is_empty() {
        println!("No aliases.");
        pool.close().await;
        return Ok(());
    }

    println!("{:<28} {:<28} {:<9} {:>5}", "PRODUCT", "ALIAS", "ORIGIN", "CONF");
    println!("{}", "-".repeat(74));
    for row in &rows {
        let alias = Alias {
            id: row.get("id"),
            product_id: row.get("product_id"),
            alias: row.get("alias"),
            alias_normalized: row.get("alias_normalized"),
            origin: row.get("origin"),
            confidence: row.get("confidence"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
        };
        let product_name: String = row.get("product_name");
        println!(
            "{:<28} {:<28} {:<9} {:>5.2}",
            truncate(&product_name, 28),
            truncate(&alias.alias, 28),
            alias.origin,
            alias.confidence
        );
    }
    println!();
    println!("{} alias(es).", rows.len());

    pool.close().await;
    Ok(())
}

/// Run `aliases add`: manually attach an alias to a product.
pub async fn run_add(config: &Config, product_id: &str, alias_text: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    let product = fetch_product(&pool, product_id).await?;
    let mut conn = pool.acquire().await?;
    let created = insert_alias(
        &mut conn,
        &product,
        alias_text,
        AliasOrigin::Manual,
        1.0,
        "cli",
    )
    .await?;
    drop(conn);

    if created {
        println!("Alias '{}' added to '{}'.", alias_text.trim(), product.name);
    } else {
        println!(
            "Alias '{}' already covered by '{}'; nothing to do.",
            alias_text.trim(),
            product.name
        );
    }

    pool.close().await;
    Ok(())
}

/// Run `aliases check`: report bidirectional-alias defects. Never fixes
/// them — resolving one requires deciding which product survives.
pub async fn run_check(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let pairs = dedup::find_bidirectional_aliases(&pool).await?;

    if pairs.is_empty() {
        println!("No bidirectional aliases. All aliases are unidirectional.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "{} bidirectional alias pair(s) found — these products should have been merged:",
        pairs.len()
    );
    for (idx, pair) in pairs.iter().enumerate() {
        println!();
        println!("{:>3}. {} [{}]", idx + 1, pair.product_a.name, pair.product_a.id);
        println!("       has alias '{}'", pair.alias_a);
        println!("     {} [{}]", pair.product_b.name, pair.product_b.id);
        println!("       has alias '{}'", pair.alias_b);
        println!(
            "     fix: folheto merge {} {}",
            pair.product_a.id, pair.product_b.id
        );
    }

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
