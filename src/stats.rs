//! Database statistics and health overview.
//!
//! Provides a quick summary of what's stored: product, merchant, price and
//! image counts, alias provenance, and how many duplicate candidates are
//! still waiting for review. Used by `folheto stats` to give confidence
//! that ingestion and de-duplication are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::dedup;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await?;
    let total_merchants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merchants")
        .fetch_one(&pool)
        .await?;
    let total_prices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prices")
        .fetch_one(&pool)
        .await?;
    let total_aliases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_aliases")
        .fetch_one(&pool)
        .await?;
    let total_promotions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM prices WHERE on_promotion = 1")
            .fetch_one(&pool)
            .await?;
    let avg_price: Option<f64> = sqlx::query_scalar("SELECT AVG(price) FROM prices")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("folheto — Database Stats");
    println!("========================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Products:   {}", total_products);
    println!("  Merchants:  {}", total_merchants);
    println!("  Prices:     {}", total_prices);
    println!("  Promotions: {}", total_promotions);
    println!("  Aliases:    {}", total_aliases);
    if let Some(avg) = avg_price {
        println!("  Avg price:  R$ {:.2}", avg);
    }

    // Image pipeline state
    let image_rows = sqlx::query(
        "SELECT status, COUNT(*) AS count FROM images GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await?;

    if !image_rows.is_empty() {
        println!();
        println!("  Images by status:");
        for row in &image_rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            println!("    {:<10} {}", status, count);
        }
    }

    // Alias provenance
    let origin_rows = sqlx::query(
        "SELECT origin, COUNT(*) AS count FROM product_aliases GROUP BY origin ORDER BY count DESC",
    )
    .fetch_all(&pool)
    .await?;

    if !origin_rows.is_empty() {
        println!();
        println!("  Aliases by origin:");
        for row in &origin_rows {
            let origin: String = row.get("origin");
            let count: i64 = row.get("count");
            println!("    {:<10} {}", origin, count);
        }
    }

    // Products with the most aliases
    let alias_rows = sqlx::query(
        r#"
        SELECT p.name, COUNT(a.id) AS alias_count
        FROM products p
        JOIN product_aliases a ON a.product_id = p.id
        GROUP BY p.id, p.name
        ORDER BY alias_count DESC, p.name ASC
        LIMIT 5
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !alias_rows.is_empty() {
        println!();
        println!("  Most aliased products:");
        for row in &alias_rows {
            let name: String = row.get("name");
            let count: i64 = row.get("alias_count");
            println!("    {:<32} {}", name, count);
        }
    }

    // Duplicates still waiting for review
    let band = (config.dedup.distance_min, config.dedup.distance_max);
    let pending =
        dedup::find_candidates(&pool, config.dedup.min_similarity, band, config.dedup.limit)
            .await?
            .len();
    println!();
    println!(
        "  Duplicate candidates (similarity >= {}): {}",
        config.dedup.min_similarity, pending
    );

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
