//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow per flyer image: record → extract → validate →
//! expand → resolve-or-create → persist prices → tally. Each image walks
//! the state machine `pending → {processed | error}`; per-product problems
//! are soft errors collected into the image's tally and never abort the
//! siblings, while an extraction or validation failure marks the whole
//! image `error` with no partial product commit.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::categories::CategoryMap;
use crate::config::Config;
use crate::db;
use crate::error;
use crate::expand::expand;
use crate::extract;
use crate::models::{ImageStatus, IngestStats, RawExtraction};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::resolver::resolve_or_create;

/// Image extensions the folder scan picks up.
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// Outcome of ingesting one image file.
pub enum ImageOutcome {
    /// An image with identical content was already processed.
    Skipped { existing_id: String },
    Ingested(IngestStats),
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let progress = ProgressMode::default_for_tty().reporter();

    progress.report(IngestProgressEvent::Scanning);
    let mut files = collect_images(path)?;
    if files.is_empty() {
        bail!("no supported images under {}", path.display());
    }

    if let Some(lim) = limit {
        files.truncate(lim);
    }

    if dry_run {
        println!("ingest {} (dry-run)", path.display());
        println!("  images found: {}", files.len());
        for file in &files {
            println!("  {}", file.display());
        }
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let category_map = CategoryMap::from_config(&config.categories);

    let single = files.len() == 1;
    let total = files.len() as u64;

    let mut images_ok = 0usize;
    let mut images_skipped = 0usize;
    let mut images_failed = 0usize;
    let mut products_new = 0usize;
    let mut products_existing = 0usize;
    let mut prices_saved = 0usize;
    let mut soft_errors = 0usize;

    for (idx, file) in files.iter().enumerate() {
        progress.report(IngestProgressEvent::Processing {
            n: idx as u64 + 1,
            total,
            file: file_name(file),
        });

        match ingest_image(&pool, config, &category_map, file).await {
            Ok(ImageOutcome::Ingested(stats)) => {
                images_ok += 1;
                products_new += stats.products_new;
                products_existing += stats.products_existing;
                prices_saved += stats.prices_saved;
                soft_errors += stats.errors.len();
                if single {
                    print_image_stats(file, &stats);
                }
            }
            Ok(ImageOutcome::Skipped { existing_id }) => {
                images_skipped += 1;
                println!(
                    "skipped {} (already processed as image {})",
                    file_name(file),
                    existing_id
                );
            }
            Err(e) => {
                // Single-item commands stop at the first fatal error; a
                // batch records it and moves on.
                if single {
                    pool.close().await;
                    return Err(e).with_context(|| format!("failed to ingest {}", file.display()));
                }
                images_failed += 1;
                eprintln!("error ingesting {}: {}", file_name(file), e);
            }
        }
    }

    if !single {
        println!("ingest {}", path.display());
        println!("  images processed: {}", images_ok);
        println!("  images skipped:   {}", images_skipped);
        println!("  images failed:    {}", images_failed);
        println!("  new products:     {}", products_new);
        println!("  known products:   {}", products_existing);
        println!("  prices saved:     {}", prices_saved);
        println!("  soft errors:      {}", soft_errors);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Ingest a single image through the full pipeline.
///
/// The image row is written up front with status `pending`; extraction or
/// validation failure flips it to `error` with the message and returns the
/// error. Per-product issues never do — they land in the returned tally.
pub async fn ingest_image(
    pool: &SqlitePool,
    config: &Config,
    category_map: &CategoryMap,
    path: &Path,
) -> error::Result<ImageOutcome> {
    let payload = extract::load_image(path)?;

    // Identical bytes already processed: nothing to do.
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM images WHERE content_hash = ? AND status = 'processed'")
            .bind(&payload.content_hash)
            .fetch_optional(pool)
            .await?;
    if let Some(existing_id) = existing {
        return Ok(ImageOutcome::Skipped { existing_id });
    }

    let image_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO images (id, file_name, file_path, content_hash, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&image_id)
    .bind(file_name(path))
    .bind(path.display().to_string())
    .bind(&payload.content_hash)
    .bind(ImageStatus::Pending.as_str())
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    let extraction = match extract::extract(&config.extraction, path, &payload).await {
        Ok(extraction) => extraction,
        Err(e) => {
            mark_image(pool, &image_id, ImageStatus::Error, None, Some(&e.to_string())).await?;
            return Err(e);
        }
    };

    if let Err(e) = extract::validate_extraction(&extraction) {
        mark_image(pool, &image_id, ImageStatus::Error, None, Some(&e.to_string())).await?;
        return Err(e);
    }

    let stats = persist_extraction(pool, config, category_map, &image_id, &extraction).await?;

    let raw_json = serde_json::to_string(&extraction).ok();
    mark_image(pool, &image_id, ImageStatus::Processed, raw_json.as_deref(), None).await?;
    sqlx::query("UPDATE images SET merchant_name = ?, flyer_date = ? WHERE id = ?")
        .bind(&extraction.merchant)
        .bind(&extraction.valid_from)
        .bind(&image_id)
        .execute(pool)
        .await?;

    Ok(ImageOutcome::Ingested(stats))
}

/// Persist every product line of a validated extraction: expand, resolve
/// or create, save the price observation. Soft-fails line by line.
async fn persist_extraction(
    pool: &SqlitePool,
    config: &Config,
    category_map: &CategoryMap,
    image_id: &str,
    extraction: &RawExtraction,
) -> error::Result<IngestStats> {
    let merchant_name = extraction
        .merchant
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&config.merchant.unknown_name);
    let merchant_id = upsert_merchant(pool, merchant_name, None, "", "").await?;

    let valid_from = parse_date(extraction.valid_from.as_deref());
    let valid_to = parse_date(extraction.valid_to.as_deref());

    let mut stats = IngestStats {
        image_id: image_id.to_string(),
        ..Default::default()
    };

    for (idx, raw) in extraction.products.iter().enumerate() {
        for part in expand(raw.clone(), &config.expansion.conjunction) {
            stats.products_seen += 1;

            if part.name.trim().is_empty() {
                stats.errors.push(format!("product {}: blank name", idx + 1));
                continue;
            }

            let price = match part.price {
                Some(p) if p >= 0.0 => p,
                Some(p) => {
                    stats
                        .errors
                        .push(format!("product '{}': negative price {}", part.name, p));
                    continue;
                }
                None => {
                    stats
                        .errors
                        .push(format!("product '{}': missing price", part.name));
                    continue;
                }
            };

            let (resolved, created) =
                resolve_or_create(pool, &part, category_map, config.resolver.threshold).await?;
            if created {
                stats.products_new += 1;
            } else {
                stats.products_existing += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO prices (id, product_id, merchant_id, image_id, price, original_price,
                                    on_promotion, valid_from, valid_to, unit, note, confidence, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&resolved.product.id)
            .bind(&merchant_id)
            .bind(image_id)
            .bind(price)
            .bind(part.original_price)
            .bind(part.on_promotion)
            .bind(valid_from.map(|d| d.to_string()))
            .bind(valid_to.map(|d| d.to_string()))
            .bind(&part.unit)
            .bind(&part.note)
            .bind(part.confidence)
            .bind(chrono::Utc::now().timestamp())
            .execute(pool)
            .await?;

            stats.prices_saved += 1;
        }
    }

    Ok(stats)
}

/// Find or create a merchant. Re-creating an existing (name, city, region)
/// updates the chain instead of duplicating the row.
pub async fn upsert_merchant(
    pool: &SqlitePool,
    name: &str,
    chain: Option<&str>,
    city: &str,
    region: &str,
) -> error::Result<String> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM merchants WHERE name = ? AND city = ? AND region = ?")
            .bind(name)
            .bind(city)
            .bind(region)
            .fetch_optional(pool)
            .await?;

    if let Some(id) = existing {
        if let Some(chain) = chain {
            sqlx::query("UPDATE merchants SET chain = ? WHERE id = ?")
                .bind(chain)
                .bind(&id)
                .execute(pool)
                .await?;
        }
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO merchants (id, name, chain, city, region, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(chain)
    .bind(city)
    .bind(region)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(id)
}

async fn mark_image(
    pool: &SqlitePool,
    image_id: &str,
    status: ImageStatus,
    raw_json: Option<&str>,
    error_message: Option<&str>,
) -> error::Result<()> {
    sqlx::query(
        "UPDATE images SET status = ?, raw_json = ?, error_message = ?, processed_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(raw_json)
    .bind(error_message)
    .bind(chrono::Utc::now().timestamp())
    .bind(image_id)
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_date(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(value = s, "unparseable flyer date, dropping");
            None
        }
    }
}

fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("path does not exist: {}", path.display());
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_image_stats(path: &Path, stats: &IngestStats) {
    println!("ingest {}", file_name(path));
    println!("  image id:       {}", stats.image_id);
    println!("  products seen:  {}", stats.products_seen);
    println!("  new products:   {}", stats.products_new);
    println!("  known products: {}", stats.products_existing);
    println!("  prices saved:   {}", stats.prices_saved);
    if !stats.errors.is_empty() {
        println!("  soft errors:    {}", stats.errors.len());
        for error in &stats.errors {
            println!("    - {}", error);
        }
    }
}
