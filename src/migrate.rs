use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::categories::CategoryMap;
use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Products: the identity that prices attach to. The unique index on
    // name_normalized is the backstop against two writers creating the same
    // product concurrently; losers re-resolve.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL UNIQUE,
            brand TEXT,
            category_id TEXT REFERENCES categories(id),
            category_suggested TEXT,
            barcode TEXT,
            description TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Aliases are owned by their product; duplicate normalized aliases per
    // product are a no-op on insert, enforced here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_aliases (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            alias TEXT NOT NULL,
            alias_normalized TEXT NOT NULL,
            origin TEXT NOT NULL DEFAULT 'auto',
            confidence REAL NOT NULL DEFAULT 1.0,
            created_by TEXT NOT NULL DEFAULT 'system',
            created_at INTEGER NOT NULL,
            UNIQUE(product_id, alias_normalized)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Merchants: city/region use '' for unknown so the uniqueness key works
    // under SQLite NULL semantics. Re-creating an existing merchant updates
    // the chain instead of duplicating.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            chain TEXT,
            city TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(name, city, region)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            merchant_name TEXT,
            flyer_date TEXT,
            raw_json TEXT,
            error_message TEXT,
            processed_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Price observations: immutable except for product_id, which only the
    // merge engine re-points.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prices (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id),
            merchant_id TEXT NOT NULL REFERENCES merchants(id),
            image_id TEXT NOT NULL REFERENCES images(id),
            price REAL NOT NULL,
            original_price REAL,
            on_promotion INTEGER NOT NULL DEFAULT 0,
            valid_from TEXT,
            valid_to TEXT,
            unit TEXT,
            note TEXT,
            confidence REAL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_aliases_normalized ON product_aliases(alias_normalized)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prices_product_id ON prices(product_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prices_merchant_id ON prices(merchant_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_status ON images(status)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_content_hash ON images(content_hash)")
        .execute(&pool)
        .await?;

    seed_categories(&pool, config).await?;

    pool.close().await;
    Ok(())
}

/// Insert every canonical category from the configured map. Idempotent:
/// existing names are left untouched.
async fn seed_categories(pool: &SqlitePool, config: &Config) -> Result<()> {
    let map = CategoryMap::from_config(&config.categories);

    for name in map.canonical_names() {
        sqlx::query("INSERT INTO categories (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}
