//! Database-backed tests for the resolution, dedup, and merge core.
//!
//! Each test runs against its own temporary SQLite database created through
//! the real migrations, exercising the library API the way the CLI does.

use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use folheto::aliases::insert_alias;
use folheto::categories::CategoryMap;
use folheto::config::Config;
use folheto::dedup::{find_bidirectional_aliases, find_candidates};
use folheto::ingest::upsert_merchant;
use folheto::merge::merge;
use folheto::models::{AliasOrigin, MatchStrategy, Product, RawProduct};
use folheto::normalize::normalize;
use folheto::resolver::{resolve, resolve_or_create};
use folheto::{db, migrate};

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let source = format!("[db]\npath = \"{}/folheto.sqlite\"\n", tmp.path().display());
    let config: Config = toml::from_str(&source).unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    (tmp, config, pool)
}

/// Insert a product row directly, bypassing the resolver, so tests control
/// exactly which identities exist.
async fn insert_product(pool: &SqlitePool, name: &str, brand: Option<&str>) -> Product {
    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        name_normalized: normalize(name),
        brand: brand.map(String::from),
        category_id: None,
        category_suggested: None,
        barcode: None,
        description: None,
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query(
        "INSERT INTO products (id, name, name_normalized, brand, category_id, category_suggested, barcode, description, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
    .await
    .unwrap();

    product
}

async fn add_alias(pool: &SqlitePool, product: &Product, alias: &str) {
    let mut conn = pool.acquire().await.unwrap();
    insert_alias(&mut conn, product, alias, AliasOrigin::Manual, 1.0, "test")
        .await
        .unwrap();
}

/// Attach a price observation, creating the merchant/image scaffolding the
/// foreign keys require.
async fn add_price(pool: &SqlitePool, product: &Product, price: f64) {
    let merchant_id = upsert_merchant(pool, "Mercado Teste", None, "", "")
        .await
        .unwrap();

    let image_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO images (id, file_name, file_path, content_hash, status, created_at)
         VALUES (?, 'f.jpg', '/f.jpg', ?, 'processed', ?)",
    )
    .bind(&image_id)
    .bind(Uuid::new_v4().to_string())
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO prices (id, product_id, merchant_id, image_id, price, on_promotion, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&product.id)
    .bind(&merchant_id)
    .bind(&image_id)
    .bind(price)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await
    .unwrap();
}

async fn price_count(pool: &SqlitePool, product_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM prices WHERE product_id = ?")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn alias_count(pool: &SqlitePool, product_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM product_aliases WHERE product_id = ?")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn raw(name: &str) -> RawProduct {
    RawProduct {
        name: name.to_string(),
        brand: None,
        category: None,
        price: Some(9.9),
        original_price: None,
        on_promotion: false,
        unit: None,
        note: None,
        confidence: None,
    }
}

// ---- resolver ----

#[tokio::test]
async fn resolve_exact_ignores_case_and_accents() {
    let (_tmp, _config, pool) = setup().await;
    let product = insert_product(&pool, "Abóbora Cabotiá", None).await;

    let resolved = resolve(&pool, "abobora cabotia", 0.85).await.unwrap().unwrap();
    assert_eq!(resolved.product.id, product.id);
    assert_eq!(resolved.strategy, MatchStrategy::Exact);
    assert!(resolved.similarity.is_none());
}

#[tokio::test]
async fn resolve_prefers_alias_exact_over_fuzzy() {
    let (_tmp, _config, pool) = setup().await;
    let product = insert_product(&pool, "Queijo Mussarela", None).await;
    add_alias(&pool, &product, "Queijo Mussarela Fatiado").await;

    // "queijo mussarela fatiado" is an exact alias hit; the fuzzy paths
    // must never get a chance to answer first.
    let resolved = resolve(&pool, "queijo mussarela fatiado", 0.85)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.product.id, product.id);
    assert_eq!(resolved.strategy, MatchStrategy::AliasExact);
}

#[tokio::test]
async fn resolve_falls_through_to_fuzzy_product() {
    let (_tmp, _config, pool) = setup().await;
    let product = insert_product(&pool, "Queijo Mussarela", None).await;

    // One edit away: "musarela".
    let resolved = resolve(&pool, "queijo musarela", 0.85).await.unwrap().unwrap();
    assert_eq!(resolved.product.id, product.id);
    assert_eq!(resolved.strategy, MatchStrategy::ProductFuzzy);
    let score = resolved.similarity.unwrap();
    assert!(score >= 0.85 && score < 1.0, "got {}", score);
}

#[tokio::test]
async fn resolve_fuzzy_alias_beats_fuzzy_product() {
    let (_tmp, _config, pool) = setup().await;
    let aliased = insert_product(&pool, "Contra Filé Bovino", None).await;
    add_alias(&pool, &aliased, "Contrafilé Bovino").await;
    insert_product(&pool, "Contrafilé Suíno", None).await;

    // "contrafile bovin" is a fuzzy hit on the alias; the alias layer runs
    // before product-name fuzzing.
    let resolved = resolve(&pool, "contrafile bovin", 0.85).await.unwrap().unwrap();
    assert_eq!(resolved.product.id, aliased.id);
    assert_eq!(resolved.strategy, MatchStrategy::AliasFuzzy);
}

#[tokio::test]
async fn resolve_returns_none_below_threshold() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Queijo Mussarela", None).await;

    assert!(resolve(&pool, "Produto Inventado XYZ", 0.85)
        .await
        .unwrap()
        .is_none());
    assert!(resolve(&pool, "", 0.85).await.unwrap().is_none());
}

#[tokio::test]
async fn resolve_is_read_only() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Queijo Mussarela", None).await;

    for _ in 0..3 {
        resolve(&pool, "queijo novo qualquer", 0.85).await.unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn resolve_or_create_creates_then_reuses() {
    let (_tmp, _config, pool) = setup().await;
    let map = CategoryMap::from_config(&Default::default());

    let (first, created) = resolve_or_create(&pool, &raw("Arroz Tio João"), &map, 0.85)
        .await
        .unwrap();
    assert!(created);

    let (second, created) = resolve_or_create(&pool, &raw("arroz tio joao"), &map, 0.85)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first.product.id, second.product.id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn normalized_name_unique_index_is_enforced() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Feijão Carioca", None).await;

    // A second identity with the same normalized name must be rejected by
    // the store; this is the backstop for the resolve-then-create race.
    let result = sqlx::query(
        "INSERT INTO products (id, name, name_normalized, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind("FEIJÃO Carioca")
    .bind(normalize("FEIJÃO Carioca"))
    .bind(chrono::Utc::now().timestamp())
    .execute(&pool)
    .await;

    assert!(result.is_err());
}

// ---- duplicate detector ----

#[tokio::test]
async fn detector_reports_near_duplicates_descending() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Queijo Mussarela", None).await;
    insert_product(&pool, "Queijo Musarela", None).await;
    insert_product(&pool, "Queijo Mussarella", None).await;
    insert_product(&pool, "Presunto Cozido", None).await;

    let candidates = find_candidates(&pool, 0.80, (1, 3), 100).await.unwrap();

    assert!(!candidates.is_empty());
    for pair in candidates.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    for c in &candidates {
        assert!(c.similarity >= 0.80);
        assert!((1..=3).contains(&c.distance));
        // i < j ordering means a pair never shows up twice
        assert_ne!(c.product_a.id, c.product_b.id);
    }
}

#[tokio::test]
async fn detector_brand_filter_is_a_hard_precondition() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Ketchup Tradicional", Some("BrandX")).await;
    insert_product(&pool, "Ketchup Tradiciona", Some("BrandY")).await;

    let candidates = find_candidates(&pool, 0.80, (1, 3), 100).await.unwrap();
    assert!(
        candidates.is_empty(),
        "differing brands must never pair: {:?}",
        candidates
    );
}

#[tokio::test]
async fn detector_pairs_same_brand_and_absent_brands() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Ketchup Tradicional", Some("BrandX")).await;
    insert_product(&pool, "Ketchup Tradiciona", Some("brandx")).await;
    insert_product(&pool, "Molho de Tomate", None).await;
    insert_product(&pool, "Molho de Tomatee", None).await;

    let candidates = find_candidates(&pool, 0.80, (1, 3), 100).await.unwrap();
    assert_eq!(candidates.len(), 2);
}

#[tokio::test]
async fn detector_respects_distance_band() {
    let (_tmp, _config, pool) = setup().await;
    // Distance 4, but still 0.84 similar on a 25-char name: outside the
    // default band, so not reported.
    insert_product(&pool, "Refrigerante de Guaraná 2L", None).await;
    insert_product(&pool, "Refrigerante de Guaraná 600ml", None).await;

    let banded = find_candidates(&pool, 0.70, (1, 3), 100).await.unwrap();
    assert!(banded.is_empty());

    let wide = find_candidates(&pool, 0.70, (1, 10), 100).await.unwrap();
    assert_eq!(wide.len(), 1);
}

#[tokio::test]
async fn detector_never_mutates() {
    let (_tmp, _config, pool) = setup().await;
    insert_product(&pool, "Queijo Mussarela", None).await;
    insert_product(&pool, "Queijo Musarela", None).await;

    find_candidates(&pool, 0.80, (1, 3), 100).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

// ---- merge engine ----

#[tokio::test]
async fn merge_moves_prices_and_removes_discard() {
    let (_tmp, config, pool) = setup().await;
    let keep = insert_product(&pool, "Picanha Bovina", None).await;
    let discard = insert_product(&pool, "Picanha Bovinna", None).await;
    add_price(&pool, &keep, 59.9).await;
    add_price(&pool, &discard, 54.9).await;
    add_price(&pool, &discard, 49.9).await;

    let result = merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap();

    assert_eq!(result.prices_moved, 2);
    assert_eq!(price_count(&pool, &keep.id).await, 3);
    assert_eq!(price_count(&pool, &discard.id).await, 0);

    let gone: Option<String> = sqlx::query_scalar("SELECT id FROM products WHERE id = ?")
        .bind(&discard.id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(gone.is_none());

    // The discarded display name lives on as an alias of the survivor.
    let alias: Option<String> = sqlx::query_scalar(
        "SELECT alias FROM product_aliases WHERE product_id = ? AND alias_normalized = ?",
    )
    .bind(&keep.id)
    .bind(normalize(&discard.name))
    .fetch_optional(&pool)
    .await
    .unwrap();
    assert_eq!(alias.as_deref(), Some("Picanha Bovinna"));
}

#[tokio::test]
async fn merge_again_fails_with_not_found() {
    let (_tmp, config, pool) = setup().await;
    let keep = insert_product(&pool, "Picanha Bovina", None).await;
    let discard = insert_product(&pool, "Picanha Bovinna", None).await;
    add_price(&pool, &discard, 54.9).await;

    merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap();

    let err = merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // The failed re-merge corrupted nothing.
    assert_eq!(price_count(&pool, &keep.id).await, 1);
}

#[tokio::test]
async fn merge_refuses_self_merge() {
    let (_tmp, config, pool) = setup().await;
    let product = insert_product(&pool, "Picanha Bovina", None).await;

    let err = merge(&pool, &product.id, &product.id, &config.merge.backfill_fields)
        .await
        .unwrap_err();
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn merge_backfills_only_empty_fields() {
    let (_tmp, config, pool) = setup().await;
    let keep = insert_product(&pool, "Azeite Extra Virgem", Some("Gallo")).await;
    let discard = insert_product(&pool, "Azeite Extra Virgen", Some("Andorinha")).await;
    sqlx::query("UPDATE products SET description = 'lata 500ml' WHERE id = ?")
        .bind(&discard.id)
        .execute(&pool)
        .await
        .unwrap();

    let result = merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap();

    // description was empty on keep -> filled; brand was populated -> kept.
    assert_eq!(result.fields_backfilled, vec!["description"]);

    let (brand, description): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT brand, description FROM products WHERE id = ?")
            .bind(&keep.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(brand.as_deref(), Some("Gallo"));
    assert_eq!(description.as_deref(), Some("lata 500ml"));
}

#[tokio::test]
async fn merge_drops_discard_aliases_and_dedups_new_one() {
    let (_tmp, config, pool) = setup().await;
    let keep = insert_product(&pool, "Abóbora Cabotiá", None).await;
    let discard = insert_product(&pool, "Abóbora Kabotiá", None).await;
    // The bidirectional defect: each aliased to the other.
    add_alias(&pool, &keep, "Abóbora Kabotiá").await;
    add_alias(&pool, &discard, "Abóbora Cabotiá").await;

    let pairs = find_bidirectional_aliases(&pool).await.unwrap();
    assert_eq!(pairs.len(), 1);

    let result = merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap();

    // keep already had "Abóbora Kabotiá": the merge-inserted alias is a
    // no-op, not a duplicate.
    assert!(!result.alias_created);
    assert_eq!(result.aliases_dropped, 1);
    assert_eq!(alias_count(&pool, &keep.id).await, 1);
    assert_eq!(alias_count(&pool, &discard.id).await, 0);

    // Defect resolved.
    assert!(find_bidirectional_aliases(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn bidirectional_detector_reports_each_pair_once() {
    let (_tmp, _config, pool) = setup().await;
    let a = insert_product(&pool, "Produto Alfa", None).await;
    let b = insert_product(&pool, "Produto Beta", None).await;
    let c = insert_product(&pool, "Produto Gama", None).await;
    add_alias(&pool, &a, "Produto Beta").await;
    add_alias(&pool, &b, "Produto Alfa").await;
    // One-directional alias: c -> a only. Not a defect.
    add_alias(&pool, &c, "Produto Alfa").await;

    let pairs = find_bidirectional_aliases(&pool).await.unwrap();
    assert_eq!(pairs.len(), 1);
    let pair = &pairs[0];
    let mut ids = [pair.product_a.id.as_str(), pair.product_b.id.as_str()];
    ids.sort();
    let mut expected = [a.id.as_str(), b.id.as_str()];
    expected.sort();
    assert_eq!(ids, expected);
}

// ---- alias store ----

#[tokio::test]
async fn alias_insert_is_idempotent_and_skips_redundant() {
    let (_tmp, _config, pool) = setup().await;
    let product = insert_product(&pool, "Queijo Mussarela", None).await;
    let mut conn = pool.acquire().await.unwrap();

    let created = insert_alias(
        &mut conn,
        &product,
        "Queijo Mussarela Fatiado",
        AliasOrigin::Llm,
        0.9,
        "test",
    )
    .await
    .unwrap();
    assert!(created);

    // Same normalized alias again: no-op, not an error.
    let created = insert_alias(
        &mut conn,
        &product,
        "QUEIJO MUSSARELA FATIADO",
        AliasOrigin::Llm,
        0.9,
        "test",
    )
    .await
    .unwrap();
    assert!(!created);

    // The product's own name is never stored as an alias of itself.
    let created = insert_alias(
        &mut conn,
        &product,
        "queijo mussarela",
        AliasOrigin::Auto,
        1.0,
        "test",
    )
    .await
    .unwrap();
    assert!(!created);

    drop(conn);
    assert_eq!(alias_count(&pool, &product.id).await, 1);
}

#[tokio::test]
async fn aliases_are_destroyed_with_their_product() {
    let (_tmp, config, pool) = setup().await;
    let keep = insert_product(&pool, "Alcatra Bovina", None).await;
    let discard = insert_product(&pool, "Alcatra Bovinna", None).await;
    add_alias(&pool, &discard, "Alcatra Maturada").await;
    add_alias(&pool, &discard, "Alcatra Especial").await;

    merge(&pool, &keep.id, &discard.id, &config.merge.backfill_fields)
        .await
        .unwrap();

    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM product_aliases WHERE product_id NOT IN (SELECT id FROM products)",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0);
}
