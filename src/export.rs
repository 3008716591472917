//! CSV export of price observations.
//!
//! Produces one row per price with its product, merchant, and validity
//! window — the flat shape spreadsheet users expect. Written to a file
//! with `--output`, otherwise to stdout for piping.

use anyhow::Result;
use sqlx::Row;
use std::path::Path;

use crate::config::Config;
use crate::db;

const HEADER: &[&str] = &[
    "product",
    "brand",
    "category",
    "price",
    "original_price",
    "on_promotion",
    "merchant",
    "valid_from",
    "valid_to",
    "unit",
    "created_at",
];

pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT
            p.name AS product,
            p.brand,
            c.name AS category,
            pr.price,
            pr.original_price,
            pr.on_promotion,
            m.name AS merchant,
            pr.valid_from,
            pr.valid_to,
            pr.unit,
            pr.created_at
        FROM prices pr
        JOIN products p ON p.id = pr.product_id
        JOIN merchants m ON m.id = pr.merchant_id
        LEFT JOIN categories c ON c.id = p.category_id
        ORDER BY pr.created_at DESC, pr.id ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut csv = String::new();
    csv.push_str(&HEADER.join(","));
    csv.push('\n');

    for row in &rows {
        let fields: Vec<String> = vec![
            csv_field(&row.get::<String, _>("product")),
            csv_field(row.get::<Option<String>, _>("brand").as_deref().unwrap_or("")),
            csv_field(
                row.get::<Option<String>, _>("category")
                    .as_deref()
                    .unwrap_or(""),
            ),
            format!("{:.2}", row.get::<f64, _>("price")),
            row.get::<Option<f64>, _>("original_price")
                .map(|p| format!("{:.2}", p))
                .unwrap_or_default(),
            if row.get::<bool, _>("on_promotion") { "true" } else { "false" }.to_string(),
            csv_field(&row.get::<String, _>("merchant")),
            row.get::<Option<String>, _>("valid_from").unwrap_or_default(),
            row.get::<Option<String>, _>("valid_to").unwrap_or_default(),
            csv_field(row.get::<Option<String>, _>("unit").as_deref().unwrap_or("")),
            format_ts_iso(row.get::<i64, _>("created_at")),
        ];
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &csv)?;
            eprintln!("Exported {} price(s) to {}", rows.len(), path.display());
        }
        None => {
            print!("{}", csv);
        }
    }

    pool.close().await;
    Ok(())
}

/// Minimal RFC 4180 quoting: wrap in quotes when the value contains a
/// comma, quote, or newline; double embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_plain() {
        assert_eq!(csv_field("Arroz Tio João"), "Arroz Tio João");
    }

    #[test]
    fn test_csv_field_comma_quoted() {
        assert_eq!(csv_field("Arroz, tipo 1"), "\"Arroz, tipo 1\"");
    }

    #[test]
    fn test_csv_field_embedded_quotes_doubled() {
        assert_eq!(csv_field("Suco \"Natural\""), "\"Suco \"\"Natural\"\"\"");
    }
}
