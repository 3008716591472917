//! Vision-LLM extraction collaborator.
//!
//! Turns a flyer image into a [`RawExtraction`] by calling a vision-capable
//! model. Concrete providers:
//! - **openai** — GPT-4o via the chat completions API with an `image_url` part.
//! - **anthropic** — Claude via the messages API with a base64 image block.
//! - **gemini** — Gemini via `generateContent` with inline image data.
//! - **fixture** — reads a `<image>.json` sidecar; for development and tests.
//! - **disabled** — always returns an error; used when extraction is not configured.
//!
//! The rest of the system treats this module as opaque: it either produces a
//! payload that passes [`validate_extraction`] or a typed error. Transient
//! HTTP failures (429, 5xx, network) are retried with linear backoff
//! (`attempt * 2s`) up to a small configured cap; anything left after that
//! surfaces as [`Error::ExternalService`].

use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::models::RawExtraction;

/// Prompt sent with every flyer image. Kept as a module constant and passed
/// into the request builders explicitly.
const EXTRACTION_PROMPT: &str = r#"Você é um extrator de dados de panfletos de supermercado.

Analise a imagem e extraia TODOS os produtos com preços visíveis.

REGRAS:
1. Extraia todos os produtos visíveis, com valores exatos
2. Identifique promoções (preço normal vs promocional)
3. Capture o período de validade quando disponível
4. Identifique unidades de medida (kg, un, l, pct)
5. Identifique o supermercado se possível

Responda APENAS com JSON neste formato, sem texto antes ou depois:
{
  "merchant": "nome do supermercado ou null",
  "valid_from": "YYYY-MM-DD ou null",
  "valid_to": "YYYY-MM-DD ou null",
  "products": [
    {
      "name": "nome do produto",
      "brand": "marca ou null",
      "category": "categoria (Carnes, Bebidas, ...) ou null",
      "price": 29.90,
      "original_price": 35.90,
      "on_promotion": true,
      "unit": "kg",
      "note": "informação extra ou null",
      "confidence": 0.95
    }
  ]
}"#;

/// Image bytes plus the metadata the pipeline needs to record them.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_hash: String,
    pub media_type: &'static str,
}

/// Read an image from disk and hash its content. Loading is all this does;
/// resizing is out of scope for this tool.
pub fn load_image(path: &Path) -> Result<ImagePayload> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::ExternalService(format!("failed to read {}: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = format!("{:x}", hasher.finalize());

    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    };

    Ok(ImagePayload {
        bytes,
        content_hash,
        media_type,
    })
}

/// Extract structured flyer data from an image using the configured provider.
pub async fn extract(
    config: &ExtractionConfig,
    image_path: &Path,
    payload: &ImagePayload,
) -> Result<RawExtraction> {
    match config.provider.as_str() {
        "openai" => extract_openai(config, payload).await,
        "anthropic" => extract_anthropic(config, payload).await,
        "gemini" => extract_gemini(config, payload).await,
        "fixture" => extract_fixture(image_path),
        "disabled" => Err(Error::ExternalService(
            "extraction provider is disabled".to_string(),
        )),
        other => Err(Error::ExternalService(format!(
            "unknown extraction provider: {}",
            other
        ))),
    }
}

/// Validate the shape of an extraction before trusting it.
///
/// Image-level check only: the product list must be non-empty. Per-product
/// problems (blank name, invalid price) are soft errors handled by the
/// ingestion pipeline so one bad line never sinks its siblings.
pub fn validate_extraction(raw: &RawExtraction) -> Result<()> {
    if raw.products.is_empty() {
        return Err(Error::Validation("no products in extraction".to_string()));
    }
    Ok(())
}

/// Parse a model response into a [`RawExtraction`].
///
/// Models wrap JSON in markdown fences or prose often enough that this
/// strips ```json fences first, tries a direct parse, then falls back to
/// the outermost brace pair.
pub fn parse_extraction(text: &str) -> Result<RawExtraction> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(parsed) = serde_json::from_str::<RawExtraction>(cleaned) {
        return Ok(parsed);
    }

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<RawExtraction>(&cleaned[start..=end])
                .map_err(|e| Error::Validation(format!("invalid extraction JSON: {}", e)))
        }
        _ => Err(Error::Validation(
            "no JSON object in extraction response".to_string(),
        )),
    }
}

// ============ Fixture provider ============

/// Read the extraction from a `<image>.json` sidecar file. Lets the full
/// pipeline run in tests and local development without network calls.
fn extract_fixture(image_path: &Path) -> Result<RawExtraction> {
    let mut sidecar = image_path.as_os_str().to_owned();
    sidecar.push(".json");
    let sidecar = Path::new(&sidecar);

    let text = std::fs::read_to_string(sidecar).map_err(|e| {
        Error::ExternalService(format!("fixture {} unreadable: {}", sidecar.display(), e))
    })?;

    parse_extraction(&text)
}

// ============ HTTP providers ============

fn http_client(config: &ExtractionConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::ExternalService(e.to_string()))
}

fn api_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| Error::ExternalService(format!("{} not set", var)))
}

fn model_name(config: &ExtractionConfig) -> Result<&str> {
    config
        .model
        .as_deref()
        .ok_or_else(|| Error::ExternalService("extraction.model required".to_string()))
}

/// POST a JSON body with linear-backoff retry, returning the response JSON.
///
/// Retry policy: 429 and 5xx and network errors retry after `attempt * 2s`;
/// other 4xx fail immediately.
async fn post_with_retry(
    config: &ExtractionConfig,
    build: impl Fn() -> reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let mut last_err: Option<Error> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(2 * attempt as u64);
            debug!(attempt, ?delay, "retrying extraction call");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| Error::ExternalService(e.to_string()));
                }

                let body = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(%status, "extraction call failed, will retry");
                    last_err = Some(Error::ExternalService(format!(
                        "extraction API error {}: {}",
                        status, body
                    )));
                    continue;
                }

                return Err(Error::ExternalService(format!(
                    "extraction API error {}: {}",
                    status, body
                )));
            }
            Err(e) => {
                warn!(error = %e, "extraction call failed, will retry");
                last_err = Some(Error::ExternalService(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::ExternalService("extraction failed after retries".to_string())))
}

async fn extract_openai(config: &ExtractionConfig, payload: &ImagePayload) -> Result<RawExtraction> {
    let key = api_key("OPENAI_API_KEY")?;
    let model = model_name(config)?;
    let client = http_client(config)?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(&payload.bytes);
    let body = json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": EXTRACTION_PROMPT },
                { "type": "image_url", "image_url": {
                    "url": format!("data:{};base64,{}", payload.media_type, b64)
                }}
            ]
        }],
        "max_tokens": 4096,
        "temperature": 0.2,
    });

    let json = post_with_retry(config, || {
        client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", key))
            .json(&body)
    })
    .await?;

    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ExternalService("OpenAI response missing content".to_string()))?;

    parse_extraction(text)
}

async fn extract_anthropic(
    config: &ExtractionConfig,
    payload: &ImagePayload,
) -> Result<RawExtraction> {
    let key = api_key("ANTHROPIC_API_KEY")?;
    let model = model_name(config)?;
    let client = http_client(config)?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(&payload.bytes);
    let body = json!({
        "model": model,
        "max_tokens": 4096,
        "temperature": 0.2,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image", "source": {
                    "type": "base64",
                    "media_type": payload.media_type,
                    "data": b64
                }},
                { "type": "text", "text": EXTRACTION_PROMPT }
            ]
        }],
    });

    let json = post_with_retry(config, || {
        client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", key.clone())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
    })
    .await?;

    let text = json
        .pointer("/content/0/text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ExternalService("Anthropic response missing text".to_string()))?;

    parse_extraction(text)
}

async fn extract_gemini(config: &ExtractionConfig, payload: &ImagePayload) -> Result<RawExtraction> {
    let key = api_key("GEMINI_API_KEY")?;
    let model = model_name(config)?;
    let client = http_client(config)?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(&payload.bytes);
    let body = json!({
        "contents": [{
            "parts": [
                { "text": EXTRACTION_PROMPT },
                { "inline_data": { "mime_type": payload.media_type, "data": b64 }}
            ]
        }],
        "generationConfig": { "temperature": 0.2, "maxOutputTokens": 8192 },
    });

    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
        model, key
    );

    let json = post_with_retry(config, || client.post(&url).json(&body)).await?;

    let text = json
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ExternalService("Gemini response missing text".to_string()))?;

    parse_extraction(text)
}
