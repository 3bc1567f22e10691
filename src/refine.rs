//! Post-processing passes over existing quote files.
//!
//! * [`refine_quotes`] polishes quotes in batches (model when available,
//!   local rules always) and keeps only the engaging ones.
//! * [`improve_quotes`] re-reads each quote's source paragraph with the smart
//!   analyser and swaps in a better span when one exists.

use crate::error::QuoteError;
use crate::pipeline::chunk::{collapse_whitespace, truncate_chars};
use crate::pipeline::dedup::dedup_quotes;
use crate::pipeline::llm::{CompletionRequest, LlmClient, ModelTier};
use crate::pipeline::smart::{self, has_bad_marker, QuoteQuality, ENGAGING_MAX_CHARS};
use crate::prompts;
use crate::quote::{Quote, QuoteFile};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Quotes sent to the model per refine call.
pub const DEFAULT_BATCH_SIZE: usize = 30;
const MIN_POLISHED_CHARS: usize = 30;
/// An alternative must beat this confidence to replace a quote.
const IMPROVE_MIN_CONFIDENCE: f64 = 0.6;
const IMPROVE_CONCURRENCY: usize = 4;

// ── Local polish ─────────────────────────────────────────────────────────

/// Normalise a quote without a model.
///
/// The text is taken from `quote`, else `translated`, else `original`,
/// whitespace-collapsed and cut to `max_chars`. Returns `None` for text
/// shorter than 30 chars, without a terminal `. ! ? …`, or with a
/// navigation/advertising marker.
pub fn local_polish(quote: &Quote, max_chars: usize) -> Option<Quote> {
    let source = [&quote.quote, &quote.translated, &quote.original]
        .into_iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())?;
    let collapsed = collapse_whitespace(source);
    let text = truncate_chars(&collapsed, max_chars).trim();

    if text.chars().count() < MIN_POLISHED_CHARS
        || !text.ends_with(['.', '!', '?', '…'])
        || has_bad_marker(text)
    {
        return None;
    }

    let mut out = quote.clone();
    out.quote = text.to_string();
    if out.translated.trim().is_empty() {
        out.translated = text.to_string();
    }
    if out.style.trim().is_empty() {
        out.style = "insight".to_string();
    }
    out.engaging = true;
    out.meta.length = Some(text.chars().count());
    Some(out)
}

fn polish_all(quotes: &[Quote]) -> Vec<Quote> {
    quotes
        .iter()
        .filter_map(|q| local_polish(q, ENGAGING_MAX_CHARS))
        .collect()
}

// ── Refine ───────────────────────────────────────────────────────────────

/// Shallow-merge the model's item over the original quote, field by field.
fn merge_item(base: &Quote, item: &Value) -> Quote {
    let (Ok(Value::Object(mut merged)), Some(fields)) =
        (serde_json::to_value(base), item.as_object())
    else {
        return base.clone();
    };
    for (k, v) in fields {
        merged.insert(k.clone(), v.clone());
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
        debug!("Refined item has unexpected shape, keeping original: {e}");
        base.clone()
    })
}

async fn refine_batch(client: &LlmClient, batch: &[Quote]) -> Result<Vec<Quote>, QuoteError> {
    let payload: Vec<Value> = batch
        .iter()
        .map(|q| {
            let mut item = serde_json::to_value(q).unwrap_or_else(|_| json!({}));
            let text = [&q.quote, &q.translated, &q.original]
                .into_iter()
                .find(|s| !s.trim().is_empty())
                .cloned()
                .unwrap_or_default();
            item["quote"] = json!(text);
            item["engaging"] = json!(true);
            item
        })
        .collect();
    let user = serde_json::to_string(&json!({ "quotes": payload }))
        .map_err(|e| QuoteError::json("refine payload", e))?;

    let request = CompletionRequest::new(prompts::REFINE_SYSTEM, user).temperature(0.2);
    let reply = client.complete_json(ModelTier::Fast, &request).await?;
    let items = reply
        .get("quotes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let base = batch.get(i).cloned().unwrap_or_default();
        let merged = merge_item(&base, item);
        if let Some(mut polished) = local_polish(&merged, ENGAGING_MAX_CHARS) {
            // The model may demote a weak quote.
            polished.engaging = item.get("engaging").and_then(Value::as_bool).unwrap_or(true);
            out.push(polished);
        }
    }
    Ok(out)
}

/// Polish `quotes` in batches of `batch_size` and keep the engaging ones,
/// de-duplicated.
///
/// Without a client, or when a batch call fails, that batch is polished
/// locally.
pub async fn refine_quotes(
    client: Option<&LlmClient>,
    quotes: &[Quote],
    batch_size: usize,
) -> Vec<Quote> {
    let batch_size = batch_size.max(1);
    let mut refined = Vec::with_capacity(quotes.len());

    for (n, batch) in quotes.chunks(batch_size).enumerate() {
        let polished = match client {
            Some(c) => match refine_batch(c, batch).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Refine batch {} failed, polishing locally: {e}", n + 1);
                    polish_all(batch)
                }
            },
            None => polish_all(batch),
        };
        debug!("Batch {}: {} of {} kept", n + 1, polished.len(), batch.len());
        refined.extend(polished.into_iter().filter(|q| q.engaging));
    }

    dedup_quotes(refined)
}

// ── Improve ──────────────────────────────────────────────────────────────

async fn improve_one(client: Option<&LlmClient>, quote: Quote) -> Quote {
    let analyses = smart::analyze_paragraph(client, &quote.original).await;
    let best = analyses
        .into_iter()
        .filter(|a| a.quality.is_publishable() && a.confidence > IMPROVE_MIN_CONFIDENCE)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut out = quote;
    match best {
        Some(a) => {
            out.engaging = a.quality == QuoteQuality::Excellent;
            out.quote = a.text.clone();
            out.translated = a.text.clone();
            out.summary = a.summary;
            out.category = a.category;
            out.meta.sentiment = Some(a.sentiment);
            out.meta.target_audience = Some(a.target_audience);
            out.meta.length = Some(a.text.chars().count());
            out.meta.confidence = Some(a.confidence);
            out.meta.context_score = Some(a.context_score);
            out.meta.practical_value = Some(a.practical_value);
            out.meta.completeness = Some(a.completeness);
            out.meta.quote_type = Some(a.quote_type);
            out.meta.reasoning = Some(a.reasoning);
            out.meta.improved = Some(true);
        }
        None => {
            out.meta.improved = Some(false);
            out.meta.reasoning = Some("No better alternative found".to_string());
        }
    }
    out
}

/// Re-analyse each quote's `original` paragraph and replace the quote with
/// the best excellent/good span above 0.6 confidence.
///
/// Quotes without `original` or `quote` text are dropped; the result is
/// de-duplicated.
pub async fn improve_quotes(client: Option<&LlmClient>, quotes: Vec<Quote>) -> Vec<Quote> {
    let candidates: Vec<Quote> = quotes
        .into_iter()
        .filter(|q| !q.original.trim().is_empty() && !q.quote.trim().is_empty())
        .collect();

    let improved: Vec<Quote> = stream::iter(candidates)
        .map(|q| improve_one(client, q))
        .buffered(IMPROVE_CONCURRENCY)
        .collect()
        .await;

    let changed = improved
        .iter()
        .filter(|q| q.meta.improved == Some(true))
        .count();
    info!("Improved {} of {} quotes", changed, improved.len());
    dedup_quotes(improved)
}

// ── File wrappers ────────────────────────────────────────────────────────

/// Refine a quote file; the result goes to `output`, or back to `input`.
pub async fn refine_file(
    client: Option<&LlmClient>,
    input: impl AsRef<Path>,
    output: Option<&Path>,
    batch_size: usize,
) -> Result<QuoteFile, QuoteError> {
    let input = input.as_ref();
    let file = QuoteFile::load(input).await?;
    let refined = refine_quotes(client, &file.quotes, batch_size).await;
    info!("Refined {} → {} quotes", file.quotes.len(), refined.len());

    let out = QuoteFile::new(file.book, refined);
    out.save(output.unwrap_or(input)).await?;
    Ok(out)
}

/// Improve a quote file; the result goes to `output`, or back to `input`.
pub async fn improve_file(
    client: Option<&LlmClient>,
    input: impl AsRef<Path>,
    output: Option<&Path>,
) -> Result<QuoteFile, QuoteError> {
    let input = input.as_ref();
    let file = QuoteFile::load(input).await?;
    let improved = improve_quotes(client, file.quotes).await;

    let out = QuoteFile::new(file.book, improved);
    out.save(output.unwrap_or(input)).await?;
    Ok(out)
}
