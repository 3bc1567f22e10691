//! Structured candidate extraction, topic inference and translation.
//!
//! These are the LLM steps of the structured strategy. Each one degrades
//! instead of failing when no model is configured:
//!
//! | step | with LLM | without |
//! |------|----------|---------|
//! | [`infer_topic`] | fast model, accepted at confidence ≥ 0.7 | file-name guess |
//! | [`extract_from_chunk`] | smart model, JSON quotes | first 200 chars of the chunk |
//! | [`translate`] | smart model | text unchanged |

use crate::error::{ChunkError, QuoteError};
use crate::pipeline::chunk::truncate_chars;
use crate::pipeline::llm::{parse_json_response, CompletionRequest, LlmClient, ModelTier};
use crate::prompts;
use crate::quote::Quote;
use serde_json::Value;
use tracing::{debug, warn};

/// Minimum model confidence for an inferred topic.
pub const TOPIC_MIN_CONFIDENCE: f64 = 0.7;
/// Longest text sample sent for topic inference.
const TOPIC_SAMPLE_CHARS: usize = 3000;
/// Offline fallback quote length.
pub const FALLBACK_QUOTE_CHARS: usize = 200;
/// Offline fallback summary length, before the ellipsis.
const FALLBACK_SUMMARY_CHARS: usize = 100;

// ── Topic ────────────────────────────────────────────────────────────────

/// Ask the fast model for the book topic; return `fallback` when there is
/// no client, the call fails, or the model is unsure.
pub async fn infer_topic(client: Option<&LlmClient>, sample: &str, fallback: &str) -> String {
    let Some(client) = client else {
        return fallback.to_string();
    };
    if sample.trim().is_empty() {
        return fallback.to_string();
    }

    let request = CompletionRequest::new(
        prompts::TOPIC_SYSTEM,
        prompts::topic_user(truncate_chars(sample, TOPIC_SAMPLE_CHARS)),
    )
    .temperature(0.0)
    .max_tokens(100);

    match client.complete_json(ModelTier::Fast, &request).await {
        Ok(v) => {
            let topic = v.get("topic").and_then(Value::as_str).map(str::trim);
            let confidence = v.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            match topic {
                Some(t) if !t.is_empty() && confidence >= TOPIC_MIN_CONFIDENCE => t.to_lowercase(),
                _ => {
                    debug!("Topic guess rejected (confidence {confidence:.2})");
                    fallback.to_string()
                }
            }
        }
        Err(e) => {
            warn!("Topic inference failed, using '{fallback}': {e}");
            fallback.to_string()
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Where a chunk sits in the book, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPos {
    /// 1-indexed page.
    pub page: usize,
    /// 1-indexed chunk across the book.
    pub chunk: usize,
}

/// Candidate quotes for one chunk.
///
/// With no client the chunk itself becomes a single candidate, so offline
/// runs still flow through validation.
pub async fn extract_from_chunk(
    client: Option<&LlmClient>,
    chunk: &str,
    pos: ChunkPos,
    topic: &str,
    audience: &str,
) -> Result<Vec<Quote>, ChunkError> {
    let Some(client) = client else {
        return Ok(vec![fallback_quote(chunk, pos.page)]);
    };

    let request = CompletionRequest::new(prompts::extract_quotes_system(topic, audience), chunk)
        .temperature(0.3)
        .max_tokens(2048)
        .json();

    let reply = client
        .complete(ModelTier::Smart, &request)
        .await
        .map_err(|e| chunk_error(e, pos, client))?;

    let Some(value) = parse_json_response(&reply.content) else {
        return Err(ChunkError::BadResponse {
            page: pos.page,
            chunk: pos.chunk,
        });
    };

    let quotes: Vec<Quote> = value
        .get("quotes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| quote_from_item(item, chunk, pos.page))
                .collect()
        })
        .unwrap_or_default();
    debug!("Chunk {} (page {}): {} candidates", pos.chunk, pos.page, quotes.len());
    Ok(quotes)
}

fn chunk_error(e: QuoteError, pos: ChunkPos, client: &LlmClient) -> ChunkError {
    match e {
        QuoteError::LlmTimeout { secs } => ChunkError::Timeout {
            page: pos.page,
            chunk: pos.chunk,
            secs,
        },
        other => ChunkError::LlmFailed {
            page: pos.page,
            chunk: pos.chunk,
            retries: client.max_retries(),
            detail: other.to_string(),
        },
    }
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// One `{"quote": …}` item of an extraction reply. Items without text are
/// dropped.
fn quote_from_item(item: &Value, chunk: &str, page: usize) -> Option<Quote> {
    let text = str_field(item, "quote")?;
    let mut q = Quote::new(text);
    q.page = Some(page);
    q.original = chunk.to_string();
    q.summary = str_field(item, "summary").unwrap_or_default().to_string();
    if let Some(c) = str_field(item, "category") {
        q.category = c.to_string();
    }
    if let Some(s) = str_field(item, "style") {
        q.style = s.to_string();
    }
    q.meta.target_audience = Some(
        str_field(item, "target_audience")
            .unwrap_or("general")
            .to_string(),
    );
    q.meta.practical_value = item
        .get("practical_value")
        .and_then(Value::as_f64)
        .map(|v| v.clamp(0.0, 1.0));
    Some(q)
}

/// The chunk as its own quote: first 200 chars, summary of the first 100.
pub fn fallback_quote(chunk: &str, page: usize) -> Quote {
    let chunk = chunk.trim();
    let summary = if chunk.chars().count() > FALLBACK_SUMMARY_CHARS {
        format!("{}...", truncate_chars(chunk, FALLBACK_SUMMARY_CHARS))
    } else {
        chunk.to_string()
    };
    let mut q = Quote::new(truncate_chars(chunk, FALLBACK_QUOTE_CHARS).trim_end());
    q.page = Some(page);
    q.original = chunk.to_string();
    q.summary = summary;
    q.meta.target_audience = Some("general".to_string());
    q.meta.practical_value = Some(0.5);
    q
}

// ── Translation ──────────────────────────────────────────────────────────

/// Share of Cyrillic among Latin + Cyrillic letters; `None` without letters.
pub fn cyrillic_ratio(text: &str) -> Option<f64> {
    let mut cyr = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё') {
            cyr += 1;
            total += 1;
        } else if c.is_ascii_alphabetic() {
            total += 1;
        }
    }
    (total > 0).then(|| cyr as f64 / total as f64)
}

/// True when `text` is already mostly written in `language` (only Russian
/// and English are recognised).
pub fn is_in_language(text: &str, language: &str) -> bool {
    match (cyrillic_ratio(text), language.to_lowercase().as_str()) {
        (Some(r), "ru") => r > 0.5,
        (Some(r), "en") => r < 0.5,
        _ => false,
    }
}

/// Translate `text` into `language`. The input comes back unchanged when it
/// is empty, already in that language, there is no client, or the call
/// fails.
pub async fn translate(client: Option<&LlmClient>, text: &str, topic: &str, language: &str) -> String {
    if text.trim().is_empty() || is_in_language(text, language) {
        return text.to_string();
    }
    let Some(client) = client else {
        return text.to_string();
    };

    let request = CompletionRequest::new(prompts::translate_system(language, topic), text)
        .temperature(0.2);
    match client.complete(ModelTier::Smart, &request).await {
        Ok(reply) if !reply.content.trim().is_empty() => reply.content.trim().to_string(),
        Ok(_) => text.to_string(),
        Err(e) => {
            warn!("Translation failed, keeping original text: {e}");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHUNK: &str = "Каждая воронка продаж начинается с понятного обещания результата. \
                         Клиент должен за три секунды понять, что он получит и почему это важно. \
                         Если обещание размыто, никакой трафик не спасёт кампанию.";

    #[tokio::test]
    async fn offline_extraction_yields_fallback_quote() {
        let pos = ChunkPos { page: 4, chunk: 1 };
        let quotes = extract_from_chunk(None, CHUNK, pos, "sales", prompts::DEFAULT_AUDIENCE)
            .await
            .unwrap();
        assert_eq!(quotes.len(), 1);
        let q = &quotes[0];
        assert_eq!(q.page, Some(4));
        assert!(q.char_len() <= FALLBACK_QUOTE_CHARS);
        assert!(q.summary.ends_with("..."));
        assert_eq!(q.summary.chars().count(), FALLBACK_SUMMARY_CHARS + 3);
        assert_eq!(q.meta.practical_value, Some(0.5));
        assert_eq!(q.original, CHUNK);
    }

    #[test]
    fn short_chunk_fallback_keeps_whole_text() {
        let q = fallback_quote("Короткий фрагмент текста.", 1);
        assert_eq!(q.quote, "Короткий фрагмент текста.");
        assert_eq!(q.summary, "Короткий фрагмент текста.");
    }

    #[test]
    fn item_parsing_applies_defaults() {
        let item = json!({"quote": "  Продавайте результат.  ", "practical_value": 1.7});
        let q = quote_from_item(&item, CHUNK, 2).unwrap();
        assert_eq!(q.quote, "Продавайте результат.");
        assert_eq!(q.category, "general");
        assert_eq!(q.style, "insight");
        assert_eq!(q.target_audience(), "general");
        assert_eq!(q.meta.practical_value, Some(1.0));

        assert!(quote_from_item(&json!({"summary": "x"}), CHUNK, 2).is_none());
        assert!(quote_from_item(&json!({"quote": "   "}), CHUNK, 2).is_none());
    }

    #[test]
    fn item_parsing_reads_tags() {
        let item = json!({
            "quote": "Trust is the real currency.",
            "summary": "Trust first",
            "category": "sales",
            "style": "rule",
            "target_audience": "founders"
        });
        let q = quote_from_item(&item, CHUNK, 9).unwrap();
        assert_eq!(q.category, "sales");
        assert_eq!(q.style, "rule");
        assert_eq!(q.summary, "Trust first");
        assert_eq!(q.target_audience(), "founders");
    }

    #[test]
    fn cyrillic_ratio_counts_letters_only() {
        assert_eq!(cyrillic_ratio("123 !!"), None);
        assert_eq!(cyrillic_ratio("абв"), Some(1.0));
        assert_eq!(cyrillic_ratio("ab вг"), Some(0.5));
    }

    #[test]
    fn language_detection() {
        assert!(is_in_language("Продажи строятся на доверии.", "ru"));
        assert!(!is_in_language("Sales are built on trust.", "ru"));
        assert!(is_in_language("Sales are built on trust.", "en"));
        assert!(!is_in_language("Sales are built on trust.", "de"));
    }

    #[tokio::test]
    async fn translate_without_client_is_identity() {
        let out = translate(None, "Sales are built on trust.", "sales", "ru").await;
        assert_eq!(out, "Sales are built on trust.");
    }

    #[tokio::test]
    async fn topic_without_client_is_fallback() {
        assert_eq!(infer_topic(None, "any text", "бизнес").await, "бизнес");
    }
}
