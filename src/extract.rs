//! Top-level extraction entry points.
//!
//! [`extract_quotes`] runs the whole book pipeline and returns everything in
//! memory; [`extract_to_file`] additionally writes the quote file. Both are
//! thin shells over [`extract_from_pages`], which works on page text already
//! in memory and is what the integration tests drive.

use crate::config::{ExtractionConfig, Strategy};
use crate::error::{ChunkError, QuoteError};
use crate::output::{DocumentMetadata, ExtractionOutput, ExtractionStats};
use crate::pipeline::book::{book_title, infer_author_and_topic};
use crate::pipeline::candidates::{self, ChunkPos, FALLBACK_QUOTE_CHARS};
use crate::pipeline::chunk::{chunk_paragraphs, clean_text, split_paragraphs, truncate_chars};
use crate::pipeline::dedup::dedup_quotes;
use crate::pipeline::llm::{resolve_client, LlmClient};
use crate::pipeline::smart;
use crate::pipeline::text::{self, PageText};
use crate::pipeline::validate::{check_topic_relevance, QuoteValidator};
use crate::pipeline::input;
use crate::progress::{ExtractionProgressCallback, NoopProgressCallback};
use crate::prompts::DEFAULT_AUDIENCE;
use crate::quote::{Book, Quote};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Topic used when neither the config, the model nor the file name names one.
pub const DEFAULT_TOPIC: &str = "business";

/// Paragraphs shorter than this are not analysed by the smart strategy.
const SMART_MIN_PARAGRAPH_CHARS: usize = 100;

/// Chunks shorter than this never become basic-only fallback quotes.
const FALLBACK_MIN_CHUNK_CHARS: usize = 80;

/// Extract quotes from a PDF file or URL.
///
/// # Errors
/// Fatal errors only: unreadable input, a named provider that cannot be
/// built, or a book that yields no quote at all. Failed chunks are reported
/// in [`ExtractionOutput::chunk_errors`].
pub async fn extract_quotes(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, QuoteError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    // ── Step 2: Read text ────────────────────────────────────────────────
    let text_start = Instant::now();
    let metadata = text::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    let pages = text::extract_pages(&pdf_path, config.password.as_deref(), &config.pages).await?;
    let text_duration_ms = text_start.elapsed().as_millis() as u64;
    info!(
        "Read {} of {} pages in {}ms",
        pages.len(),
        metadata.page_count,
        text_duration_ms
    );

    // ── Step 3: Extract ──────────────────────────────────────────────────
    let title = book_title(&pdf_path);
    let mut output = extract_from_pages(&title, &pages, config).await?;

    output.book.file_path = Some(input_str.to_string());
    output.metadata = Some(metadata);
    output.stats.text_duration_ms = text_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Run the configured strategy over page text already in memory.
///
/// `title` is the book title (normally the file stem); author and topic
/// hints are derived from it.
pub async fn extract_from_pages(
    title: &str,
    pages: &[PageText],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, QuoteError> {
    let start = Instant::now();
    let client = resolve_client(config)?;
    let client = client.as_ref();
    let progress: &dyn ExtractionProgressCallback = config
        .progress_callback
        .as_deref()
        .unwrap_or(&NoopProgressCallback);

    let hints = infer_author_and_topic(title);
    let mut book = Book {
        title: title.to_string(),
        author: hints.author.clone(),
        topic: hints.topic.clone(),
        ..Default::default()
    };
    let mut stats = ExtractionStats {
        pages: pages.len(),
        offline: client.is_none(),
        ..Default::default()
    };
    let mut chunk_errors = Vec::new();

    let llm_start = Instant::now();
    let quotes = match config.strategy {
        Strategy::Structured => {
            let topic = resolve_topic(client, pages, &hints.topic, config).await;
            book.topic = topic;
            run_structured(client, &book, pages, config, progress, &mut stats, &mut chunk_errors)
                .await
        }
        Strategy::Smart => {
            if let Some(ref t) = config.topic {
                book.topic = t.clone();
            } else if book.topic.is_empty() {
                book.topic = DEFAULT_TOPIC.to_string();
            }
            run_smart(client, pages, config, progress, &mut stats).await
        }
    };

    let mut quotes = if config.translate {
        translate_all(client, quotes, &book.topic, config, &mut stats).await
    } else {
        quotes
    };
    for q in &mut quotes {
        q.meta.length = Some(q.char_len());
        q.meta.validation_level.get_or_insert_with(|| "basic".to_string());
    }
    stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    progress.on_extraction_complete(stats.chunks, quotes.len());
    if quotes.is_empty() {
        return Err(QuoteError::NoQuotesExtracted {
            book: title.to_string(),
            chunks: stats.chunks,
        });
    }

    if let Some(c) = client {
        stats.total_input_tokens = c.usage().input_tokens();
        stats.total_output_tokens = c.usage().output_tokens();
    }
    stats.chunks_failed = chunk_errors.len();
    stats.total_duration_ms = start.elapsed().as_millis() as u64;
    book.total_quotes = quotes.len();
    book.processed_at = Some(chrono::Utc::now().to_rfc3339());

    info!(
        "Extraction complete: {} quotes from {} chunks ({} candidates, {} rejected, {} failed chunks), {}ms",
        quotes.len(),
        stats.chunks,
        stats.candidates,
        stats.rejected(),
        stats.chunks_failed,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        book,
        quotes,
        metadata: None,
        stats,
        chunk_errors,
    })
}

async fn resolve_topic(
    client: Option<&LlmClient>,
    pages: &[PageText],
    hint: &str,
    config: &ExtractionConfig,
) -> String {
    if let Some(ref t) = config.topic {
        return t.clone();
    }
    let fallback = if hint.is_empty() { DEFAULT_TOPIC } else { hint };
    let sample = pages
        .iter()
        .map(|p| clean_text(&p.text))
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    let topic = candidates::infer_topic(client, &sample, fallback).await;
    info!("Book topic: {}", topic);
    topic
}

// ── Structured strategy ──────────────────────────────────────────────────

/// `(page, chunk)` pairs of every page, in reading order.
fn page_chunks(pages: &[PageText], config: &ExtractionConfig) -> Vec<(usize, String)> {
    pages
        .iter()
        .flat_map(|p| {
            chunk_paragraphs(
                &clean_text(&p.text),
                config.sentences_per_chunk,
                config.min_chunk_chars,
            )
            .into_iter()
            .map(move |c| (p.number, c))
        })
        .collect()
}

async fn run_structured(
    client: Option<&LlmClient>,
    book: &Book,
    pages: &[PageText],
    config: &ExtractionConfig,
    progress: &dyn ExtractionProgressCallback,
    stats: &mut ExtractionStats,
    chunk_errors: &mut Vec<ChunkError>,
) -> Vec<Quote> {
    let chunks = page_chunks(pages, config);
    let total = chunks.len();
    stats.chunks = total;
    progress.on_extraction_start(total);
    info!("{} chunks to examine (topic: {})", total, book.topic);

    let validator = QuoteValidator::new(config.validator);
    let audience = config.audience.as_deref().unwrap_or(DEFAULT_AUDIENCE);
    let topic = book.topic.as_str();
    let author = book.author.as_str();

    let mut seen: HashSet<String> = HashSet::new();
    let mut collected: Vec<Quote> = Vec::new();

    // Ordered buffering keeps the output deterministic; dropping the stream
    // at the quote budget cancels the calls still in flight.
    let results = stream::iter(chunks.iter().enumerate())
        .map(move |(i, (page, chunk))| async move {
            let pos = ChunkPos {
                page: *page,
                chunk: i + 1,
            };
            progress.on_chunk_start(pos.chunk, total);
            let result = candidates::extract_from_chunk(client, chunk, pos, topic, audience).await;
            match &result {
                Ok(found) => progress.on_chunk_complete(pos.chunk, total, found.len()),
                Err(e) => progress.on_chunk_error(pos.chunk, total, &e.to_string()),
            }
            result
        })
        .buffered(config.concurrency.max(1));
    futures::pin_mut!(results);

    'chunks: while let Some(result) = results.next().await {
        let found = match result {
            Ok(found) => {
                stats.chunks_processed += 1;
                found
            }
            Err(e) => {
                warn!("{e}");
                chunk_errors.push(e);
                continue;
            }
        };

        for candidate in found {
            let key = candidate.dedup_key().to_string();
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            stats.candidates += 1;

            let report = validator.validate(&candidate);
            let Some(mut quote) = QuoteValidator::apply(&candidate, &report) else {
                let stage = report
                    .first_failure()
                    .map(|f| f.stage.as_str())
                    .unwrap_or("validation");
                stats.reject(stage);
                continue;
            };

            if config.topic_check {
                let relevance = check_topic_relevance(client, &quote.quote, topic, author).await;
                quote
                    .meta
                    .validation_stages
                    .insert(relevance.stage.as_str().to_string(), relevance.to_record());
                if !relevance.passed() {
                    debug!("Off-topic: {}", truncate_chars(&quote.quote, 60));
                    stats.reject(relevance.stage.as_str());
                    continue;
                }
            }

            collected.push(quote);
            if collected.len() >= config.max_quotes {
                info!("Quote budget of {} reached", config.max_quotes);
                break 'chunks;
            }
        }
    }
    info!("Validated quotes: {}", collected.len());

    if collected.len() < config.min_quotes {
        let added = add_basic_fallback(&chunks, &validator, config.min_quotes, &mut seen, &mut collected);
        stats.fallback_quotes = added;
        if added > 0 {
            warn!(
                "Only {} validated quotes; added {} basic-only quotes",
                collected.len() - added,
                added
            );
        }
    }
    collected.truncate(config.max_quotes);

    for q in &mut collected {
        q.engaging = true;
        q.meta.sentiment = Some("practical".to_string());
        q.meta.target_audience.get_or_insert_with(|| "general".to_string());
    }
    collected
}

/// Top `collected` up to `min_quotes` with the first 200 chars of unused
/// chunks that pass the basic stage. Returns how many were added.
fn add_basic_fallback(
    chunks: &[(usize, String)],
    validator: &QuoteValidator,
    min_quotes: usize,
    seen: &mut HashSet<String>,
    collected: &mut Vec<Quote>,
) -> usize {
    let mut added = 0;
    for (page, chunk) in chunks {
        if collected.len() >= min_quotes {
            break;
        }
        if chunk.chars().count() < FALLBACK_MIN_CHUNK_CHARS || seen.contains(chunk.trim()) {
            continue;
        }
        let text = truncate_chars(chunk.trim(), FALLBACK_QUOTE_CHARS).trim_end();
        if seen.contains(text) {
            continue;
        }
        let basic = validator.basic_only(text);
        if !basic.passed() {
            continue;
        }

        let mut q = candidates::fallback_quote(chunk, *page);
        q.summary.clear();
        q.meta.practical_value = None;
        q.meta.validation_level = Some("basic_only".to_string());
        q.meta
            .validation_stages
            .insert(basic.stage.as_str().to_string(), basic.to_record());
        seen.insert(text.to_string());
        collected.push(q);
        added += 1;
    }
    added
}

// ── Smart strategy ───────────────────────────────────────────────────────

async fn run_smart(
    client: Option<&LlmClient>,
    pages: &[PageText],
    config: &ExtractionConfig,
    progress: &dyn ExtractionProgressCallback,
    stats: &mut ExtractionStats,
) -> Vec<Quote> {
    let paragraphs: Vec<(usize, String)> = pages
        .iter()
        .flat_map(|p| {
            split_paragraphs(&clean_text(&p.text))
                .into_iter()
                .filter(|para| para.chars().count() > SMART_MIN_PARAGRAPH_CHARS)
                .map(move |para| (p.number, para))
        })
        .collect();
    stats.chunks = paragraphs.len();
    progress.on_extraction_start(paragraphs.len());
    info!("{} paragraphs to analyse", paragraphs.len());

    let mut quotes =
        smart::extract_smart_quotes(client, &paragraphs, config.concurrency, progress).await;
    stats.chunks_processed = paragraphs.len();
    stats.candidates = quotes.len();

    if quotes.is_empty() {
        info!("Smart analysis found nothing; falling back to per-chunk extraction");
        let chunks = page_chunks(pages, config);
        stats.chunks += chunks.len();
        let per_chunk: Vec<Vec<Quote>> = stream::iter(chunks.iter())
            .map(move |(page, chunk)| async move {
                let mut found = smart::extract_engaging(client, chunk).await;
                for q in &mut found {
                    q.page = Some(*page);
                }
                found
            })
            .buffered(config.concurrency.max(1))
            .collect()
            .await;
        stats.chunks_processed += chunks.len();
        quotes = dedup_quotes(per_chunk.into_iter().flatten().collect());
        stats.candidates += quotes.len();
    }

    quotes.truncate(config.max_quotes);
    quotes
}

// ── Translation ──────────────────────────────────────────────────────────

async fn translate_all(
    client: Option<&LlmClient>,
    quotes: Vec<Quote>,
    topic: &str,
    config: &ExtractionConfig,
    stats: &mut ExtractionStats,
) -> Vec<Quote> {
    if client.is_none() {
        return quotes;
    }
    let language = config.target_language.as_str();
    let translated: Vec<Quote> = stream::iter(quotes)
        .map(move |mut q| async move {
            q.translated = candidates::translate(client, &q.quote, topic, language).await;
            q
        })
        .buffered(config.concurrency.max(1))
        .collect()
        .await;
    stats.translated = translated
        .iter()
        .filter(|q| q.translated.trim() != q.quote.trim())
        .count();
    translated
}

// ── File and sync wrappers ───────────────────────────────────────────────

/// Extract and write the quote file.
///
/// When `output_path` exists and `force` is false nothing is extracted and
/// `Ok(None)` is returned.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
    force: bool,
) -> Result<Option<ExtractionOutput>, QuoteError> {
    let path = output_path.as_ref();
    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!("Output already exists, skipping: {}", path.display());
        return Ok(None);
    }

    let output = extract_quotes(input_str, config).await?;
    output.to_quote_file().save(path).await?;
    info!("Wrote {} quotes to {}", output.quotes.len(), path.display());
    Ok(Some(output))
}

/// Synchronous wrapper around [`extract_quotes`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, QuoteError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| QuoteError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_quotes(input_str, config))
}

/// Read PDF metadata without extracting anything.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    password: Option<&str>,
) -> Result<DocumentMetadata, QuoteError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    text::extract_metadata(resolved.path(), password).await
}
