//! Pipeline tests against a scripted model.
//!
//! The backend routes on the system prompt, so one instance serves topic
//! inference, extraction, relevance checks, translation, refinement and
//! insight analysis. No network or PDF access is needed.

use edgequake_quotes::pipeline::llm::{Completion, CompletionRequest};
use edgequake_quotes::pipeline::text::PageText;
use edgequake_quotes::{
    analyze_book, extract_from_pages, refine_quotes, CompletionBackend, ExtractionConfig,
    LlmClient, NoopProgressCallback, QuoteError, QuoteStore,
};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Scripted {
    extract_calls: AtomicUsize,
    relevance_calls: AtomicUsize,
    translate_calls: AtomicUsize,
}

/// First sentence of a chunk, with its full stop.
fn first_sentence(text: &str) -> String {
    match text.split_once(". ") {
        Some((head, _)) => format!("{head}."),
        None => text.trim().to_string(),
    }
}

impl Scripted {
    fn reply(&self, request: &CompletionRequest) -> Result<String, QuoteError> {
        let system = request.system.as_str();
        let user = request.user.as_str();

        if system.contains("identify the subject") {
            return Ok(json!({"topic": "sales funnels", "confidence": 0.9}).to_string());
        }
        if system.contains("editor selecting quotes") {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            if user.contains("FAIL") {
                return Err(QuoteError::LlmApiError {
                    message: "overloaded".to_string(),
                });
            }
            return Ok(json!({"quotes": [{
                "quote": first_sentence(user),
                "summary": "Key idea",
                "category": "sales",
                "practical_value": 0.9
            }]})
            .to_string());
        }
        if system.contains("You validate quotes") {
            self.relevance_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({"valid": !user.contains("ADVERT")}).to_string());
        }
        if system.contains("professional translator") {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("Перевод: {user}"));
        }
        if system.contains("quote editor") {
            let payload: Value = serde_json::from_str(user).unwrap_or(Value::Null);
            let items: Vec<Value> = payload["quotes"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|mut item| {
                    let weak = item["quote"].as_str().unwrap_or("").contains("weak");
                    item["engaging"] = json!(!weak);
                    item["style"] = json!("advice");
                    item
                })
                .collect();
            return Ok(json!({ "quotes": items }).to_string());
        }
        if system.contains("analyse chapters") {
            return Ok(json!({"insights": [{
                "text": "Write the offer before you write the ad, then test the headline.",
                "category": "маркетинг",
                "method_type": "method",
                "title": "Offer first",
                "description": "Build the promise before the campaign.",
                "practical_value": 0.8,
                "actionable": true
            }]})
            .to_string());
        }
        Ok("{}".to_string())
    }
}

impl CompletionBackend for Scripted {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, QuoteError>> {
        Box::pin(async move {
            let content = self.reply(request)?;
            Ok(Completion {
                content,
                input_tokens: 10,
                output_tokens: 5,
            })
        })
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

fn pages() -> Vec<PageText> {
    let texts = [
        "Every sales funnel must begin with a clear promise of a concrete result. \
         The customer needs to understand the offer within three seconds.",
        "A good follow-up sequence will turn curious visitors into paying customers. \
         Nobody buys from a stranger who ignores their questions.",
        "This ADVERT says you should buy our premium course before Friday ends. \
         Seats are limited and the price will rise next week.",
        "FAIL marker sentence that the backend refuses to process at all. \
         Another sentence keeps this chunk above the minimum length.",
    ];
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| PageText {
            number: i + 1,
            text: t.to_string(),
        })
        .collect()
}

fn config(backend: Arc<Scripted>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .backend(backend)
        .min_quotes(1)
        .max_quotes(10)
        .max_retries(0)
        .retry_backoff_ms(1)
        .concurrency(2)
        .topic_check(true)
        .translate(true)
        .target_language("ru")
        .build()
        .unwrap()
}

#[tokio::test]
async fn structured_run_validates_filters_and_translates() {
    let backend = Arc::new(Scripted::default());
    let output = extract_from_pages("Ivanov - Sales Funnels", &pages(), &config(backend.clone()))
        .await
        .unwrap();

    assert_eq!(output.book.topic, "sales funnels");
    assert_eq!(output.stats.pages, 4);
    assert_eq!(output.stats.chunks, 4);
    assert!(!output.stats.offline);

    // Page 3 is rejected as off-topic, page 4 fails at the model.
    let pages_kept: Vec<Option<usize>> = output.quotes.iter().map(|q| q.page).collect();
    assert_eq!(pages_kept, vec![Some(1), Some(2)]);
    assert_eq!(output.stats.rejected_by_stage.get("topic_relevance"), Some(&1));
    assert_eq!(output.stats.chunks_failed, 1);
    assert_eq!(output.chunk_errors.len(), 1);
    assert_eq!(output.stats.fallback_quotes, 0);

    let first = &output.quotes[0];
    assert_eq!(
        first.quote,
        "Every sales funnel must begin with a clear promise of a concrete result."
    );
    assert!(first.translated.starts_with("Перевод: "));
    assert!(first.engaging);
    assert!(first.meta.validation_stages.contains_key("topic_relevance"));
    assert_eq!(first.meta.length, Some(first.quote.chars().count()));
    assert_eq!(output.stats.translated, 2);

    assert_eq!(backend.extract_calls.load(Ordering::SeqCst), 4);
    assert_eq!(backend.relevance_calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 2);
    assert!(output.stats.total_input_tokens > 0);
}

#[tokio::test]
async fn quote_budget_stops_early() {
    let backend = Arc::new(Scripted::default());
    let config = ExtractionConfig::builder()
        .backend(backend)
        .min_quotes(0)
        .max_quotes(1)
        .concurrency(1)
        .translate(false)
        .build()
        .unwrap();
    let output = extract_from_pages("Funnels", &pages(), &config).await.unwrap();
    assert_eq!(output.quotes.len(), 1);
    assert_eq!(output.quotes[0].page, Some(1));
    assert!(output.quotes[0].translated.is_empty());
}

#[tokio::test]
async fn extracted_quotes_import_into_store() {
    let backend = Arc::new(Scripted::default());
    let output = extract_from_pages("Sales Funnels", &pages(), &config(backend))
        .await
        .unwrap();

    let mut store = QuoteStore::open_in_memory().unwrap();
    let report = store.import(&output.to_quote_file(), None).unwrap();
    assert_eq!(report.imported, output.quotes.len());
    assert_eq!(report.skipped, 0);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_books, 1);
    assert_eq!(stats.total_quotes, output.quotes.len());

    let found = store.search_quotes("follow-up", 10).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].quote.page, Some(2));
}

#[tokio::test]
async fn refine_drops_demoted_quotes() {
    let backend = Arc::new(Scripted::default());
    let config = config(backend.clone());
    let client = LlmClient::single(backend, &config);

    let quotes = vec![
        edgequake_quotes::Quote::new("Trust grows when every promise in the funnel is kept."),
        edgequake_quotes::Quote::new("This weak line says almost nothing about the actual offer."),
    ];
    let refined = refine_quotes(Some(&client), &quotes, 10).await;
    assert_eq!(refined.len(), 1);
    assert_eq!(refined[0].style, "advice");
    assert!(refined[0].engaging);
}

#[tokio::test]
async fn insights_are_grouped_per_chapter() {
    let backend = Arc::new(Scripted::default());
    let config = config(backend.clone());
    let client = LlmClient::single(backend, &config);

    let body = "The offer is the foundation of every campaign and deserves more time than \
                the ad itself. Test two promises before spending on traffic.";
    let text = format!(
        "Chapter 1: The Offer\n{body}\nChapter 2: The Funnel\n{body}\nChapter 3: The Follow-up\n{body}\n"
    );
    let analysis = analyze_book(&client, "Funnels", &text, &NoopProgressCallback).await;

    assert_eq!(analysis.total_chapters, 3);
    assert_eq!(analysis.total_insights, 3);
    assert_eq!(analysis.analysis_model, "scripted");
    assert_eq!(analysis.by_category["маркетинг"].count, 3);
    assert_eq!(analysis.statistics.actionable_count, 3);
    assert_eq!(analysis.all_insights[1].chapter_title, "The Funnel");
}
