//! Chapter-level insight analysis.
//!
//! A heavier alternative to quote extraction: the book is split into
//! chapters and the smart model is asked for every practical idea in each
//! one. Results are grouped by category and by method type.

use crate::config::ExtractionConfig;
use crate::error::QuoteError;
use crate::pipeline::book::{book_title, slugify_filename};
use crate::pipeline::chunk::{clean_text, split_into_chapters, truncate_chars, Chapter};
use crate::pipeline::input;
use crate::pipeline::llm::{resolve_client, CompletionRequest, LlmClient, ModelTier};
use crate::pipeline::text::{self, PageText};
use crate::progress::{ExtractionProgressCallback, NoopProgressCallback};
use crate::prompts;
use crate::quote::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Insight categories offered to the model.
pub const CATEGORIES: &[&str] = &[
    "маркетинг",
    "продажи",
    "психология",
    "мышление",
    "лидерство",
    "финансы",
    "стратегия",
    "продуктивность",
];

/// Method types offered to the model.
pub const METHOD_TYPES: &[&str] = &[
    "framework",
    "rule",
    "technique",
    "mistake",
    "case_study",
    "exercise",
    "insight",
];

/// Chapter text sent per request.
pub const CHAPTER_CONTENT_CHARS: usize = 40_000;
const INSIGHT_MAX_TOKENS: usize = 16_384;
/// `practical_value` at or above this counts as high value.
pub const HIGH_VALUE_THRESHOLD: f64 = 0.7;

const DEFAULT_CATEGORY: &str = "other";
const DEFAULT_METHOD: &str = "insight";

/// One idea extracted from a chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insight {
    pub text: String,
    pub category: String,
    pub method_type: String,
    /// Short name of the idea.
    pub title: String,
    pub description: String,
    pub practical_value: f64,
    pub actionable: bool,
    pub chapter_num: String,
    pub chapter_title: String,
    /// Length of `text` in characters.
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub chapter_num: String,
    pub title: String,
    pub insights_count: usize,
    pub content_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightGroup {
    pub count: usize,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightStats {
    /// Mean `length`, rounded down.
    pub avg_insight_length: usize,
    pub actionable_count: usize,
    pub high_value_count: usize,
}

/// Full result of [`analyze_book`], serialised as the analysis JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookAnalysis {
    pub book_title: String,
    pub total_chapters: usize,
    pub total_insights: usize,
    /// Backend that produced the insights, `none` when offline.
    pub analysis_model: String,
    /// Every insight in chapter order.
    pub all_insights: Vec<Insight>,
    pub chapters: Vec<ChapterSummary>,
    pub by_category: BTreeMap<String, InsightGroup>,
    pub by_method: BTreeMap<String, InsightGroup>,
    pub statistics: InsightStats,
}

impl BookAnalysis {
    /// Write the analysis as pretty JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), QuoteError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| QuoteError::json("book analysis", e))?;
        write_atomic(path.as_ref(), json.as_bytes()).await
    }
}

/// `<dir>/<slug>_analysis.json` for a book file.
pub fn default_analysis_path(dir: impl AsRef<Path>, book: impl AsRef<Path>) -> PathBuf {
    dir.as_ref()
        .join(format!("{}_analysis.json", slugify_filename(book)))
}

// ── Extraction ───────────────────────────────────────────────────────────

fn insight_from_item(item: &Value, chapter: &Chapter) -> Option<Insight> {
    let mut insight: Insight = match serde_json::from_value(item.clone()) {
        Ok(i) => i,
        Err(e) => {
            debug!("Skipping malformed insight: {e}");
            return None;
        }
    };
    insight.text = insight.text.trim().to_string();
    if insight.text.is_empty() {
        return None;
    }
    if insight.category.trim().is_empty() {
        insight.category = DEFAULT_CATEGORY.to_string();
    }
    if insight.method_type.trim().is_empty() {
        insight.method_type = DEFAULT_METHOD.to_string();
    }
    insight.practical_value = insight.practical_value.clamp(0.0, 1.0);
    insight.chapter_num = chapter.number.clone();
    insight.chapter_title = chapter.title.clone();
    insight.length = insight.text.chars().count();
    Some(insight)
}

/// All insights the smart model finds in one chapter.
///
/// The chapter body is cut to [`CHAPTER_CONTENT_CHARS`]. Any failure yields
/// an empty list so one bad chapter does not sink the book.
pub async fn extract_chapter_insights(client: &LlmClient, chapter: &Chapter) -> Vec<Insight> {
    let request = CompletionRequest::new(
        prompts::INSIGHTS_SYSTEM,
        prompts::insights_user(
            &chapter.title,
            truncate_chars(&chapter.content, CHAPTER_CONTENT_CHARS),
            CATEGORIES,
            METHOD_TYPES,
        ),
    )
    .temperature(0.3)
    .max_tokens(INSIGHT_MAX_TOKENS);

    match client.complete_json(ModelTier::Smart, &request).await {
        Ok(v) => {
            let insights: Vec<Insight> = v
                .get("insights")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| insight_from_item(item, chapter))
                        .collect()
                })
                .unwrap_or_default();
            debug!("Chapter '{}': {} insights", chapter.title, insights.len());
            insights
        }
        Err(e) => {
            warn!("Chapter '{}' analysis failed: {e}", chapter.title);
            Vec::new()
        }
    }
}

fn group_by<F>(insights: &[Insight], key: F) -> BTreeMap<String, InsightGroup>
where
    F: Fn(&Insight) -> &str,
{
    let mut groups: BTreeMap<String, InsightGroup> = BTreeMap::new();
    for insight in insights {
        let group = groups.entry(key(insight).to_string()).or_default();
        group.count += 1;
        group.insights.push(insight.clone());
    }
    groups
}

fn statistics(insights: &[Insight]) -> InsightStats {
    let total_len: usize = insights.iter().map(|i| i.length).sum();
    InsightStats {
        avg_insight_length: total_len.checked_div(insights.len()).unwrap_or(0),
        actionable_count: insights.iter().filter(|i| i.actionable).count(),
        high_value_count: insights
            .iter()
            .filter(|i| i.practical_value >= HIGH_VALUE_THRESHOLD)
            .count(),
    }
}

/// Split `full_text` into chapters and analyse them one by one.
///
/// Progress is reported per chapter through `progress`.
pub async fn analyze_book(
    client: &LlmClient,
    title: &str,
    full_text: &str,
    progress: &dyn ExtractionProgressCallback,
) -> BookAnalysis {
    let chapters = split_into_chapters(full_text);
    let total = chapters.len();
    info!("Analysing '{}': {} chapters", title, total);
    progress.on_extraction_start(total);

    let mut all_insights = Vec::new();
    let mut summaries = Vec::with_capacity(total);
    for (idx, chapter) in chapters.iter().enumerate() {
        progress.on_chunk_start(idx + 1, total);
        let insights = extract_chapter_insights(client, chapter).await;
        progress.on_chunk_complete(idx + 1, total, insights.len());
        summaries.push(ChapterSummary {
            chapter_num: chapter.number.clone(),
            title: chapter.title.clone(),
            insights_count: insights.len(),
            content_length: chapter.char_len(),
        });
        all_insights.extend(insights);
    }
    progress.on_extraction_complete(total, all_insights.len());

    let analysis = BookAnalysis {
        book_title: title.to_string(),
        total_chapters: total,
        total_insights: all_insights.len(),
        analysis_model: client.label(ModelTier::Smart),
        chapters: summaries,
        by_category: group_by(&all_insights, |i| &i.category),
        by_method: group_by(&all_insights, |i| &i.method_type),
        statistics: statistics(&all_insights),
        all_insights,
    };
    info!(
        "Analysis done: {} insights, {} actionable, {} high value, {} categories",
        analysis.total_insights,
        analysis.statistics.actionable_count,
        analysis.statistics.high_value_count,
        analysis.by_category.len()
    );
    analysis
}

/// Cleaned page texts joined with blank lines.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| clean_text(&p.text))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Read a PDF (path or URL) and run [`analyze_book`] on it.
///
/// # Errors
/// Input and PDF errors, and [`QuoteError::ProviderNotConfigured`] when no
/// model is available: insight analysis has no offline mode.
pub async fn analyze_pdf(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<BookAnalysis, QuoteError> {
    let client = resolve_client(config)?.ok_or_else(|| QuoteError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: "insight analysis needs an LLM; set OPENAI_API_KEY or EDGEQUAKE_LLM_PROVIDER"
            .to_string(),
    })?;
    let progress: &dyn ExtractionProgressCallback = config
        .progress_callback
        .as_deref()
        .unwrap_or(&NoopProgressCallback);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pages =
        text::extract_pages(resolved.path(), config.password.as_deref(), &config.pages).await?;
    let full_text = join_pages(&pages);
    info!("Read {} pages, {} chars", pages.len(), full_text.chars().count());

    Ok(analyze_book(&client, &book_title(resolved.path()), &full_text, progress).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuoteError;
    use crate::pipeline::llm::{Completion, CompletionBackend};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed(&'static str);

    impl CompletionBackend for Fixed {
        fn complete<'a>(
            &'a self,
            _request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<Completion, QuoteError>> {
            Box::pin(async move {
                Ok(Completion {
                    content: self.0.to_string(),
                    ..Default::default()
                })
            })
        }

        fn name(&self) -> String {
            "fixed".to_string()
        }
    }

    fn client(reply: &'static str) -> LlmClient {
        let config = ExtractionConfig::builder().max_retries(0).build().unwrap();
        LlmClient::single(Arc::new(Fixed(reply)), &config)
    }

    fn chapter() -> Chapter {
        Chapter {
            number: "2".into(),
            title: "Offers".into(),
            content: "Chapter body.".into(),
        }
    }

    #[test]
    fn item_defaults_and_chapter_tags() {
        let item = json!({"text": "  Sell outcomes, not features.  ", "practical_value": 0.9});
        let i = insight_from_item(&item, &chapter()).unwrap();
        assert_eq!(i.text, "Sell outcomes, not features.");
        assert_eq!(i.category, "other");
        assert_eq!(i.method_type, "insight");
        assert_eq!(i.chapter_num, "2");
        assert_eq!(i.chapter_title, "Offers");
        assert_eq!(i.length, 28);

        assert!(insight_from_item(&json!({"text": ""}), &chapter()).is_none());
        assert!(insight_from_item(&json!({"text": 5}), &chapter()).is_none());
    }

    #[test]
    fn stats_use_integer_average() {
        let mk = |len: usize, actionable: bool, value: f64| Insight {
            length: len,
            actionable,
            practical_value: value,
            ..Default::default()
        };
        let s = statistics(&[mk(10, true, 0.7), mk(15, false, 0.69)]);
        assert_eq!(s.avg_insight_length, 12);
        assert_eq!(s.actionable_count, 1);
        assert_eq!(s.high_value_count, 1);
        assert_eq!(statistics(&[]), InsightStats::default());
    }

    #[tokio::test]
    async fn chapter_reply_is_parsed() {
        let c = client(
            r#"```json
{"insights": [
  {"text": "Price anchors shape every later offer.", "category": "продажи",
   "method_type": "rule", "actionable": true, "practical_value": 0.8},
  {"text": "Test one variable at a time.", "actionable": true}
]}
```"#,
        );
        let insights = extract_chapter_insights(&c, &chapter()).await;
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].category, "продажи");
        assert_eq!(insights[1].method_type, "insight");
    }

    #[tokio::test]
    async fn bad_reply_yields_nothing() {
        let insights = extract_chapter_insights(&client("not json"), &chapter()).await;
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn book_groups_by_category_and_method() {
        let c = client(
            r#"{"insights": [
                {"text": "Anchor the price first.", "category": "продажи", "method_type": "rule", "practical_value": 0.9, "actionable": true},
                {"text": "Write the headline last.", "category": "маркетинг", "method_type": "rule"}
            ]}"#,
        );
        let text = "Some short book text without chapter headings.";
        let analysis = analyze_book(&c, "Book", text, &NoopProgressCallback).await;

        assert_eq!(analysis.total_chapters, 1);
        assert_eq!(analysis.total_insights, 2);
        assert_eq!(analysis.analysis_model, "fixed");
        assert_eq!(analysis.by_method["rule"].count, 2);
        assert_eq!(analysis.by_category["продажи"].count, 1);
        assert_eq!(analysis.chapters[0].insights_count, 2);
        assert_eq!(analysis.statistics.high_value_count, 1);
    }

    #[tokio::test]
    async fn analysis_saves_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_analysis_path(dir.path(), "My Book.pdf");
        let analysis = BookAnalysis {
            book_title: "My Book".into(),
            ..Default::default()
        };
        analysis.save(&path).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let back: BookAnalysis = serde_json::from_str(&text).unwrap();
        assert_eq!(back, analysis);
    }
}
