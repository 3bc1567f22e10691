//! Paragraph-level quote analysis (the "smart" strategy).
//!
//! Instead of asking the model to find quotes in a chunk, this strategy
//! proposes candidate spans itself (the whole paragraph, its halves, single
//! sentences and sentence pairs) and has each span graded. Grading uses the
//! fast model when one is configured and a keyword heuristic otherwise.
//!
//! The module also holds the per-chunk "engaging" extraction that the smart
//! strategy falls back to when no paragraph yields a good quote.

use crate::pipeline::chunk::{collapse_whitespace, split_sentences, truncate_chars};
use crate::pipeline::dedup::{dedup_quotes, sort_by_confidence};
use crate::pipeline::llm::{CompletionRequest, LlmClient, ModelTier};
use crate::progress::ExtractionProgressCallback;
use crate::prompts;
use crate::quote::{Quote, QuoteMeta, QuoteType};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Paragraphs up to this length are themselves a candidate.
const WHOLE_PARAGRAPH_MAX_CHARS: usize = 400;
const MIN_HALF_CHARS: usize = 50;
const MIN_SENTENCE_CHARS: usize = 30;
const MIN_PAIR_CHARS: usize = 50;
/// Context sent alongside a candidate for grading.
const QUALITY_CONTEXT_CHARS: usize = 1000;
/// Analyses kept per paragraph.
const TOP_PER_PARAGRAPH: usize = 3;

// ── Quality ──────────────────────────────────────────────────────────────

/// Grade of a candidate span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteQuality {
    Excellent,
    Good,
    Average,
    Poor,
}

impl QuoteQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteQuality::Excellent => "excellent",
            QuoteQuality::Good => "good",
            QuoteQuality::Average => "average",
            QuoteQuality::Poor => "poor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "excellent" => Some(QuoteQuality::Excellent),
            "good" => Some(QuoteQuality::Good),
            "average" => Some(QuoteQuality::Average),
            "poor" => Some(QuoteQuality::Poor),
            _ => None,
        }
    }

    /// Bucket an overall score: ≥ 0.8 excellent, ≥ 0.6 good, ≥ 0.4 average.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QuoteQuality::Excellent
        } else if score >= 0.6 {
            QuoteQuality::Good
        } else if score >= 0.4 {
            QuoteQuality::Average
        } else {
            QuoteQuality::Poor
        }
    }

    /// Excellent or good: worth keeping.
    pub fn is_publishable(self) -> bool {
        matches!(self, QuoteQuality::Excellent | QuoteQuality::Good)
    }
}

/// The grading of one candidate span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteAnalysis {
    pub text: String,
    pub quote_type: QuoteType,
    pub quality: QuoteQuality,
    pub confidence: f64,
    pub context_score: f64,
    pub practical_value: f64,
    pub completeness: f64,
    pub target_audience: String,
    pub category: String,
    pub sentiment: String,
    pub reasoning: String,
    pub summary: String,
}

impl QuoteAnalysis {
    /// The analysis as a quote record taken from `paragraph` on `page`.
    pub fn into_quote(self, page: Option<usize>, paragraph: &str) -> Quote {
        let mut q = Quote::new(self.text.clone());
        q.page = page;
        q.original = paragraph.to_string();
        q.summary = self.summary;
        q.category = self.category;
        q.engaging = self.quality == QuoteQuality::Excellent;
        q.meta = QuoteMeta {
            sentiment: Some(self.sentiment),
            target_audience: Some(self.target_audience),
            length: Some(self.text.chars().count()),
            confidence: Some(self.confidence),
            context_score: Some(self.context_score),
            practical_value: Some(self.practical_value),
            completeness: Some(self.completeness),
            quote_type: Some(self.quote_type),
            reasoning: Some(self.reasoning),
            ..Default::default()
        };
        q
    }
}

// ── Candidates ───────────────────────────────────────────────────────────

static RE_NOT_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\w\s.,!?;:()\-—"'«»“”…]"#).unwrap());
static RE_COMMANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(делай|нужно|должен|можно|следует|важно)\b").unwrap());

static MEANINGLESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d+\.",
        r"^глава\s+\d+",
        r"^chapter\s+\d+",
        r"^страница\s+\d+",
        r"^page\s+\d+",
        r"^рисунок\s+\d+",
        r"^figure\s+\d+",
        r"^таблица\s+\d+",
        r"^table\s+\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

// Russian entries are stems: a match may continue with any word
// characters, so inflected forms (продажи, воронку, клиентов) count.
static MEANINGFUL_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(продаж|маркетинг|бизнес|клиент|доход|прибыль|воронк|конвер)\w*",
        r"\b(важно|нужно|должен|можно|следует|рекомендуется)\b",
        r"\b(результат|эффект|успех|проблем|решени)\w*",
        r"\b(sales?|selling|marketing|business|customers?|clients?|revenue|profit|funnels?|conversions?)\b",
        r"\b(must|should|need to|important|recommended)\b",
        r"\b(results?|effects?|success|problems?|solutions?)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Collapse whitespace and drop characters that are not letters, digits,
/// whitespace or common punctuation.
pub fn clean_fragment(text: &str) -> String {
    let s = collapse_whitespace(text);
    RE_NOT_TEXT.replace_all(&s, "").trim().to_string()
}

/// Sentence-level shape of a paragraph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParagraphStructure {
    pub sentences: Vec<String>,
    pub total_chars: usize,
    pub has_questions: bool,
    /// Contains an imperative marker ("нужно", "должен", …).
    pub has_commands: bool,
    /// Contains "например".
    pub has_examples: bool,
}

impl ParagraphStructure {
    pub fn avg_sentence_chars(&self) -> f64 {
        if self.sentences.is_empty() {
            return 0.0;
        }
        let total: usize = self.sentences.iter().map(|s| s.chars().count()).sum();
        total as f64 / self.sentences.len() as f64
    }
}

pub fn analyze_structure(paragraph: &str) -> ParagraphStructure {
    let sentences = split_sentences(paragraph);
    let lower: Vec<String> = sentences.iter().map(|s| s.to_lowercase()).collect();
    ParagraphStructure {
        total_chars: paragraph.chars().count(),
        has_questions: sentences.iter().any(|s| s.contains('?')),
        has_commands: lower.iter().any(|s| RE_COMMANDS.is_match(s)),
        has_examples: lower.iter().any(|s| s.contains("например")),
        sentences,
    }
}

/// True for sentences that carry subject matter rather than book furniture
/// (numbering, chapter/page/figure/table captions).
pub fn is_meaningful_sentence(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    if MEANINGLESS_PATTERNS.iter().any(|re| re.is_match(&lower)) {
        return false;
    }
    MEANINGFUL_INDICATORS.iter().any(|re| re.is_match(&lower))
}

/// Candidate spans of a cleaned paragraph, first occurrence order, no
/// duplicates.
pub fn quote_candidates(paragraph: &str, structure: &ParagraphStructure) -> Vec<String> {
    let sentences = &structure.sentences;
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    };

    if paragraph.chars().count() <= WHOLE_PARAGRAPH_MAX_CHARS {
        push(paragraph.to_string());
    }

    let mid = sentences.len() / 2;
    if mid > 0 {
        for half in [sentences[..mid].join(" "), sentences[mid..].join(" ")] {
            if half.chars().count() >= MIN_HALF_CHARS {
                push(half);
            }
        }
    }

    for s in sentences {
        if s.chars().count() >= MIN_SENTENCE_CHARS && is_meaningful_sentence(s) {
            push(s.clone());
        }
    }

    for pair in sentences.windows(2) {
        let joined = pair.join(" ");
        if joined.chars().count() >= MIN_PAIR_CHARS {
            push(joined);
        }
    }

    out
}

// ── Grading ──────────────────────────────────────────────────────────────

const BUSINESS_WORDS: &[&str] = &[
    "продаж", "маркетинг", "бизнес", "клиент", "доход", "прибыль", "воронк", "конвер",
];
const ACTION_WORDS: &[&str] = &[
    "важно", "нужно", "должен", "можно", "следует", "рекомендуется", "делай", "строи",
];
const RESULT_WORDS: &[&str] = &[
    "результат", "эффект", "успех", "проблема", "решение", "стратегия", "тактика",
];
const PRACTICAL_WORDS: &[&str] = &[
    "как", "что", "почему", "когда", "где", "зачем", "метод", "способ", "техника",
    "инструмент", "пример", "случай", "история", "опыт", "совет", "рекомендация", "правило",
    "принцип",
];
const EMOTIONAL_WORDS: &[&str] = &[
    "успех", "победа", "достижение", "результат", "эффект", "мощный", "сильный",
];

/// Share of `words` that occur (as substrings) in `lower`.
fn word_share(lower: &str, words: &[&str]) -> f64 {
    let hits = words.iter().filter(|w| lower.contains(*w)).count();
    hits as f64 / words.len() as f64
}

/// Keyword-based grading used when no model is available.
pub fn fallback_analysis(quote: &str, context: &str) -> QuoteAnalysis {
    let lower = quote.to_lowercase();
    let len = quote.chars().count();

    let length_score = (len as f64 / 200.0).min(1.0);
    let completeness = if quote.ends_with(['.', '!', '?']) {
        1.0
    } else {
        0.5
    };
    let business = word_share(&lower, BUSINESS_WORDS);
    let action = word_share(&lower, ACTION_WORDS);
    let result = word_share(&lower, RESULT_WORDS);
    let meaningful = (business + action + result) / 3.0;
    let practical = word_share(&lower, PRACTICAL_WORDS);
    let emotional = word_share(&lower, EMOTIONAL_WORDS);

    let quote_type = if len > 300 {
        QuoteType::FullParagraph
    } else if len > 150 {
        QuoteType::HalfParagraph
    } else {
        QuoteType::SpecificQuote
    };
    let context_len = context.chars().count();
    let context_score = if context_len > 0 {
        (len as f64 / context_len as f64).min(1.0)
    } else {
        0.5
    };
    let overall = (length_score + completeness + meaningful + practical + emotional) / 5.0;

    let (category, target_audience) = if business > 0.3 {
        ("business", "entrepreneurs, marketers")
    } else if action > 0.3 {
        ("action", "practitioners")
    } else {
        ("general", "general")
    };
    let sentiment = if emotional > 0.3 {
        "motivational"
    } else if practical > 0.3 {
        "practical"
    } else {
        "analytical"
    };

    let mut reasons = Vec::new();
    if meaningful > 0.3 {
        reasons.push("contains key business terms");
    }
    if practical > 0.3 {
        reasons.push("has practical value");
    }
    if emotional > 0.3 {
        reasons.push("evokes an emotional response");
    }
    if completeness > 0.8 {
        reasons.push("complete thought");
    }
    let reasoning = if reasons.is_empty() {
        "Standard quote".to_string()
    } else {
        format!("Quote {}", reasons.join(", "))
    };

    let mut topics = Vec::new();
    if business > 0.3 {
        topics.push("business strategy");
    }
    if action > 0.3 {
        topics.push("practical actions");
    }
    if result > 0.3 {
        topics.push("achieving results");
    }
    if practical > 0.3 {
        topics.push("practical advice");
    }
    if emotional > 0.3 {
        topics.push("motivation");
    }
    let summary = if topics.is_empty() {
        "General information".to_string()
    } else {
        format!("About {}", topics.join(", "))
    };

    QuoteAnalysis {
        text: quote.to_string(),
        quote_type,
        quality: QuoteQuality::from_score(overall),
        confidence: overall,
        context_score,
        practical_value: practical,
        completeness,
        target_audience: target_audience.to_string(),
        category: category.to_string(),
        sentiment: sentiment.to_string(),
        reasoning,
        summary,
    }
}

fn analysis_from_json(quote: &str, v: &Value) -> QuoteAnalysis {
    let s = |key: &str, default: &str| -> String {
        v.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    let f = |key: &str| -> f64 {
        v.get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0)
    };
    QuoteAnalysis {
        text: quote.to_string(),
        quote_type: v
            .get("quote_type")
            .and_then(Value::as_str)
            .and_then(QuoteType::parse)
            .unwrap_or(QuoteType::SpecificQuote),
        quality: v
            .get("quality")
            .and_then(Value::as_str)
            .and_then(QuoteQuality::parse)
            .unwrap_or(QuoteQuality::Average),
        confidence: f("confidence"),
        context_score: f("context_score"),
        practical_value: f("practical_value"),
        completeness: f("completeness"),
        target_audience: s("target_audience", "general"),
        category: s("category", "general"),
        sentiment: s("sentiment", "neutral"),
        reasoning: s("reasoning", ""),
        summary: s("summary", ""),
    }
}

/// Grade one span against its paragraph, with the fast model when available.
pub async fn analyze_quality(client: Option<&LlmClient>, quote: &str, context: &str) -> QuoteAnalysis {
    let Some(client) = client else {
        return fallback_analysis(quote, context);
    };
    let request = CompletionRequest::new(
        prompts::QUALITY_SYSTEM,
        prompts::quality_user(quote, truncate_chars(context, QUALITY_CONTEXT_CHARS)),
    )
    .temperature(0.2);

    match client.complete_json(ModelTier::Fast, &request).await {
        Ok(v) => analysis_from_json(quote, &v),
        Err(e) => {
            warn!("Quality analysis failed, using heuristics: {e}");
            fallback_analysis(quote, context)
        }
    }
}

/// The best (at most three) non-poor spans of a paragraph, by confidence.
pub async fn analyze_paragraph(client: Option<&LlmClient>, paragraph: &str) -> Vec<QuoteAnalysis> {
    if paragraph.trim().is_empty() {
        return Vec::new();
    }
    let cleaned = clean_fragment(paragraph);
    let structure = analyze_structure(&cleaned);
    let candidates = quote_candidates(&cleaned, &structure);

    let mut analyses = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let a = analyze_quality(client, candidate, &cleaned).await;
        if a.quality != QuoteQuality::Poor {
            analyses.push(a);
        }
    }
    analyses.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    analyses.truncate(TOP_PER_PARAGRAPH);
    debug!(
        "Paragraph: {} candidates, {} kept",
        candidates.len(),
        analyses.len()
    );
    analyses
}

/// Excellent and good quotes of one paragraph.
pub async fn quotes_from_paragraph(
    client: Option<&LlmClient>,
    page: usize,
    paragraph: &str,
) -> Vec<Quote> {
    analyze_paragraph(client, paragraph)
        .await
        .into_iter()
        .filter(|a| a.quality.is_publishable())
        .map(|a| a.into_quote(Some(page), paragraph))
        .collect()
}

/// Run [`quotes_from_paragraph`] over `(page, paragraph)` pairs, `concurrency`
/// paragraphs at a time, and return the results sorted by confidence with
/// duplicate texts removed.
pub async fn extract_smart_quotes(
    client: Option<&LlmClient>,
    paragraphs: &[(usize, String)],
    concurrency: usize,
    progress: &dyn ExtractionProgressCallback,
) -> Vec<Quote> {
    let total = paragraphs.len();
    let per_paragraph: Vec<Vec<Quote>> = stream::iter(paragraphs.iter().enumerate())
        .map(move |(i, (page, paragraph))| async move {
            progress.on_chunk_start(i + 1, total);
            let quotes = quotes_from_paragraph(client, *page, paragraph).await;
            progress.on_chunk_complete(i + 1, total, quotes.len());
            quotes
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut quotes: Vec<Quote> = per_paragraph.into_iter().flatten().collect();
    sort_by_confidence(&mut quotes);
    dedup_quotes(quotes)
}

// ── Engaging extraction ──────────────────────────────────────────────────

/// Longest engaging quote.
pub const ENGAGING_MAX_CHARS: usize = 250;
const ENGAGING_MIN_CHARS: usize = 30;
/// Quotes kept per chunk.
const ENGAGING_PER_CHUNK: usize = 2;
/// Longest chunk prefix sent to the model.
const ENGAGING_INPUT_CHARS: usize = 6000;
const HEURISTIC_MIN_SENTENCE_CHARS: usize = 60;

/// Markers of navigation or advertising text.
pub const BAD_MARKERS: &[&str] = &[
    "scan to download",
    "www.",
    "http://",
    "https://",
    "глава ",
    "оглавление",
];

const MARKETING_TERMS: &[&str] = &[
    "воронк", "конвер", "продаж", "лид", "трафик", "аудитори", "вниман", "оффер", "маркет",
    "запуск", "продукт", "вирус", "доход", "клиент", "ценност", "обещан",
];

static RE_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(есть|делай|нужно|должен|можно|стро(й|ить)|понимай|тестируй|запускай)\b")
        .unwrap()
});

/// True when `text` contains a navigation or advertising marker.
pub fn has_bad_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    BAD_MARKERS.iter().any(|m| lower.contains(m))
}

/// Sentences of at least 60 chars that mention a marketing term and an
/// action verb; at most two, cut to 250 chars.
pub fn heuristic_candidates(chunk: &str) -> Vec<Quote> {
    let mut out = Vec::new();
    for sentence in split_sentences(chunk) {
        if sentence.chars().count() < HEURISTIC_MIN_SENTENCE_CHARS {
            continue;
        }
        let lower = sentence.to_lowercase();
        if !MARKETING_TERMS.iter().any(|t| lower.contains(t)) || !RE_ACTION.is_match(&lower) {
            continue;
        }
        let text = truncate_chars(&sentence, ENGAGING_MAX_CHARS).trim();
        let mut q = Quote::new(text);
        q.original = chunk.to_string();
        q.engaging = true;
        q.category = "marketing".to_string();
        q.meta.sentiment = Some("motivational".to_string());
        q.meta.target_audience = Some("entrepreneurs, marketers".to_string());
        q.meta.length = Some(text.chars().count());
        out.push(q);
        if out.len() >= ENGAGING_PER_CHUNK {
            break;
        }
    }
    out
}

/// Check one model-proposed engaging quote and fill in its defaults.
fn engaging_from_item(item: &Value, chunk: &str) -> Option<Quote> {
    let text = item.get("quote").and_then(Value::as_str)?.trim();
    let len = text.chars().count();
    if !(ENGAGING_MIN_CHARS..=ENGAGING_MAX_CHARS).contains(&len)
        || !text.ends_with(['.', '!', '?', '…'])
        || has_bad_marker(text)
    {
        return None;
    }

    // A malformed item keeps only the checked text.
    let mut q: Quote = serde_json::from_value(item.clone()).unwrap_or_default();
    q.quote = text.to_string();
    if q.original.trim().is_empty() {
        q.original = chunk.to_string();
    }
    if q.translated.trim().is_empty() {
        q.translated = text.to_string();
    }
    if q.style.trim().is_empty() {
        q.style = "insight".to_string();
    }
    if q.category.trim().is_empty() {
        q.category = "general".to_string();
    }
    q.engaging = true;
    q.meta.length = Some(len);
    Some(q)
}

/// One or two engaging quotes from a chunk; heuristics when there is no
/// model or the call fails.
pub async fn extract_engaging(client: Option<&LlmClient>, chunk: &str) -> Vec<Quote> {
    if chunk.trim().is_empty() {
        return Vec::new();
    }
    let Some(client) = client else {
        return heuristic_candidates(chunk);
    };

    let request = CompletionRequest::new(
        prompts::ENGAGING_EXTRACT_SYSTEM,
        truncate_chars(chunk, ENGAGING_INPUT_CHARS),
    )
    .temperature(0.3);

    match client.complete_json(ModelTier::Fast, &request).await {
        Ok(v) => v
            .get("quotes")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| engaging_from_item(item, chunk))
                    .take(ENGAGING_PER_CHUNK)
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!("Engaging extraction failed, using heuristics: {e}");
            heuristic_candidates(chunk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use serde_json::json;

    const PARAGRAPH: &str = "Воронка продаж работает только тогда, когда клиент понимает ценность. \
        Важно показать результат ещё до того, как вы попросите деньги. \
        Например, бесплатный мини-курс даёт первый успех и строит доверие. \
        Нужно тестировать каждое предложение на небольшой аудитории.";

    #[test]
    fn clean_fragment_strips_artifacts() {
        assert_eq!(clean_fragment("  Продажи ■ это   доверие.  "), "Продажи  это доверие.");
        assert_eq!(clean_fragment("«Цитата» — и всё…"), "«Цитата» — и всё…");
    }

    #[test]
    fn structure_flags() {
        let s = analyze_structure(PARAGRAPH);
        assert_eq!(s.sentences.len(), 4);
        assert!(s.has_commands);
        assert!(s.has_examples);
        assert!(!s.has_questions);
        assert!(s.avg_sentence_chars() > 40.0);
    }

    #[test]
    fn meaningful_sentence_rules() {
        assert!(is_meaningful_sentence("Клиент покупает результат, а не процесс."));
        assert!(is_meaningful_sentence("Customers buy outcomes, not features."));
        assert!(!is_meaningful_sentence("Глава 3 посвящена клиентам и продажам."));
        assert!(!is_meaningful_sentence("12. Клиент всегда прав."));
        assert!(!is_meaningful_sentence("Погода сегодня была тёплой и ясной."));
    }

    #[test]
    fn meaningful_indicators_match_inflected_forms() {
        assert!(is_meaningful_sentence("Продажи растут, когда воронку строят под клиентов."));
        assert!(is_meaningful_sentence("Конверсия зависит от одного обещания."));
        assert!(is_meaningful_sentence("A funnel without follow-up leaks revenue."));
        assert!(!is_meaningful_sentence("Продавец вышел из комнаты."));
    }

    #[test]
    fn candidates_cover_all_span_kinds_without_duplicates() {
        let cleaned = clean_fragment(PARAGRAPH);
        let s = analyze_structure(&cleaned);
        let c = quote_candidates(&cleaned, &s);

        assert_eq!(c[0], cleaned, "whole paragraph first");
        assert!(c.contains(&s.sentences[..2].join(" ")));
        assert!(c.contains(&s.sentences[0]));
        assert!(c.contains(&s.sentences[2..].join(" ")));
        let mut sorted = c.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), c.len());
    }

    #[test]
    fn long_paragraph_is_not_a_candidate_itself() {
        let long = PARAGRAPH.repeat(3);
        let cleaned = clean_fragment(&long);
        let s = analyze_structure(&cleaned);
        assert!(!quote_candidates(&cleaned, &s).contains(&cleaned));
    }

    #[test]
    fn fallback_analysis_scores() {
        let a = fallback_analysis("Короткая мысль без точки", "");
        assert_eq!(a.completeness, 0.5);
        assert_eq!(a.context_score, 0.5);
        assert_eq!(a.quote_type, QuoteType::SpecificQuote);
        assert_eq!(a.quality, QuoteQuality::Poor);
        assert_eq!(a.reasoning, "Standard quote");
        assert_eq!(a.summary, "General information");
        assert!(a.confidence < 0.4);
    }

    #[test]
    fn fallback_analysis_detects_business_text() {
        let text = "Продажи и маркетинг: клиент, доход и прибыль зависят от воронки и конверсии.";
        let a = fallback_analysis(text, text);
        assert_eq!(a.category, "business");
        assert_eq!(a.target_audience, "entrepreneurs, marketers");
        assert_eq!(a.context_score, 1.0);
        assert!(a.summary.starts_with("About business strategy"));
        assert!(a.reasoning.contains("complete thought"));
    }

    #[test]
    fn quality_buckets() {
        assert_eq!(QuoteQuality::from_score(0.85), QuoteQuality::Excellent);
        assert_eq!(QuoteQuality::from_score(0.6), QuoteQuality::Good);
        assert_eq!(QuoteQuality::from_score(0.45), QuoteQuality::Average);
        assert_eq!(QuoteQuality::from_score(0.1), QuoteQuality::Poor);
        assert!(QuoteQuality::Good.is_publishable());
        assert!(!QuoteQuality::Average.is_publishable());
    }

    #[test]
    fn json_analysis_uses_defaults() {
        let a = analysis_from_json("q", &json!({"quality": "excellent", "confidence": 0.9}));
        assert_eq!(a.quality, QuoteQuality::Excellent);
        assert_eq!(a.confidence, 0.9);
        assert_eq!(a.practical_value, 0.5);
        assert_eq!(a.sentiment, "neutral");
        assert_eq!(a.quote_type, QuoteType::SpecificQuote);

        let b = analysis_from_json("q", &json!({"quality": "superb", "quote_type": "x"}));
        assert_eq!(b.quality, QuoteQuality::Average);
    }

    #[test]
    fn analysis_into_quote() {
        let mut a = analysis_from_json("Доверие продаёт.", &json!({"quality": "excellent"}));
        a.summary = "trust".into();
        let q = a.into_quote(Some(7), "paragraph");
        assert!(q.engaging);
        assert_eq!(q.page, Some(7));
        assert_eq!(q.translated, "Доверие продаёт.");
        assert_eq!(q.meta.length, Some(16));
        assert_eq!(q.meta.quote_type, Some(QuoteType::SpecificQuote));
    }

    #[tokio::test]
    async fn offline_paragraph_analysis_keeps_at_most_three() {
        let analyses = analyze_paragraph(None, PARAGRAPH).await;
        assert!(analyses.len() <= TOP_PER_PARAGRAPH);
        assert!(analyses.iter().all(|a| a.quality != QuoteQuality::Poor));
        assert!(analyses.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(analyze_paragraph(None, "   ").await.is_empty());
    }

    #[tokio::test]
    async fn offline_smart_extraction_only_returns_publishable() {
        let paragraphs = vec![(1, PARAGRAPH.to_string()), (2, PARAGRAPH.to_string())];
        let quotes = extract_smart_quotes(None, &paragraphs, 2, &NoopProgressCallback).await;
        assert!(quotes.iter().all(|q| q.meta.confidence.unwrap_or(0.0) >= 0.6));
        let mut keys: Vec<_> = quotes.iter().map(|q| q.dedup_key().to_string()).collect();
        keys.dedup();
        assert_eq!(keys.len(), quotes.len());
    }

    #[test]
    fn heuristic_candidates_need_term_and_action() {
        let chunk = "Нужно строить воронку так, чтобы каждый шаг приближал клиента к покупке. \
                     Воронка продаж — это просто схема, которую рисуют на доске маркетологи. \
                     Каждый оффер нужно тестировать на маленькой аудитории прежде запуска. \
                     Можно запускать рекламу только после того, как продукт доказал ценность.";
        let quotes = heuristic_candidates(chunk);
        assert_eq!(quotes.len(), 2);
        assert!(quotes[0].quote.starts_with("Нужно строить воронку"));
        assert!(quotes[1].quote.starts_with("Каждый оффер"));
        assert!(quotes.iter().all(|q| q.engaging && q.category == "marketing"));
        assert_eq!(quotes[0].meta.length, Some(quotes[0].char_len()));
    }

    #[test]
    fn engaging_item_filters() {
        let chunk = "chunk";
        let ok = json!({"quote": "Клиент покупает не продукт, а лучшую версию себя!", "category": "sales"});
        let q = engaging_from_item(&ok, chunk).unwrap();
        assert_eq!(q.original, "chunk");
        assert_eq!(q.translated, q.quote);
        assert_eq!(q.category, "sales");
        assert!(q.engaging);

        let no_end = json!({"quote": "Клиент покупает не продукт, а лучшую версию себя"});
        assert!(engaging_from_item(&no_end, chunk).is_none());
        let short = json!({"quote": "Коротко."});
        assert!(engaging_from_item(&short, chunk).is_none());
        let link = json!({"quote": "Подробнее о воронках читайте на www.example.com сегодня."});
        assert!(engaging_from_item(&link, chunk).is_none());
    }

    #[tokio::test]
    async fn engaging_offline_uses_heuristics() {
        assert!(extract_engaging(None, "   ").await.is_empty());
        let chunk = "Нужно строить воронку так, чтобы каждый шаг приближал клиента к покупке.";
        assert_eq!(extract_engaging(None, chunk).await.len(), 1);
    }
}
