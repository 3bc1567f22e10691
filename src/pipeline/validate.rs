//! Multi-stage quote validation for Threads publication.
//!
//! ```text
//!  quote ──▶ basic ──▶ meaningfulness ──▶ threads_optimization ──▶ final_quality
//!              │             │                    │                      │
//!           length,      ending, verbs,     fit into 500 chars,    meta scores
//!           junk text    word counts        readability            (confidence…)
//! ```
//!
//! A failed `basic` or `meaningfulness` stage stops the chain. The
//! optimisation stage never fails; it may rewrite the text (truncation),
//! and every later stage sees the rewritten text.
//!
//! An optional fifth stage, [`check_topic_relevance`], asks the fast model
//! whether a quote is on-topic. It is async and lives outside
//! [`QuoteValidator`] so the four rule-based stages stay pure.

use crate::pipeline::chunk::{collapse_whitespace, split_sentences, truncate_chars};
use crate::pipeline::llm::{parse_json_response, CompletionRequest, LlmClient, ModelTier};
use crate::prompts;
use crate::quote::{Quote, StageRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

// ── Stage and status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Basic,
    Meaningfulness,
    ThreadsOptimization,
    FinalQuality,
    TopicRelevance,
}

impl ValidationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStage::Basic => "basic",
            ValidationStage::Meaningfulness => "meaningfulness",
            ValidationStage::ThreadsOptimization => "threads_optimization",
            ValidationStage::FinalQuality => "final_quality",
            ValidationStage::TopicRelevance => "topic_relevance",
        }
    }
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Warning,
    /// Passed after the text was rewritten.
    Optimized,
}

impl ValidationStatus {
    /// Everything except `Failed`.
    pub fn is_acceptable(self) -> bool {
        !matches!(self, ValidationStatus::Failed)
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage: ValidationStage,
    pub status: ValidationStatus,
    pub message: String,
    /// Text after this stage; later stages work on it.
    pub quote: String,
    /// 0.0 – 1.0.
    pub score: f64,
    pub details: Map<String, Value>,
}

impl StageResult {
    fn new(
        stage: ValidationStage,
        status: ValidationStatus,
        message: impl Into<String>,
        quote: impl Into<String>,
        score: f64,
        details: Map<String, Value>,
    ) -> Self {
        StageResult {
            stage,
            status,
            message: message.into(),
            quote: quote.into(),
            score,
            details,
        }
    }

    pub fn passed(&self) -> bool {
        self.status.is_acceptable()
    }

    /// The audit-trail form stored in [`crate::quote::QuoteMeta`].
    pub fn to_record(&self) -> StageRecord {
        StageRecord {
            status: self.status,
            score: self.score,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

/// All stages that ran for one quote, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub stages: Vec<StageResult>,
}

impl ValidationReport {
    /// Every stage that ran is passed, optimized or warning.
    pub fn passed(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(StageResult::passed)
    }

    pub fn stage(&self, stage: ValidationStage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn first_failure(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.passed())
    }

    /// Text produced by the optimisation stage, if it ran.
    pub fn final_text(&self) -> Option<&str> {
        self.stage(ValidationStage::ThreadsOptimization)
            .map(|s| s.quote.as_str())
    }

    /// Score of the final-quality stage, if it ran.
    pub fn final_score(&self) -> Option<f64> {
        self.stage(ValidationStage::FinalQuality).map(|s| s.score)
    }
}

// ── Configuration ────────────────────────────────────────────────────────

/// Length limits, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Hard Threads limit.
    pub max_length: usize,
    /// Anything shorter is not a quote.
    pub min_length: usize,
    pub optimal_min: usize,
    pub optimal_max: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_length: 500,
            min_length: 30,
            optimal_min: 100,
            optimal_max: 400,
        }
    }
}

impl ValidatorConfig {
    /// Checks the ordering `min < max` and `min ≤ optimal_min ≤ optimal_max ≤ max`.
    pub fn check(&self) -> Result<(), String> {
        if self.min_length >= self.max_length {
            return Err(format!(
                "validator min length ({}) must be below max length ({})",
                self.min_length, self.max_length
            ));
        }
        if self.optimal_min > self.optimal_max
            || self.optimal_min < self.min_length
            || self.optimal_max > self.max_length
        {
            return Err(format!(
                "optimal length range {}..={} must lie inside {}..={}",
                self.optimal_min, self.optimal_max, self.min_length, self.max_length
            ));
        }
        Ok(())
    }
}

// ── Rules ────────────────────────────────────────────────────────────────

const FORBIDDEN_PATTERNS: &[&str] = &[
    r"scan to download",
    r"www\.",
    r"https?://",
    r"глава\s+\d+",
    r"оглавление",
    r"содержание",
    r"page\s+\d+",
    r"стр\.\s*\d+",
    r"©",
    r"copyright",
    r"\bизд\b",
    r"издательство",
];

const INCOMPLETE_MARKERS: &[&str] = &[r"\.\.\.$", r",\s*$", r":\s*$", r"—\s*$", r"\*\s*$"];

/// Russian infinitive / present / past endings, plus common English verbs.
const VERB_PATTERNS: &[&str] = &[
    r"\b\w+(ать|ить|еть|уть|ют|ит|ет|ут|ят|ат)\b",
    r"\b\w+(ал|ил|ел|ала|ила|ела|али|или|ели)\b",
    r"\b(is|are|was|were|be|been|has|have|had|do|does|did|can|will|would|should|must|make|makes|made|get|gets|need|needs|sell|sells|buy|buys)\b",
    r"\b\w{3,}(ed|ing)\b",
];

const PROPER_ENDINGS: &[char] = &['.', '!', '?', '…', '"', '\'', '»', '”'];

/// Words longer than this hurt readability.
const LONG_WORD_CHARS: usize = 20;

fn compile_all(patterns: &'static [&'static str], case_insensitive: bool) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .map(|p| {
            let src = if case_insensitive {
                format!("(?i){p}")
            } else {
                p.to_string()
            };
            (*p, Regex::new(&src).unwrap())
        })
        .collect()
}

static RE_FORBIDDEN: Lazy<Vec<(&'static str, Regex)>> =
    Lazy::new(|| compile_all(FORBIDDEN_PATTERNS, true));
static RE_INCOMPLETE: Lazy<Vec<(&'static str, Regex)>> =
    Lazy::new(|| compile_all(INCOMPLETE_MARKERS, false));
static RE_VERBS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| compile_all(VERB_PATTERNS, true));

fn matching(rules: &[(&'static str, Regex)], text: &str) -> Vec<Value> {
    rules
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(p, _)| Value::from(*p))
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ── Validator ────────────────────────────────────────────────────────────

/// The rule-based four-stage validator.
#[derive(Debug, Clone, Default)]
pub struct QuoteValidator {
    config: ValidatorConfig,
}

impl QuoteValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run the chain on `quote.quote`.
    pub fn validate(&self, quote: &Quote) -> ValidationReport {
        let mut report = ValidationReport::default();

        let basic = self.basic(quote.quote.trim());
        let stop = !basic.passed();
        let text = basic.quote.clone();
        report.stages.push(basic);
        if stop {
            return report;
        }

        let meaning = self.meaningfulness(&text);
        let stop = !meaning.passed();
        report.stages.push(meaning);
        if stop {
            return report;
        }

        let optimized = self.optimize(&text);
        let text = optimized.quote.clone();
        report.stages.push(optimized);

        report.stages.push(self.final_quality(&text, quote));
        report
    }

    /// Validate and, on success, return the quote rewritten to its
    /// Threads-ready text with the audit trail recorded in `meta`.
    ///
    /// `quote` and `translated` both become the optimised text, so a
    /// truncated quote never keeps an over-long translation.
    pub fn validated_quote(&self, quote: &Quote) -> Option<Quote> {
        let report = self.validate(quote);
        Self::apply(quote, &report)
    }

    /// Apply a finished report to `quote`: `None` when it failed, the
    /// rewritten quote otherwise.
    pub fn apply(quote: &Quote, report: &ValidationReport) -> Option<Quote> {
        if !report.passed() {
            if let Some(f) = report.first_failure() {
                debug!("Quote rejected at {}: {}", f.stage, f.message);
            }
            return None;
        }

        let text = report.final_text()?.to_string();
        let mut out = quote.clone();
        out.translated = text.clone();
        out.quote = text;

        let len = out.char_len();
        out.meta.validated = true;
        out.meta.threads_ready = true;
        out.meta.validation_score = report.final_score();
        out.meta.final_length = Some(len);
        out.meta.length = Some(len);
        out.meta.validation_level = Some("full".to_string());
        record_stages(&mut out, report);
        Some(out)
    }

    /// Only the `basic` stage. Used for fallback quotes when full
    /// validation leaves too few.
    pub fn basic_only(&self, text: &str) -> StageResult {
        self.basic(text.trim())
    }

    // ── Stage 1 ──────────────────────────────────────────────────────────

    pub fn basic(&self, text: &str) -> StageResult {
        use ValidationStage::Basic;
        let mut details = Map::new();
        let mut score = 1.0;

        let length = char_len(text);
        details.insert("length".into(), json!(length));

        if length < self.config.min_length {
            return StageResult::new(
                Basic,
                ValidationStatus::Failed,
                format!(
                    "Quote too short ({length} chars, minimum {})",
                    self.config.min_length
                ),
                text,
                0.0,
                details,
            );
        }

        if length > self.config.max_length {
            score *= 0.5;
            details.insert("too_long".into(), json!(true));
        }

        let forbidden = matching(&RE_FORBIDDEN, text);
        if !forbidden.is_empty() {
            let list = forbidden
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            details.insert("forbidden_patterns".into(), Value::Array(forbidden));
            return StageResult::new(
                Basic,
                ValidationStatus::Failed,
                format!("Forbidden patterns found: {list}"),
                text,
                0.0,
                details,
            );
        }

        let cleaned = collapse_whitespace(text);
        details.insert("cleaned".into(), json!(cleaned != text));

        StageResult::new(
            Basic,
            ValidationStatus::Passed,
            "Basic validation passed",
            cleaned,
            score,
            details,
        )
    }

    // ── Stage 2 ──────────────────────────────────────────────────────────

    pub fn meaningfulness(&self, text: &str) -> StageResult {
        use ValidationStage::Meaningfulness;
        let mut details = Map::new();
        let mut score = 1.0;

        let proper_ending = text.ends_with(PROPER_ENDINGS);
        details.insert("has_proper_ending".into(), json!(proper_ending));
        if !proper_ending {
            score *= 0.3;
            details.insert("ending_issue".into(), json!("no terminal punctuation"));
        }

        let incomplete = matching(&RE_INCOMPLETE, text);
        if !incomplete.is_empty() {
            details.insert("incomplete_markers".into(), Value::Array(incomplete));
            score *= 0.2;
        }

        let has_verbs = RE_VERBS.iter().any(|(_, re)| re.is_match(text));
        details.insert("has_verbs".into(), json!(has_verbs));
        if !has_verbs {
            score *= 0.7;
            details.insert("verb_issue".into(), json!("possibly not a full sentence"));
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let word_count = words.len();
        details.insert("word_count".into(), json!(word_count));

        if word_count < 5 {
            return StageResult::new(
                Meaningfulness,
                ValidationStatus::Failed,
                format!("Too few words ({word_count})"),
                text,
                0.0,
                details,
            );
        }

        let meaningful = words
            .iter()
            .filter(|w| char_len(w) > 3 && !w.chars().all(char::is_numeric))
            .count();
        let ratio = meaningful as f64 / word_count as f64;
        details.insert("meaningful_words_ratio".into(), json!(ratio));
        if ratio < 0.5 {
            score *= 0.5;
            details.insert("content_issue".into(), json!("few meaningful words"));
        }

        let (status, message) = if score < 0.5 {
            (ValidationStatus::Failed, "Quote is not a complete thought")
        } else if score < 0.8 {
            (ValidationStatus::Warning, "Quote passed with warnings")
        } else {
            (ValidationStatus::Passed, "Quote is complete and meaningful")
        };
        StageResult::new(Meaningfulness, status, message, text, score, details)
    }

    // ── Stage 3 ──────────────────────────────────────────────────────────

    pub fn optimize(&self, text: &str) -> StageResult {
        let cfg = &self.config;
        let mut details = Map::new();
        let mut score = 1.0;
        let length = char_len(text);
        details.insert("original_length".into(), json!(length));

        let optimized = if length > cfg.max_length {
            let truncated = self.truncate(text);
            details.insert("was_truncated".into(), json!(true));
            details.insert("new_length".into(), json!(char_len(&truncated)));
            score = 0.8;
            truncated
        } else {
            text.to_string()
        };

        let new_len = char_len(&optimized);
        if (cfg.optimal_min..=cfg.optimal_max).contains(&new_len) {
            details.insert("optimal_length".into(), json!(true));
        } else if new_len < cfg.optimal_min {
            details.insert("shorter_than_optimal".into(), json!(true));
            score *= 0.9;
        } else {
            details.insert("longer_than_optimal".into(), json!(true));
            score *= 0.95;
        }

        let long_words: Vec<Value> = optimized
            .split_whitespace()
            .filter(|w| char_len(w) > LONG_WORD_CHARS)
            .map(Value::from)
            .collect();
        if !long_words.is_empty() {
            details.insert("long_words".into(), Value::Array(long_words));
            score *= 0.9;
        }

        let status = if new_len != length {
            ValidationStatus::Optimized
        } else {
            ValidationStatus::Passed
        };
        StageResult::new(
            ValidationStage::ThreadsOptimization,
            status,
            format!("Optimised for Threads ({new_len} chars)"),
            optimized,
            score,
            details,
        )
    }

    /// Whole sentences while they fit; else words up to `max - 3` plus "...".
    fn truncate(&self, text: &str) -> String {
        let max = self.config.max_length;

        let mut out = String::new();
        let mut used = 0;
        for sentence in split_sentences(text) {
            let n = char_len(&sentence);
            if used + n + 1 > max {
                break;
            }
            out.push_str(&sentence);
            out.push(' ');
            used += n + 1;
        }
        let out = out.trim_end().to_string();
        if char_len(&out) >= self.config.min_length {
            return out;
        }

        let budget = max.saturating_sub(3);
        let mut out = String::new();
        let mut used = 0;
        for word in text.split_whitespace() {
            let n = char_len(word);
            if used + n + 1 > budget {
                break;
            }
            out.push_str(word);
            out.push(' ');
            used += n + 1;
        }
        let mut out = out.trim_end().to_string();
        if out.is_empty() {
            // One giant token: a hard cut is the only option.
            out = truncate_chars(text, budget).to_string();
        }
        out.push_str("...");
        out
    }

    // ── Stage 4 ──────────────────────────────────────────────────────────

    pub fn final_quality(&self, text: &str, quote: &Quote) -> StageResult {
        let mut details = Map::new();
        let mut score = 1.0;

        let length = char_len(text);
        details.insert("final_length".into(), json!(length));
        details.insert(
            "within_threads_limit".into(),
            json!(length <= self.config.max_length),
        );

        let meta = &quote.meta;
        if let Some(c) = meta.confidence {
            details.insert("confidence".into(), json!(c));
            score *= c;
        }
        if let Some(pv) = meta.practical_value {
            details.insert("practical_value".into(), json!(pv));
            score *= 0.5 + pv * 0.5;
        }
        if let Some(c) = meta.completeness {
            details.insert("completeness".into(), json!(c));
            score *= 0.7 + c * 0.3;
        }
        details.insert("category".into(), json!(quote.category));
        details.insert("style".into(), json!(quote.style));
        details.insert("final_score".into(), json!(score));

        let (status, message) = if score < 0.5 {
            (
                ValidationStatus::Failed,
                format!("Low final quality (score: {score:.2})"),
            )
        } else if score < 0.7 {
            (
                ValidationStatus::Warning,
                format!("Average quality (score: {score:.2})"),
            )
        } else {
            (
                ValidationStatus::Passed,
                format!("Excellent quality (score: {score:.2})"),
            )
        };
        StageResult::new(
            ValidationStage::FinalQuality,
            status,
            message,
            text,
            score,
            details,
        )
    }
}

/// Store each stage outcome in `quote.meta.validation_stages`.
pub fn record_stages(quote: &mut Quote, report: &ValidationReport) {
    for stage in &report.stages {
        quote
            .meta
            .validation_stages
            .insert(stage.stage.as_str().to_string(), stage.to_record());
    }
}

// ── Topic relevance ──────────────────────────────────────────────────────

const JUNK_MARKERS: &[&str] = &[
    "scan to download",
    "www.",
    "http://",
    "https://",
    "оглавление",
    "содержание",
    "copyright",
];

/// Fallback acceptance length when no model can be asked.
const RELEVANCE_FALLBACK_CHARS: usize = 60;

/// Longest quote sent to the model.
const RELEVANCE_MAX_CHARS: usize = 6000;

/// Ask the fast model whether `text` is on-topic, useful and free of
/// advertising. Without a client, or when the call fails, quotes of at
/// least 60 characters pass.
pub async fn check_topic_relevance(
    client: Option<&LlmClient>,
    text: &str,
    topic: &str,
    author: &str,
) -> StageResult {
    use ValidationStage::TopicRelevance;
    let text = text.trim();
    let mut details = Map::new();

    if text.is_empty() {
        return StageResult::new(
            TopicRelevance,
            ValidationStatus::Failed,
            "Empty quote",
            text,
            0.0,
            details,
        );
    }

    let lower = text.to_lowercase();
    if let Some(marker) = JUNK_MARKERS.iter().find(|m| lower.contains(*m)) {
        details.insert("junk_marker".into(), json!(marker));
        return StageResult::new(
            TopicRelevance,
            ValidationStatus::Failed,
            format!("Service text marker '{marker}'"),
            text,
            0.0,
            details,
        );
    }

    let fallback = |details: Map<String, Value>, why: &str| {
        let ok = char_len(text) >= RELEVANCE_FALLBACK_CHARS;
        StageResult::new(
            TopicRelevance,
            if ok {
                ValidationStatus::Warning
            } else {
                ValidationStatus::Failed
            },
            format!("{why}; length heuristic {}", if ok { "passed" } else { "failed" }),
            text,
            if ok { 0.6 } else { 0.0 },
            details,
        )
    };

    let Some(client) = client else {
        details.insert("method".into(), json!("heuristic"));
        return fallback(details, "No LLM configured");
    };

    let request = CompletionRequest::new(
        prompts::topic_relevance_system(topic, author),
        truncate_chars(text, RELEVANCE_MAX_CHARS),
    )
    .temperature(0.0)
    .max_tokens(50)
    .json();

    match client.complete(ModelTier::Fast, &request).await {
        Ok(resp) => {
            details.insert("method".into(), json!("llm"));
            let valid = parse_json_response(&resp.content)
                .and_then(|v| v.get("valid").and_then(Value::as_bool))
                .unwrap_or(false);
            details.insert("valid".into(), json!(valid));
            if valid {
                StageResult::new(
                    TopicRelevance,
                    ValidationStatus::Passed,
                    "On topic",
                    text,
                    1.0,
                    details,
                )
            } else {
                StageResult::new(
                    TopicRelevance,
                    ValidationStatus::Failed,
                    "Model judged the quote off-topic or not useful",
                    text,
                    0.0,
                    details,
                )
            }
        }
        Err(e) => {
            warn!("Topic relevance check failed, using length heuristic: {e}");
            details.insert("method".into(), json!("heuristic"));
            details.insert("error".into(), json!(e.to_string()));
            fallback(details, "LLM check failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "Клиенты покупают не продукт, а результат, который он им даёт. \
                        Поэтому продавать нужно трансформацию, а не характеристики.";

    fn validator() -> QuoteValidator {
        QuoteValidator::default()
    }

    #[test]
    fn short_text_fails_basic() {
        let r = validator().basic("Слишком коротко.");
        assert_eq!(r.status, ValidationStatus::Failed);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.details["length"], 16);
    }

    #[test]
    fn forbidden_pattern_fails_basic() {
        let r = validator().basic("Подробности читайте на www.example.com прямо сейчас.");
        assert_eq!(r.status, ValidationStatus::Failed);
        assert!(r.message.contains(r"www\."));

        let r = validator().basic("Это важная мысль из Главы 5 и ГЛАВА 7 книги автора.");
        assert_eq!(r.status, ValidationStatus::Failed);
    }

    #[test]
    fn basic_collapses_whitespace() {
        let r = validator().basic("Продажи   начинаются\n с доверия к тому, кто продаёт.");
        assert_eq!(r.status, ValidationStatus::Passed);
        assert_eq!(r.quote, "Продажи начинаются с доверия к тому, кто продаёт.");
        assert_eq!(r.details["cleaned"], true);
    }

    #[test]
    fn long_text_halves_basic_score() {
        let text = "Слово ".repeat(100);
        let r = validator().basic(&text);
        assert_eq!(r.status, ValidationStatus::Passed);
        assert_eq!(r.score, 0.5);
        assert_eq!(r.details["too_long"], true);
    }

    #[test]
    fn meaningful_sentence_passes() {
        let r = validator().meaningfulness(GOOD);
        assert_eq!(r.status, ValidationStatus::Passed, "{:?}", r.details);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn english_sentence_has_verbs() {
        let r = validator()
            .meaningfulness("People buy outcomes, and every offer needs a clear promise.");
        assert_eq!(r.details["has_verbs"], true);
        assert_eq!(r.status, ValidationStatus::Passed);
    }

    #[test]
    fn trailing_comma_fails_meaningfulness() {
        // no ending ×0.3, incomplete marker ×0.2
        let r = validator().meaningfulness("Первое правило продаж звучит очень просто,");
        assert_eq!(r.status, ValidationStatus::Failed);
        assert!(r.score < 0.1);
    }

    #[test]
    fn too_few_words_fails() {
        let r = validator().meaningfulness("Доверие решает всё всегда.");
        assert_eq!(r.status, ValidationStatus::Failed);
        assert_eq!(r.details["word_count"], 4);
    }

    #[test]
    fn missing_verbs_is_a_warning() {
        let r = validator().meaningfulness("Главный актив компании: доверие клиентов и репутация бренда.");
        assert_eq!(r.details["has_verbs"], false);
        assert_eq!(r.status, ValidationStatus::Warning);
        assert!((r.score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn optimize_keeps_optimal_text() {
        let r = validator().optimize(GOOD);
        assert_eq!(r.status, ValidationStatus::Passed);
        assert_eq!(r.quote, GOOD);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn optimize_penalises_short_text() {
        let r = validator().optimize("Продажи начинаются с доверия к продавцу.");
        assert!((r.score - 0.9).abs() < 1e-9);
        assert_eq!(r.details["shorter_than_optimal"], true);
    }

    #[test]
    fn optimize_truncates_by_sentences() {
        let sentence = "Каждая продажа начинается с понятного обещания результата клиенту.";
        let text = std::iter::repeat(sentence).take(12).collect::<Vec<_>>().join(" ");
        assert!(char_len(&text) > 500);

        let r = validator().optimize(&text);
        assert_eq!(r.status, ValidationStatus::Optimized);
        assert!(char_len(&r.quote) <= 500);
        assert!(r.quote.ends_with('.'));
        assert_eq!(r.details["was_truncated"], true);
        // 0.8 then ×0.95 for being longer than optimal.
        assert!((r.score - 0.76).abs() < 1e-9);
    }

    #[test]
    fn optimize_falls_back_to_words() {
        let text = "слово ".repeat(120);
        let r = validator().optimize(text.trim());
        assert!(r.quote.ends_with("..."));
        assert!(char_len(&r.quote) <= 500);
        assert_eq!(r.status, ValidationStatus::Optimized);
    }

    #[test]
    fn optimize_flags_long_words() {
        let r = validator().optimize(
            "Сверхпереусложнённоструктурированный подход почти всегда проигрывает простому.",
        );
        assert!(r.details.contains_key("long_words"));
    }

    #[test]
    fn final_quality_multiplies_meta_scores() {
        let mut q = Quote::new(GOOD);
        q.meta.confidence = Some(0.9);
        q.meta.practical_value = Some(0.8);
        q.meta.completeness = Some(1.0);
        let r = validator().final_quality(GOOD, &q);
        // 0.9 × 0.9 × 1.0
        assert!((r.score - 0.81).abs() < 1e-9);
        assert_eq!(r.status, ValidationStatus::Passed);

        q.meta.confidence = Some(0.4);
        let r = validator().final_quality(GOOD, &q);
        assert_eq!(r.status, ValidationStatus::Failed);
    }

    #[test]
    fn final_quality_without_meta_is_perfect() {
        let q = Quote::new(GOOD);
        let r = validator().final_quality(GOOD, &q);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.details["category"], "general");
    }

    #[test]
    fn chain_stops_after_basic_failure() {
        let report = validator().validate(&Quote::new("коротко"));
        assert!(!report.passed());
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.first_failure().unwrap().stage, ValidationStage::Basic);
    }

    #[test]
    fn validated_quote_records_audit_trail() {
        let mut q = Quote::new(format!("  {GOOD}  "));
        q.meta.confidence = Some(0.95);
        let out = validator().validated_quote(&q).unwrap();

        assert_eq!(out.quote, GOOD);
        assert_eq!(out.translated, GOOD);
        assert!(out.meta.validated);
        assert!(out.meta.threads_ready);
        assert_eq!(out.meta.validation_level.as_deref(), Some("full"));
        assert_eq!(out.meta.final_length, Some(char_len(GOOD)));
        assert_eq!(out.meta.validation_stages.len(), 4);
        assert_eq!(
            out.meta.validation_stages["final_quality"].status,
            ValidationStatus::Passed
        );
    }

    #[test]
    fn validated_quote_replaces_translation_with_final_text() {
        let mut q = Quote::new(GOOD);
        q.translated = "Customers buy the result, not the product.".into();
        let out = validator().validated_quote(&q).unwrap();
        assert_eq!(out.translated, GOOD);
    }

    #[test]
    fn truncated_quote_drops_longer_translation() {
        let long = "Every sales funnel must begin with a clear promise of a concrete result. "
            .repeat(9);
        let mut q = Quote::new(long.trim());
        q.translated = format!("{} (separate translation)", long.trim());
        assert!(char_len(&q.translated) > 600);

        let out = validator().validated_quote(&q).unwrap();
        assert!(char_len(&out.quote) <= 500);
        assert_eq!(out.translated, out.quote);
        assert!(char_len(out.publish_text()) <= 500);
        assert_eq!(
            out.meta.validation_stages["threads_optimization"].status,
            ValidationStatus::Optimized
        );
    }

    #[test]
    fn validated_quote_rejects_low_confidence() {
        let mut q = Quote::new(GOOD);
        q.meta.confidence = Some(0.3);
        assert!(validator().validated_quote(&q).is_none());
    }

    #[test]
    fn config_check_rejects_bad_ranges() {
        assert!(ValidatorConfig::default().check().is_ok());
        let bad = ValidatorConfig {
            min_length: 600,
            ..Default::default()
        };
        assert!(bad.check().is_err());
        let bad = ValidatorConfig {
            optimal_max: 900,
            ..Default::default()
        };
        assert!(bad.check().is_err());
    }

    #[test]
    fn status_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&ValidationStatus::Optimized).unwrap(),
            "\"optimized\""
        );
        assert_eq!(ValidationStage::ThreadsOptimization.to_string(), "threads_optimization");
    }

    #[tokio::test]
    async fn relevance_without_llm_uses_length() {
        let r = check_topic_relevance(None, GOOD, "sales", "").await;
        assert_eq!(r.status, ValidationStatus::Warning);

        let r = check_topic_relevance(None, "Короткая мысль о продажах.", "sales", "").await;
        assert_eq!(r.status, ValidationStatus::Failed);
    }

    #[tokio::test]
    async fn relevance_rejects_junk_markers() {
        let r = check_topic_relevance(
            None,
            "Scan to download the full version of this book and many others today.",
            "",
            "",
        )
        .await;
        assert_eq!(r.status, ValidationStatus::Failed);
        assert_eq!(r.details["junk_marker"], "scan to download");
    }
}
