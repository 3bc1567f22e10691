//! Configuration for quote extraction.
//!
//! Every knob of a run lives in [`ExtractionConfig`], built through
//! [`ExtractionConfigBuilder`]. The builder clamps numeric settings into
//! their sane range and `build()` rejects combinations that cannot work
//! (e.g. `min_quotes > max_quotes`).

use crate::error::QuoteError;
use crate::pipeline::llm::CompletionBackend;
use crate::pipeline::validate::ValidatorConfig;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for extracting quotes from one book.
///
/// # Example
/// ```rust
/// use edgequake_quotes::{ExtractionConfig, Strategy};
///
/// let config = ExtractionConfig::builder()
///     .strategy(Strategy::Smart)
///     .max_quotes(30)
///     .target_language("ru")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_quotes, 30);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Concurrent LLM calls during chunk extraction. Default: 4.
    pub concurrency: usize,

    /// Smart-tier model, e.g. "gpt-4o". `None` uses the provider default.
    pub model: Option<String>,

    /// Fast-tier model for classification calls. `None` reuses `model`
    /// (or `gpt-4o-mini` on the OpenAI fallback).
    pub fast_model: Option<String>,

    /// Provider name ("openai", "anthropic", "ollama", …).
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed completion backend. Takes precedence over everything.
    pub backend: Option<Arc<dyn CompletionBackend>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Max generated tokens per call. Default: 2048.
    pub max_tokens: usize,

    /// Retries on a failed LLM call. Default: 3.
    pub max_retries: u32,

    /// Initial backoff, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call LLM timeout. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password.
    pub password: Option<String>,

    /// Which pages to read. Default: all.
    pub pages: PageSelection,

    /// Extraction strategy. Default: [`Strategy::Structured`].
    pub strategy: Strategy,

    /// Below this many validated quotes, basic-only fallback quotes are
    /// added. Default: 20.
    pub min_quotes: usize,

    /// Stop once this many quotes pass validation. Default: 50.
    pub max_quotes: usize,

    /// Sentences per chunk. Default: 5.
    pub sentences_per_chunk: usize,

    /// Shorter chunks are skipped. Default: 80.
    pub min_chunk_chars: usize,

    /// ISO code of the publication language. Default: "ru".
    pub target_language: String,

    /// Audience hint passed to extraction prompts.
    pub audience: Option<String>,

    /// Book topic. `None` asks the model (or guesses from the file name).
    pub topic: Option<String>,

    /// Translate quotes into `target_language`. Default: true.
    pub translate: bool,

    /// Run the LLM topic-relevance stage. Default: true.
    pub topic_check: bool,

    /// With no provider available, run on heuristics instead of failing.
    /// Default: true.
    pub offline_fallback: bool,

    /// Length limits of the validator.
    pub validator: ValidatorConfig,

    /// Progress events; see [`crate::progress`].
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            model: None,
            fast_model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.3,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            pages: PageSelection::default(),
            strategy: Strategy::default(),
            min_quotes: 20,
            max_quotes: 50,
            sentences_per_chunk: 5,
            min_chunk_chars: 80,
            target_language: "ru".to_string(),
            audience: None,
            topic: None,
            translate: true,
            topic_check: true,
            offline_fallback: true,
            validator: ValidatorConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("fast_model", &self.fast_model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("pages", &self.pages)
            .field("strategy", &self.strategy)
            .field("min_quotes", &self.min_quotes)
            .field("max_quotes", &self.max_quotes)
            .field("target_language", &self.target_language)
            .field("translate", &self.translate)
            .field("topic_check", &self.topic_check)
            .field("offline_fallback", &self.offline_fallback)
            .field("validator", &self.validator)
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtractionConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn fast_model(mut self, model: impl Into<String>) -> Self {
        self.config.fast_model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn min_quotes(mut self, n: usize) -> Self {
        self.config.min_quotes = n;
        self
    }

    pub fn max_quotes(mut self, n: usize) -> Self {
        self.config.max_quotes = n;
        self
    }

    pub fn sentences_per_chunk(mut self, n: usize) -> Self {
        self.config.sentences_per_chunk = n.clamp(1, 50);
        self
    }

    pub fn min_chunk_chars(mut self, n: usize) -> Self {
        self.config.min_chunk_chars = n;
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.config.target_language = lang.into();
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.config.audience = Some(audience.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = Some(topic.into());
        self
    }

    pub fn translate(mut self, v: bool) -> Self {
        self.config.translate = v;
        self
    }

    pub fn topic_check(mut self, v: bool) -> Self {
        self.config.topic_check = v;
        self
    }

    pub fn offline_fallback(mut self, v: bool) -> Self {
        self.config.offline_fallback = v;
        self
    }

    pub fn validator(mut self, v: ValidatorConfig) -> Self {
        self.config.validator = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, QuoteError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(QuoteError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_quotes == 0 {
            return Err(QuoteError::InvalidConfig("max_quotes must be ≥ 1".into()));
        }
        if c.min_quotes > c.max_quotes {
            return Err(QuoteError::InvalidConfig(format!(
                "min_quotes ({}) exceeds max_quotes ({})",
                c.min_quotes, c.max_quotes
            )));
        }
        if c.target_language.trim().is_empty() {
            return Err(QuoteError::InvalidConfig(
                "target_language must not be empty".into(),
            ));
        }
        c.validator.check().map_err(QuoteError::InvalidConfig)?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How candidate quotes are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Chunk → LLM extraction → four-stage validation → translation.
    #[default]
    Structured,
    /// Paragraph candidates scored by the smart extractor.
    Smart,
}

impl FromStr for Strategy {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structured" => Ok(Strategy::Structured),
            "smart" => Ok(Strategy::Smart),
            other => Err(QuoteError::InvalidConfig(format!(
                "unknown strategy '{other}' (expected structured or smart)"
            ))),
        }
    }
}

/// Which pages of the PDF to read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    #[default]
    All,
    /// 1-indexed, inclusive.
    Range(usize, usize),
    /// 1-indexed page numbers.
    Set(Vec<usize>),
    /// 1-indexed inclusive ranges, from a comma list such as `1-5,9`.
    Ranges(Vec<(usize, usize)>),
}

/// 0-indexed pages of `first..=last` that exist in a book of `total_pages`.
fn clamped(first: usize, last: usize, total_pages: usize) -> std::ops::Range<usize> {
    let end = last.min(total_pages);
    let start = first.max(1).min(end + 1);
    (start - 1)..end
}

impl PageSelection {
    /// Sorted, deduplicated 0-indexed pages that exist in a book of
    /// `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let in_book = |p: &usize| (1..=total_pages).contains(p);
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Range(first, last) => clamped(*first, *last, total_pages).collect(),
            PageSelection::Set(pages) => pages.iter().filter(|p| in_book(*p)).map(|p| p - 1).collect(),
            PageSelection::Ranges(ranges) => ranges
                .iter()
                .flat_map(|&(first, last)| clamped(first, last, total_pages))
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl FromStr for PageSelection {
    type Err = QuoteError;

    /// `all`, `N`, `A-B`, or a comma list of those (`1-5,9,12`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let bad = || QuoteError::InvalidConfig(format!("invalid page selection '{s}'"));
        let num = |t: &str| t.trim().parse::<usize>().map_err(|_| bad());

        let parts: Vec<&str> = s.split(',').collect();
        if let [single] = parts.as_slice() {
            if let Some((a, b)) = single.split_once('-') {
                let (a, b) = (num(a)?, num(b)?);
                if a == 0 || b < a {
                    return Err(bad());
                }
                return Ok(PageSelection::Range(a, b));
            }
        }

        let mut ranges = Vec::with_capacity(parts.len());
        for part in &parts {
            let (a, b) = match part.split_once('-') {
                Some((a, b)) => (num(a)?, num(b)?),
                None => {
                    let n = num(part)?;
                    (n, n)
                }
            };
            if a == 0 || b < a {
                return Err(bad());
            }
            ranges.push((a, b));
        }
        // Ranges stay unexpanded; pages are materialised against the book.
        if parts.iter().any(|p| p.contains('-')) {
            Ok(PageSelection::Ranges(ranges))
        } else {
            Ok(PageSelection::Set(ranges.into_iter().map(|(a, _)| a).collect()))
        }
    }
}
