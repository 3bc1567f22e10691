//! Quote, book and quote-file records.
//!
//! The JSON layout of [`Quote`] is the on-disk format of the quote files
//! written by `extract`, `refine` and `improve`, and the payload the refine
//! prompt sends to the model. Every field has a default so files written by
//! older runs (or trimmed by hand) still load. Unknown keys are kept
//! verbatim in [`Quote::extra`] and [`QuoteMeta::extra`], so rewriting a
//! file in place loses nothing.

use crate::error::QuoteError;
use crate::pipeline::validate::ValidationStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One extracted quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quote {
    /// 1-indexed page the quote was taken from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    /// Source fragment (chunk or paragraph) the quote came from.
    pub original: String,
    /// The publishable quote text.
    pub quote: String,
    /// Quote text in the target language.
    pub translated: String,
    /// One-line idea of the quote.
    pub summary: String,
    pub engaging: bool,
    pub category: String,
    /// insight / rule / mistake / observation.
    pub style: String,
    pub meta: QuoteMeta,

    /// Top-level keys this crate does not interpret (`id`, `validation`, …).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scores, tags and the validation audit trail of a [`Quote`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    /// Length of `quote` in characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practical_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_type: Option<QuoteType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Set by the improve pass: `true` when a better span replaced the quote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved: Option<bool>,

    // ── Validation results ──────────────────────────────────────────────
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_score: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub threads_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_length: Option<usize>,
    /// `"full"`, `"basic_only"` or `"basic"` (imported, never validated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_level: Option<String>,
    /// Stage name → outcome, in pipeline order of the stage names.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_stages: BTreeMap<String, StageRecord>,

    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one validation stage, as stored in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: ValidationStatus,
    pub score: f64,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// How a quote span relates to the paragraph it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteType {
    FullParagraph,
    HalfParagraph,
    SpecificQuote,
    MultipleSentences,
}

impl QuoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteType::FullParagraph => "full_paragraph",
            QuoteType::HalfParagraph => "half_paragraph",
            QuoteType::SpecificQuote => "specific_quote",
            QuoteType::MultipleSentences => "multiple_sentences",
        }
    }

    /// Parse a model-supplied label; unknown labels yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "full_paragraph" => Some(QuoteType::FullParagraph),
            "half_paragraph" => Some(QuoteType::HalfParagraph),
            "specific_quote" => Some(QuoteType::SpecificQuote),
            "multiple_sentences" => Some(QuoteType::MultipleSentences),
            _ => None,
        }
    }
}

impl Quote {
    /// A bare quote with default tags.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Quote {
            translated: text.clone(),
            style: "insight".to_string(),
            category: "general".to_string(),
            quote: text,
            ..Default::default()
        }
    }

    /// Key used for de-duplication: the trimmed quote text.
    pub fn dedup_key(&self) -> &str {
        self.quote.trim()
    }

    /// Length of the quote text in characters.
    pub fn char_len(&self) -> usize {
        self.quote.chars().count()
    }

    /// Text to publish: the translation when present, else the quote.
    pub fn publish_text(&self) -> &str {
        let t = self.translated.trim();
        if t.is_empty() {
            self.quote.trim()
        } else {
            t
        }
    }

    /// Target audience tag, `"general"` when unset.
    pub fn target_audience(&self) -> &str {
        self.meta.target_audience.as_deref().unwrap_or("general")
    }
}

/// A processed book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Database id; `None` until stored.
    pub id: Option<i64>,
    pub title: String,
    pub author: String,
    pub topic: String,
    pub file_path: Option<String>,
    pub processed_at: Option<String>,
    pub total_quotes: usize,
}

// ── Quote files ──────────────────────────────────────────────────────────

/// The `{"book": …, "quotes": […]}` file written for each book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteFile {
    pub book: String,
    pub quotes: Vec<Quote>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuoteFileRepr {
    Object {
        #[serde(default)]
        book: Option<String>,
        #[serde(default)]
        quotes: Vec<Quote>,
    },
    Bare(Vec<Quote>),
}

impl QuoteFile {
    pub fn new(book: impl Into<String>, quotes: Vec<Quote>) -> Self {
        QuoteFile {
            book: book.into(),
            quotes,
        }
    }

    /// Parse file contents. A bare array is accepted; the book title then
    /// falls back to `fallback_title`.
    pub fn from_json(text: &str, fallback_title: &str) -> Result<Self, QuoteError> {
        let repr: QuoteFileRepr =
            serde_json::from_str(text).map_err(|e| QuoteError::json("quote file", e))?;
        Ok(match repr {
            QuoteFileRepr::Object { book, quotes } => QuoteFile {
                book: book
                    .filter(|b| !b.trim().is_empty())
                    .unwrap_or_else(|| fallback_title.to_string()),
                quotes,
            },
            QuoteFileRepr::Bare(quotes) => QuoteFile {
                book: fallback_title.to_string(),
                quotes,
            },
        })
    }

    /// Read a quote file from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, QuoteError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                QuoteError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                QuoteError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let file = Self::from_json(&text, &stem)?;
        debug!("Loaded {} quotes from {}", file.quotes.len(), path.display());
        Ok(file)
    }

    /// Write the file atomically (temp file + rename), creating parent
    /// directories as needed.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), QuoteError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| QuoteError::json("quote file", e))?;
        write_atomic(path, json.as_bytes()).await
    }
}

/// Atomic write: write to `<path>.tmp`, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), QuoteError> {
    let write_err = |e| QuoteError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let mut tmp_path: PathBuf = path.to_path_buf();
    let mut name = tmp_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    tmp_path.set_file_name(name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_quote_has_defaults() {
        let q = Quote::new("Продажи начинаются с доверия.");
        assert_eq!(q.quote, q.translated);
        assert_eq!(q.style, "insight");
        assert_eq!(q.category, "general");
        assert_eq!(q.target_audience(), "general");
    }

    #[test]
    fn char_len_counts_chars_not_bytes() {
        let q = Quote::new("мир");
        assert_eq!(q.char_len(), 3);
        assert_eq!(q.quote.len(), 6);
    }

    #[test]
    fn publish_text_prefers_translation() {
        let mut q = Quote::new("Trust sells.");
        q.translated = "Доверие продаёт.".into();
        assert_eq!(q.publish_text(), "Доверие продаёт.");
        q.translated = "  ".into();
        assert_eq!(q.publish_text(), "Trust sells.");
    }

    #[test]
    fn unknown_meta_keys_survive_round_trip() {
        let json = r#"{"quote":"x","meta":{"length":1,"custom_flag":"keep-me"}}"#;
        let q: Quote = serde_json::from_str(json).unwrap();
        assert_eq!(q.meta.length, Some(1));
        assert_eq!(q.meta.extra["custom_flag"], "keep-me");
        let back = serde_json::to_value(&q).unwrap();
        assert_eq!(back["meta"]["custom_flag"], "keep-me");
    }

    #[test]
    fn unknown_top_level_keys_survive_round_trip() {
        let json = r#"{"quote":"Trust sells.","validation":{"overall_score":0.9},"id":"x1"}"#;
        let q: Quote = serde_json::from_str(json).unwrap();
        assert_eq!(q.quote, "Trust sells.");
        assert_eq!(q.extra["id"], "x1");

        let back = serde_json::to_string(&q).unwrap();
        assert!(back.contains("overall_score"));
        assert!(back.contains(r#""id":"x1""#));
    }

    #[tokio::test]
    async fn rewritten_file_keeps_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        tokio::fs::write(
            &path,
            r#"{"book":"B","quotes":[{"quote":"Trust sells.","validation":{"overall_score":0.9},"id":"x1"}]}"#,
        )
        .await
        .unwrap();

        let file = QuoteFile::load(&path).await.unwrap();
        file.save(&path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("overall_score"));
        assert!(written.contains("\"x1\""));
    }

    #[test]
    fn empty_meta_fields_are_not_serialised() {
        let q = Quote::new("text");
        let v = serde_json::to_value(&q).unwrap();
        let meta = v["meta"].as_object().unwrap();
        assert!(meta.is_empty(), "got: {meta:?}");
        assert!(v.get("page").is_none());
    }

    #[test]
    fn quote_file_accepts_object_and_bare_array() {
        let obj = r#"{"book":"DotCom Secrets","quotes":[{"quote":"a"}]}"#;
        let f = QuoteFile::from_json(obj, "fallback").unwrap();
        assert_eq!(f.book, "DotCom Secrets");
        assert_eq!(f.quotes.len(), 1);

        let bare = r#"[{"quote":"a"},{"quote":"b"}]"#;
        let f = QuoteFile::from_json(bare, "fallback").unwrap();
        assert_eq!(f.book, "fallback");
        assert_eq!(f.quotes.len(), 2);
    }

    #[test]
    fn quote_file_rejects_garbage() {
        assert!(QuoteFile::from_json("not json", "x").is_err());
    }

    #[test]
    fn quote_type_parse() {
        assert_eq!(QuoteType::parse("half_paragraph"), Some(QuoteType::HalfParagraph));
        assert_eq!(QuoteType::parse(" SPECIFIC_QUOTE "), Some(QuoteType::SpecificQuote));
        assert_eq!(QuoteType::parse("nonsense"), None);
    }

    #[tokio::test]
    async fn save_then_load_preserves_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/book.json");
        let mut q = Quote::new("Клиент покупает результат, а не продукт.");
        q.page = Some(3);
        let file = QuoteFile::new("book", vec![q.clone()]);

        file.save(&path).await.unwrap();
        assert!(!dir.path().join("nested/book.json.tmp").exists());

        let loaded = QuoteFile::load(&path).await.unwrap();
        assert_eq!(loaded.book, "book");
        assert_eq!(loaded.quotes, vec![q]);
    }

    #[tokio::test]
    async fn load_missing_file_is_not_found() {
        let err = QuoteFile::load("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(err, QuoteError::FileNotFound { .. }));
    }
}
