//! Results of an extraction run.

use crate::error::ChunkError;
use crate::quote::{Book, Quote, QuoteFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything one run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub book: Book,
    pub quotes: Vec<Quote>,
    pub metadata: Option<DocumentMetadata>,
    pub stats: ExtractionStats,
    /// Chunks whose LLM call failed; the run carried on without them.
    pub chunk_errors: Vec<ChunkError>,
}

impl ExtractionOutput {
    /// The file form written by `extract_to_file`.
    pub fn to_quote_file(&self) -> QuoteFile {
        QuoteFile::new(self.book.title.clone(), self.quotes.clone())
    }
}

/// Counters and timings of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages read from the PDF.
    pub pages: usize,
    /// Chunks (structured) or paragraphs (smart) examined.
    pub chunks: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    /// Distinct candidate quotes before validation.
    pub candidates: usize,
    /// Stage name → candidates rejected there.
    pub rejected_by_stage: BTreeMap<String, usize>,
    /// Quotes added by the basic-only fallback.
    pub fallback_quotes: usize,
    /// Quotes whose text changed in translation.
    pub translated: usize,
    /// True when no LLM was available and heuristics ran instead.
    pub offline: bool,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub text_duration_ms: u64,
    pub llm_duration_ms: u64,
}

impl ExtractionStats {
    pub(crate) fn reject(&mut self, stage: &str) {
        *self.rejected_by_stage.entry(stage.to_string()).or_default() += 1;
    }

    pub fn rejected(&self) -> usize {
        self.rejected_by_stage.values().sum()
    }
}

/// Information-dictionary fields of a PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_counts_per_stage() {
        let mut s = ExtractionStats::default();
        s.reject("basic");
        s.reject("basic");
        s.reject("topic_relevance");
        assert_eq!(s.rejected_by_stage["basic"], 2);
        assert_eq!(s.rejected(), 3);
    }

    #[test]
    fn quote_file_uses_book_title() {
        let out = ExtractionOutput {
            book: Book {
                title: "DotCom Secrets".into(),
                ..Default::default()
            },
            quotes: vec![Quote::new("Любая продажа начинается с истории.")],
            ..Default::default()
        };
        let f = out.to_quote_file();
        assert_eq!(f.book, "DotCom Secrets");
        assert_eq!(f.quotes.len(), 1);
    }
}
