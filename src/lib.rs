//! # edgequake-quotes
//!
//! Extract short, publishable quotes from PDF books with LLMs.
//!
//! Every candidate quote goes through a validation chain (length,
//! completeness, formatting, final quality) before it is kept. Results are
//! de-duplicated, optionally translated, saved as JSON quote files and can be
//! imported into SQLite and posted to Threads.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Text       read the text layer via pdfium (spawn_blocking)
//!  ├─ 3. Chunk      clean, split into sentences, group into chunks
//!  ├─ 4. Candidates structured LLM extraction or paragraph analysis
//!  ├─ 5. Validate   4-stage chain, optional topic check
//!  ├─ 6. Dedup      one quote per trimmed text
//!  └─ 7. Output     quote file + stats + per-chunk errors
//! ```
//!
//! Without any configured provider the pipeline still runs: candidates come
//! from heuristics and validation is purely local.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_quotes::{extract_quotes, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER / …
//!     let config = ExtractionConfig::builder().max_quotes(20).build()?;
//!     let output = extract_quotes("book.pdf", &config).await?;
//!     for q in &output.quotes {
//!         println!("p.{:?}  {}", q.page, q.quote);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdf2quotes` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `bundled` | off     | Embed the pdfium library in the binary |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-quotes = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod insights;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod publish;
pub mod quote;
pub mod refine;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection, Strategy};
pub use error::{ChunkError, QuoteError};
pub use extract::{extract_from_pages, extract_quotes, extract_sync, extract_to_file, inspect};
pub use insights::{analyze_book, analyze_pdf, BookAnalysis, Insight};
pub use output::{DocumentMetadata, ExtractionOutput, ExtractionStats};
pub use pipeline::llm::{CompletionBackend, LlmClient, ModelTier};
pub use pipeline::validate::{QuoteValidator, ValidationReport, ValidationStage, ValidatorConfig};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use publish::{ThreadsConfig, ThreadsPublisher};
pub use quote::{Book, Quote, QuoteFile, QuoteMeta};
pub use refine::{improve_file, improve_quotes, refine_file, refine_quotes};
pub use store::{QuoteFilter, QuoteStore};
