//! Pipeline stages for PDF-to-quotes extraction.
//!
//! Each submodule implements one transformation step; the orchestration
//! lives in [`crate::extract`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ text ──▶ chunk ──▶ candidates ──▶ validate ──▶ dedup ──▶ translate
//! (URL/path) (pdfium) (clean)   (LLM / smart)  (4 stages)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`text`]: read the text layer of selected pages; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`chunk`]: normalise page text, split into sentences, chunks and
//!    chapters
//! 4. [`book`]: author and topic hints from the file name
//! 5. [`candidates`] / [`smart`]: propose quotes, with the model or with
//!    heuristics
//! 6. [`validate`]: the length, completeness, formatting and quality chain
//! 7. [`dedup`]: drop repeated texts
//!
//! [`llm`] is the only module with network I/O besides URL download.

pub mod book;
pub mod candidates;
pub mod chunk;
pub mod dedup;
pub mod input;
pub mod llm;
pub mod smart;
pub mod text;
pub mod validate;
