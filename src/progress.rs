//! Progress events for a quote-extraction run.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] through
//! [`crate::config::ExtractionConfigBuilder::progress_callback`]. Events are
//! per chunk, the unit of LLM work; a chunk may yield zero or several
//! quotes.
//!
//! # Example
//!
//! ```rust
//! use edgequake_quotes::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct QuoteCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for QuoteCounter {
//!     fn on_chunk_complete(&self, _chunk: usize, _total: usize, accepted: usize) {
//!         self.0.fetch_add(accepted, Ordering::Relaxed);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(QuoteCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it works through a book.
///
/// Chunk events may arrive concurrently from several tasks, so
/// implementations synchronise their own state. Every method defaults to a
/// no-op.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Once, after the book has been chunked.
    fn on_extraction_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// `chunk` is 1-indexed.
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// `accepted` counts the candidate quotes the chunk produced.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, accepted: usize) {
        let _ = (chunk, total_chunks, accepted);
    }

    /// The chunk's LLM call failed after all retries.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Once, with the number of quotes in the final result.
    fn on_extraction_complete(&self, total_chunks: usize, quotes: usize) {
        let _ = (total_chunks, quotes);
    }
}

/// Ignores every event.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tally {
        started: AtomicUsize,
        accepted: AtomicUsize,
        errors: AtomicUsize,
        final_quotes: AtomicUsize,
    }

    impl ExtractionProgressCallback for Tally {
        fn on_chunk_start(&self, _chunk: usize, _total: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chunk_complete(&self, _chunk: usize, _total: usize, accepted: usize) {
            self.accepted.fetch_add(accepted, Ordering::SeqCst);
        }

        fn on_chunk_error(&self, _chunk: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _total: usize, quotes: usize) {
            self.final_quotes.store(quotes, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_extraction_start(4);
        cb.on_chunk_start(1, 4);
        cb.on_chunk_complete(1, 4, 2);
        cb.on_chunk_error(2, 4, "timeout");
        cb.on_extraction_complete(4, 2);
    }

    #[test]
    fn tally_counts_events() {
        let t = Tally::default();
        t.on_extraction_start(3);
        t.on_chunk_start(1, 3);
        t.on_chunk_complete(1, 3, 2);
        t.on_chunk_start(2, 3);
        t.on_chunk_complete(2, 3, 1);
        t.on_chunk_start(3, 3);
        t.on_chunk_error(3, 3, "429");
        t.on_extraction_complete(3, 3);

        assert_eq!(t.started.load(Ordering::SeqCst), 3);
        assert_eq!(t.accepted.load(Ordering::SeqCst), 3);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.final_quotes.load(Ordering::SeqCst), 3);
    }
}
