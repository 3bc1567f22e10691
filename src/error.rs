//! Error types for the edgequake-quotes library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`QuoteError`] is **fatal**: the operation cannot proceed at all (bad
//!   input file, provider not configured, database unavailable, Threads
//!   rejected the token). Returned as `Err(QuoteError)` from the top-level
//!   functions.
//!
//! * [`ChunkError`] is **non-fatal**: one chunk of book text failed (transient
//!   API error, unparseable model reply) but the rest of the book is fine.
//!   Collected in [`crate::output::ExtractionOutput::chunk_errors`] so callers
//!   can inspect partial success.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-quotes library.
#[derive(Debug, Error)]
pub enum QuoteError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium could not read the text layer of a page.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// Every attempt of an LLM call hit the per-call timeout.
    #[error("LLM call timed out after {secs}s")]
    LlmTimeout { secs: u64 },

    /// The book produced no quote at all, not even fallback ones.
    #[error("No quotes could be extracted from '{book}' ({chunks} chunks examined)")]
    NoQuotesExtracted { book: String, chunks: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read a quote file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A quote file or LLM payload is not valid JSON of the expected shape.
    #[error("Invalid JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Store errors ──────────────────────────────────────────────────────
    /// SQLite failure.
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A record referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    // ── Publish errors ────────────────────────────────────────────────────
    /// Threads credentials are missing from the environment.
    #[error("Threads credentials missing: set {0}")]
    MissingCredentials(&'static str),

    /// The text cannot be posted as-is.
    #[error("Post text rejected: {0}")]
    InvalidPost(String),

    /// Network-level failure talking to the Graph API.
    #[error("Threads request failed: {0}")]
    PublishRequest(String),

    /// The Graph API returned an error payload.
    #[error("Threads API error (HTTP {status}): {message}")]
    PublishApi { status: u16, message: String },

    /// The access token is expired and must be refreshed.
    #[error("Threads access token expired: {0}\nGenerate a new long-lived token.")]
    TokenExpired(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuoteError {
    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        QuoteError::Json {
            context: context.into(),
            source,
        }
    }
}

/// A non-fatal error for a single chunk of text.
///
/// The extraction continues with the remaining chunks.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// LLM call failed after retries.
    #[error("Chunk {chunk} (page {page}): LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        chunk: usize,
        retries: u32,
        detail: String,
    },

    /// LLM call timed out on every attempt.
    #[error("Chunk {chunk} (page {page}): LLM call timed out after {secs}s")]
    Timeout { page: usize, chunk: usize, secs: u64 },

    /// The model replied, but not with the JSON shape asked for.
    #[error("Chunk {chunk} (page {page}): unparseable model response")]
    BadResponse { page: usize, chunk: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let e = QuoteError::NotFound {
            entity: "quote",
            id: 42,
        };
        assert_eq!(e.to_string(), "quote 42 not found");
    }

    #[test]
    fn publish_api_display() {
        let e = QuoteError::PublishApi {
            status: 400,
            message: "Invalid parameter".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("400"), "got: {msg}");
        assert!(msg.contains("Invalid parameter"));
    }

    #[test]
    fn chunk_error_display_mentions_page() {
        let e = ChunkError::Timeout {
            page: 7,
            chunk: 3,
            secs: 60,
        };
        let msg = e.to_string();
        assert!(msg.contains("page 7"));
        assert!(msg.contains("60s"));
    }

    #[test]
    fn chunk_error_serialises() {
        let e = ChunkError::BadResponse { page: 1, chunk: 0 };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("BadResponse"));
    }

    #[test]
    fn rusqlite_error_converts() {
        let e: QuoteError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(e.to_string().starts_with("Database error"));
    }
}
