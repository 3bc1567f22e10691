//! PDF text layer extraction via pdfium.
//!
//! pdfium is a C++ library with thread-local state; every call here runs
//! inside `tokio::task::spawn_blocking` so it never stalls a runtime worker.
//! The library itself is located (and downloaded on first use) by
//! `pdfium-auto`; `PDFIUM_LIB_PATH` overrides the location.

use crate::config::PageSelection;
use crate::error::QuoteError;
use crate::output::DocumentMetadata;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw text of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-indexed.
    pub number: usize,
    pub text: String,
}

/// Read the text layer of the selected pages.
///
/// Pages without a text layer (scans) come back empty; a page whose text
/// cannot be read at all is skipped with a warning.
pub async fn extract_pages(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<PageText>, QuoteError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);
    let selection = selection.clone();

    tokio::task::spawn_blocking(move || {
        extract_pages_blocking(&path, password.as_deref(), &selection)
    })
    .await
    .map_err(|e| QuoteError::Internal(format!("Text extraction task panicked: {e}")))?
}

fn bind() -> Result<Pdfium, QuoteError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| QuoteError::PdfiumBindingFailed(e.to_string()))
}

fn load_error(pdf_path: &Path, password: Option<&str>, e: PdfiumError) -> QuoteError {
    let detail = format!("{e:?}");
    if detail.to_lowercase().contains("password") {
        if password.is_some() {
            QuoteError::WrongPassword {
                path: pdf_path.to_path_buf(),
            }
        } else {
            QuoteError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        }
    } else {
        QuoteError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail,
        }
    }
}

fn extract_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<PageText>, QuoteError> {
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let indices = selection.to_indices(total);
    info!("PDF loaded: {} pages, reading {}", total, indices.len());

    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        let text = pages
            .get(idx as u16)
            .and_then(|page| page.text().map(|t| t.all()));
        match text {
            Ok(text) => {
                debug!("Page {}: {} chars", idx + 1, text.chars().count());
                out.push(PageText {
                    number: idx + 1,
                    text,
                });
            }
            Err(e) => {
                let err = QuoteError::TextExtractionFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                };
                warn!("{err}");
            }
        }
    }
    Ok(out)
}

/// Read the document information dictionary without touching page text.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, QuoteError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, password.as_deref()))
        .await
        .map_err(|e| QuoteError::Internal(format!("Metadata task panicked: {e}")))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, QuoteError> {
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let metadata = document.metadata();
    let tag = |t: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(t)
            .map(|m| m.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        creation_date: tag(PdfDocumentMetadataTagType::CreationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
