//! Input resolution: turn a path or URL into a local PDF file.
//!
//! pdfium opens files by path, so URLs are streamed into a `TempDir` that
//! lives as long as the [`ResolvedInput`]. Both routes check the `%PDF`
//! magic before returning.

use crate::error::QuoteError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const FALLBACK_FILENAME: &str = "downloaded.pdf";

/// A local PDF ready for pdfium.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// The temp dir is deleted when this value drops.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a readable local PDF, downloading URLs with the given
/// timeout.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, QuoteError> {
    if is_url(input) {
        download(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

async fn resolve_local(path: &Path) -> Result<ResolvedInput, QuoteError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => QuoteError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => QuoteError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut magic = [0u8; 4];
    let n = file
        .read(&mut magic)
        .await
        .map_err(|e| QuoteError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    check_magic(path, &magic[..n])?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path.to_path_buf()))
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), QuoteError> {
    if head == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(QuoteError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download(url: &str, timeout_secs: u64) -> Result<ResolvedInput, QuoteError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| QuoteError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let map_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            QuoteError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(map_reqwest)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| QuoteError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));
    let write_err = |e| QuoteError::OutputWriteFailed {
        path: file_path.clone(),
        source: e,
    };

    let mut file = tokio::fs::File::create(&file_path).await.map_err(write_err)?;
    let mut head: Vec<u8> = Vec::with_capacity(4);
    let mut total = 0usize;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(map_reqwest)?;
        if head.len() < 4 {
            let take = (4 - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        total += chunk.len();
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)?;

    check_magic(&file_path, &head)?;
    info!("Downloaded {} bytes to {}", total, file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/book.pdf"));
        assert!(is_url("http://example.com/book.pdf"));
        assert!(!is_url("/books/book.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_takes_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/files/DotCom%20Secrets.pdf"),
            "DotCom%20Secrets.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/download"), FALLBACK_FILENAME);
        assert_eq!(filename_from_url("https://example.com/"), FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/no/such/book.pdf", 5).await.unwrap_err();
        assert!(matches!(err, QuoteError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_with_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"PK\x03\x04zip").unwrap();

        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        match err {
            QuoteError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_is_not_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, QuoteError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn pdf_magic_resolves_locally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();

        let resolved = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), path.as_path());
        assert!(matches!(resolved, ResolvedInput::Local(_)));
    }
}
