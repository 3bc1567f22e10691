//! SQLite persistence for books and quotes.
//!
//! One [`QuoteStore`] owns one connection; it is `Send` but not `Sync`, so
//! share it behind a mutex or open one per task. Quote metadata that has no
//! column of its own is kept as JSON in `quotes.metadata` and restored on
//! read.

use crate::error::QuoteError;
use crate::pipeline::book::infer_author_and_topic;
use crate::quote::{Book, Quote, QuoteFile, QuoteMeta};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA: &str = include_str!("schema.sql");

/// Quality recorded when a quote carries neither confidence nor score.
const DEFAULT_QUALITY: f64 = 0.5;

const BOOK_COLUMNS: &str = "id, title, author, topic, file_path, processed_at, total_quotes";
const QUOTE_COLUMNS: &str = "id, book_id, page_number, original_text, quote_text, \
    translated_text, summary, category, style, target_audience, is_engaging, \
    quality_score, length, validation_level, metadata, created_at, published, published_at";

/// A quote row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuote {
    pub id: i64,
    pub book_id: i64,
    pub quote: Quote,
    pub quality_score: f64,
    pub created_at: String,
    pub published: bool,
    pub published_at: Option<String>,
}

/// Filter for [`QuoteStore::get_quotes`]. The default returns the first
/// 100 quotes of any book.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteFilter {
    pub book_id: Option<i64>,
    pub category: Option<String>,
    /// Inclusive lower bound on `quality_score`; ignored when `<= 0`.
    pub min_quality: f64,
    pub engaging_only: bool,
    pub unpublished_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for QuoteFilter {
    fn default() -> Self {
        Self {
            book_id: None,
            category: None,
            min_quality: 0.0,
            engaging_only: false,
            unpublished_only: false,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_books: usize,
    pub total_quotes: usize,
    pub published_quotes: usize,
    /// `0.0` for an empty store.
    pub avg_quality: f64,
    /// `(category, count)`, most frequent first.
    pub by_category: Vec<(String, usize)>,
}

/// Outcome of importing one quote file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub book_id: i64,
    pub imported: usize,
    pub skipped: usize,
}

pub struct QuoteStore {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: Some(row.get(0)?),
        title: row.get(1)?,
        author: row.get(2)?,
        topic: row.get(3)?,
        file_path: row.get(4)?,
        processed_at: Some(row.get(5)?),
        total_quotes: row.get::<_, i64>(6)?.max(0) as usize,
    })
}

fn quote_from_row(row: &Row<'_>) -> rusqlite::Result<StoredQuote> {
    let metadata: String = row.get(14)?;
    let meta: QuoteMeta = serde_json::from_str(&metadata).unwrap_or_else(|e| {
        debug!("Unreadable quote metadata, using defaults: {e}");
        QuoteMeta::default()
    });
    let mut quote = Quote {
        page: row.get::<_, Option<i64>>(2)?.map(|p| p.max(0) as usize),
        original: row.get(3)?,
        quote: row.get(4)?,
        translated: row.get(5)?,
        summary: row.get(6)?,
        category: row.get(7)?,
        style: row.get(8)?,
        engaging: row.get(10)?,
        meta,
        ..Default::default()
    };
    let audience: String = row.get(9)?;
    quote.meta.target_audience.get_or_insert(audience);
    let level: String = row.get(13)?;
    quote.meta.validation_level.get_or_insert(level);
    quote.meta.length.get_or_insert(row.get::<_, i64>(12)?.max(0) as usize);

    Ok(StoredQuote {
        id: row.get(0)?,
        book_id: row.get(1)?,
        quote,
        quality_score: row.get(11)?,
        created_at: row.get(15)?,
        published: row.get(16)?,
        published_at: row.get(17)?,
    })
}

fn insert_quote(conn: &Connection, book_id: i64, q: &Quote) -> Result<i64, QuoteError> {
    if q.quote.trim().is_empty() {
        return Err(QuoteError::InvalidInput {
            input: "quote text is empty".to_string(),
        });
    }
    let quality = q
        .meta
        .confidence
        .or(q.meta.validation_score)
        .unwrap_or(DEFAULT_QUALITY);
    let translated = if q.translated.trim().is_empty() {
        &q.quote
    } else {
        &q.translated
    };
    let metadata =
        serde_json::to_string(&q.meta).map_err(|e| QuoteError::json("quote metadata", e))?;

    conn.execute(
        "INSERT INTO quotes (
            book_id, page_number, original_text, quote_text, translated_text, summary,
            category, style, target_audience, is_engaging, quality_score, completeness,
            practical_value, length, validation_level, metadata, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            book_id,
            q.page.map(|p| p as i64),
            q.original,
            q.quote,
            translated,
            q.summary,
            if q.category.is_empty() { "general" } else { q.category.as_str() },
            if q.style.is_empty() { "insight" } else { q.style.as_str() },
            q.target_audience(),
            q.engaging,
            quality,
            q.meta.completeness.unwrap_or(0.0),
            q.meta.practical_value.unwrap_or(0.0),
            q.char_len() as i64,
            q.meta.validation_level.as_deref().unwrap_or("basic"),
            metadata,
            now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_stats(conn: &Connection, book_id: i64) -> Result<(), QuoteError> {
    conn.execute(
        "UPDATE books SET total_quotes = (SELECT COUNT(*) FROM quotes WHERE book_id = ?1)
         WHERE id = ?1",
        params![book_id],
    )?;
    Ok(())
}

impl QuoteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuoteError> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| QuoteError::OutputWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, QuoteError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, QuoteError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ── Books ────────────────────────────────────────────────────────────

    /// Insert a book; `id` and `total_quotes` of `book` are ignored.
    pub fn add_book(&self, book: &Book) -> Result<i64, QuoteError> {
        self.conn.execute(
            "INSERT INTO books (title, author, topic, file_path, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                book.title,
                book.author,
                book.topic,
                book.file_path,
                book.processed_at.clone().unwrap_or_else(now),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Added book {} '{}'", id, book.title);
        Ok(id)
    }

    pub fn get_book(&self, id: i64) -> Result<Option<Book>, QuoteError> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], book_from_row)
            .optional()?)
    }

    /// The oldest book with exactly this title.
    pub fn get_book_by_title(&self, title: &str) -> Result<Option<Book>, QuoteError> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE title = ?1 ORDER BY id LIMIT 1");
        Ok(self
            .conn
            .query_row(&sql, params![title], book_from_row)
            .optional()?)
    }

    /// Most recently processed first.
    pub fn list_books(&self, limit: usize) -> Result<Vec<Book>, QuoteError> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY processed_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], book_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Recount `total_quotes` for a book.
    pub fn update_book_stats(&self, book_id: i64) -> Result<(), QuoteError> {
        update_stats(&self.conn, book_id)
    }

    // ── Quotes ───────────────────────────────────────────────────────────

    /// Insert a quote. Quality is `meta.confidence`, else
    /// `meta.validation_score`, else 0.5.
    ///
    /// # Errors
    /// [`QuoteError::InvalidInput`] for an empty quote text; a store error
    /// when `book_id` does not exist.
    pub fn add_quote(&self, book_id: i64, quote: &Quote) -> Result<i64, QuoteError> {
        insert_quote(&self.conn, book_id, quote)
    }

    pub fn get_quote(&self, id: i64) -> Result<Option<StoredQuote>, QuoteError> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], quote_from_row)
            .optional()?)
    }

    /// Quotes matching `filter`, best quality first, newest first on ties.
    pub fn get_quotes(&self, filter: &QuoteFilter) -> Result<Vec<StoredQuote>, QuoteError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(id) = filter.book_id {
            conditions.push("book_id = ?");
            args.push(SqlValue::Integer(id));
        }
        if let Some(ref category) = filter.category {
            conditions.push("category = ?");
            args.push(SqlValue::Text(category.clone()));
        }
        if filter.min_quality > 0.0 {
            conditions.push("quality_score >= ?");
            args.push(SqlValue::Real(filter.min_quality));
        }
        if filter.engaging_only {
            conditions.push("is_engaging = 1");
        }
        if filter.unpublished_only {
            conditions.push("published = 0");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes {where_clause}
             ORDER BY quality_score DESC, created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        );
        args.push(SqlValue::Integer(filter.limit as i64));
        args.push(SqlValue::Integer(filter.offset as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), quote_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Substring search over quote, translation and summary (ASCII
    /// case-insensitive, as SQLite `LIKE`).
    pub fn search_quotes(&self, text: &str, limit: usize) -> Result<Vec<StoredQuote>, QuoteError> {
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes
             WHERE quote_text LIKE ?1 ESCAPE '\\'
                OR translated_text LIKE ?1 ESCAPE '\\'
                OR summary LIKE ?1 ESCAPE '\\'
             ORDER BY quality_score DESC, id DESC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, limit as i64], quote_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flag a quote as published now.
    pub fn mark_published(&self, id: i64) -> Result<(), QuoteError> {
        let changed = self.conn.execute(
            "UPDATE quotes SET published = 1, published_at = ?2 WHERE id = ?1",
            params![id, now()],
        )?;
        if changed == 0 {
            return Err(QuoteError::NotFound { entity: "quote", id });
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, QuoteError> {
        let count = |sql: &str| -> Result<usize, QuoteError> {
            let n: i64 = self.conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n.max(0) as usize)
        };
        let avg_quality: Option<f64> =
            self.conn
                .query_row("SELECT AVG(quality_score) FROM quotes", [], |r| r.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) AS n FROM quotes GROUP BY category ORDER BY n DESC, category",
        )?;
        let by_category = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?.max(0) as usize)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total_books: count("SELECT COUNT(*) FROM books")?,
            total_quotes: count("SELECT COUNT(*) FROM quotes")?,
            published_quotes: count("SELECT COUNT(*) FROM quotes WHERE published = 1")?,
            avg_quality: avg_quality.unwrap_or(0.0),
            by_category,
        })
    }

    // ── Import ───────────────────────────────────────────────────────────

    /// Add every quote of `file` to the book with the same title, creating
    /// the book first when needed. Quotes that fail to insert are logged and
    /// skipped.
    pub fn import(
        &mut self,
        file: &QuoteFile,
        file_path: Option<&str>,
    ) -> Result<ImportReport, QuoteError> {
        let book_id = match self.get_book_by_title(&file.book)? {
            Some(book) => book.id.unwrap_or_default(),
            None => {
                let hints = infer_author_and_topic(&file.book);
                self.add_book(&Book {
                    title: file.book.clone(),
                    author: hints.author,
                    topic: hints.topic,
                    file_path: file_path.map(str::to_string),
                    ..Default::default()
                })?
            }
        };

        let tx = self.conn.transaction()?;
        let mut report = ImportReport {
            book_id,
            ..Default::default()
        };
        for (i, quote) in file.quotes.iter().enumerate() {
            match insert_quote(&tx, book_id, quote) {
                Ok(_) => report.imported += 1,
                Err(e) => {
                    warn!("Skipping quote {} of '{}': {e}", i + 1, file.book);
                    report.skipped += 1;
                }
            }
        }
        update_stats(&tx, book_id)?;
        tx.commit()?;

        info!(
            "Imported {} quotes into book {} ({} skipped)",
            report.imported, book_id, report.skipped
        );
        Ok(report)
    }
}

/// Load a quote file from disk and [`import`](QuoteStore::import) it.
pub async fn import_quote_file(
    store: &mut QuoteStore,
    path: impl AsRef<Path>,
) -> Result<ImportReport, QuoteError> {
    let path = path.as_ref();
    let file = QuoteFile::load(path).await?;
    store.import(&file, Some(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(text: &str, confidence: Option<f64>, category: &str) -> Quote {
        let mut q = Quote::new(text);
        q.category = category.to_string();
        q.meta.confidence = confidence;
        q
    }

    fn store_with_book() -> (QuoteStore, i64) {
        let store = QuoteStore::open_in_memory().unwrap();
        let id = store
            .add_book(&Book {
                title: "Sales Book".into(),
                author: "A. Author".into(),
                ..Default::default()
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn book_roundtrip_and_lookup() {
        let (store, id) = store_with_book();
        let book = store.get_book(id).unwrap().unwrap();
        assert_eq!(book.title, "Sales Book");
        assert!(book.processed_at.is_some());
        assert_eq!(store.get_book_by_title("Sales Book").unwrap().unwrap().id, Some(id));
        assert!(store.get_book_by_title("Other").unwrap().is_none());
        assert!(store.get_book(id + 100).unwrap().is_none());
        assert_eq!(store.list_books(10).unwrap().len(), 1);
    }

    #[test]
    fn quote_keeps_meta_and_defaults_quality() {
        let (store, book) = store_with_book();
        let mut q = quote("Trust is the real currency.", None, "sales");
        q.page = Some(12);
        q.meta.sentiment = Some("practical".into());
        let id = store.add_quote(book, &q).unwrap();

        let stored = store.get_quote(id).unwrap().unwrap();
        assert_eq!(stored.quality_score, DEFAULT_QUALITY);
        assert_eq!(stored.quote.page, Some(12));
        assert_eq!(stored.quote.meta.sentiment.as_deref(), Some("practical"));
        assert_eq!(stored.quote.meta.validation_level.as_deref(), Some("basic"));
        assert!(!stored.published);
    }

    #[test]
    fn empty_quote_and_unknown_book_are_rejected() {
        let (store, book) = store_with_book();
        assert!(matches!(
            store.add_quote(book, &Quote::new("  ")),
            Err(QuoteError::InvalidInput { .. })
        ));
        assert!(matches!(
            store.add_quote(book + 1, &Quote::new("Orphan quote.")),
            Err(QuoteError::Store(_))
        ));
    }

    #[test]
    fn filter_and_ordering() {
        let (store, book) = store_with_book();
        store.add_quote(book, &quote("Low.", Some(0.3), "sales")).unwrap();
        store.add_quote(book, &quote("High.", Some(0.9), "sales")).unwrap();
        let mut engaging = quote("Mid.", Some(0.6), "mindset");
        engaging.engaging = true;
        store.add_quote(book, &engaging).unwrap();

        let all = store.get_quotes(&QuoteFilter::default()).unwrap();
        let texts: Vec<_> = all.iter().map(|s| s.quote.quote.as_str()).collect();
        assert_eq!(texts, ["High.", "Mid.", "Low."]);

        let sales = store
            .get_quotes(&QuoteFilter {
                category: Some("sales".into()),
                min_quality: 0.5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].quote.quote, "High.");

        let engaging_only = store
            .get_quotes(&QuoteFilter {
                engaging_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(engaging_only.len(), 1);

        let page = store
            .get_quotes(&QuoteFilter {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page[0].quote.quote, "Mid.");
    }

    #[test]
    fn publish_flow_and_stats() {
        let (store, book) = store_with_book();
        let a = store.add_quote(book, &quote("First quote.", Some(0.8), "sales")).unwrap();
        store.add_quote(book, &quote("Second quote.", Some(0.4), "sales")).unwrap();
        store.add_quote(book, &quote("Third quote.", Some(0.6), "mindset")).unwrap();
        store.update_book_stats(book).unwrap();

        store.mark_published(a).unwrap();
        assert!(matches!(
            store.mark_published(999),
            Err(QuoteError::NotFound { entity: "quote", id: 999 })
        ));

        let unpublished = store
            .get_quotes(&QuoteFilter {
                unpublished_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unpublished.len(), 2);
        assert!(store.get_quote(a).unwrap().unwrap().published_at.is_some());

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_books, 1);
        assert_eq!(stats.total_quotes, 3);
        assert_eq!(stats.published_quotes, 1);
        assert!((stats.avg_quality - 0.6).abs() < 1e-9);
        assert_eq!(stats.by_category[0], ("sales".to_string(), 2));
        assert_eq!(store.get_book(book).unwrap().unwrap().total_quotes, 3);
    }

    #[test]
    fn search_escapes_wildcards() {
        let (store, book) = store_with_book();
        store.add_quote(book, &quote("Grow 100% faster.", None, "sales")).unwrap();
        store.add_quote(book, &quote("Grow 100 times faster.", None, "sales")).unwrap();
        assert_eq!(store.search_quotes("100%", 10).unwrap().len(), 1);
        assert_eq!(store.search_quotes("Grow", 10).unwrap().len(), 2);
        assert!(store.search_quotes("missing", 10).unwrap().is_empty());
    }

    #[test]
    fn import_reuses_book_and_skips_bad_quotes() {
        let (mut store, book) = store_with_book();
        let file = QuoteFile::new(
            "Sales Book",
            vec![quote("Good one.", Some(0.7), "sales"), Quote::new("")],
        );
        let report = store.import(&file, None).unwrap();
        assert_eq!(report, ImportReport { book_id: book, imported: 1, skipped: 1 });
        assert_eq!(store.get_book(book).unwrap().unwrap().total_quotes, 1);

        let fresh = store
            .import(&QuoteFile::new("New Book", vec![Quote::new("Another.")]), Some("new.json"))
            .unwrap();
        assert_ne!(fresh.book_id, book);
        assert_eq!(store.list_books(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn import_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        QuoteFile::new("Disk Book", vec![Quote::new("Saved quote.")])
            .save(&path)
            .await
            .unwrap();
        let mut store = QuoteStore::open(dir.path().join("db/quotes.db")).unwrap();
        let report = import_quote_file(&mut store, &path).await.unwrap();
        assert_eq!(report.imported, 1);
    }
}
