//! Book identity from the file name: slug, author and topic guesses.
//!
//! Runs before any LLM call so the topic prompt has a sensible fallback and
//! so offline runs still tag quotes with something better than nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Author/topic inferred from a book file name. Empty strings mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookHints {
    pub author: String,
    pub topic: String,
}

struct KnownBook {
    keywords: &'static [&'static str],
    author: &'static str,
    topic: &'static str,
}

const KNOWN_BOOKS: &[KnownBook] = &[
    KnownBook {
        keywords: &[
            "brunson",
            "dotcom secrets",
            "dot com secrets",
            "traffic secrets",
            "expert secrets",
        ],
        author: "Russell Brunson",
        topic: "marketing and sales funnels",
    },
    KnownBook {
        keywords: &["cialdini", "influence", "влияние"],
        author: "Robert Cialdini",
        topic: "psychology of influence",
    },
    KnownBook {
        keywords: &["kotler", "marketing"],
        author: "Philip Kotler",
        topic: "marketing",
    },
];

const TOPIC_KEYWORDS: &[(&[&str], &str)] = &[
    (&["sales", "продаж", "selling"], "sales"),
    (&["marketing", "маркетинг", "ads", "advertis"], "marketing"),
    (&["business", "бизнес", "entrepreneur"], "business and entrepreneurship"),
    (&["psychology", "психолог"], "psychology"),
];

/// Guess author and topic from a book's file stem.
///
/// Known titles win over generic topic keywords.
pub fn infer_author_and_topic(name: &str) -> BookHints {
    let name = name.to_lowercase();

    for book in KNOWN_BOOKS {
        if book.keywords.iter().any(|k| name.contains(k)) {
            return BookHints {
                author: book.author.to_string(),
                topic: book.topic.to_string(),
            };
        }
    }

    let topic = TOPIC_KEYWORDS
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| name.contains(k)))
        .map(|(_, topic)| topic.to_string())
        .unwrap_or_default();

    BookHints {
        author: String::new(),
        topic,
    }
}

static RE_NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-]+").unwrap());
static RE_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// Lower-case, dash-separated slug of a file stem; `"book"` when nothing
/// usable remains.
pub fn slugify_filename(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let slug = RE_NON_SLUG.replace_all(&stem, "-");
    let slug = RE_DASHES.replace_all(&slug, "-");
    let slug = slug.trim_matches('-').to_lowercase();
    if slug.is_empty() {
        "book".to_string()
    } else {
        slug
    }
}

/// Book title used in quote files: the file stem of the input.
pub fn book_title(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "book".to_string())
}

/// `<dir>/<slug>.json` for a given book file.
pub fn default_output_path(dir: impl AsRef<Path>, book: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(format!("{}.json", slugify_filename(book)))
}
