//! Text normalisation and segmentation.
//!
//! pdfium returns page text with hard line wraps, tabs and non-breaking
//! spaces. Everything downstream (candidate extraction, validation) works on
//! sentences, so this module flattens a page into one sentence per line and
//! then groups sentences into chunks small enough for a single LLM call.
//!
//! All lengths here are measured in `char`s, never bytes: the books are
//! mostly Cyrillic, where a byte count is roughly double the visible length.

use once_cell::sync::Lazy;
use regex::Regex;

// ── Cleaning ─────────────────────────────────────────────────────────────

static RE_TABS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\t\r]+").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"([.!?])\s+").unwrap());

/// Normalise raw page text.
///
/// 1. tabs and carriage returns become spaces
/// 2. non-breaking spaces become spaces
/// 3. whitespace runs collapse to one space
/// 4. a newline follows every `.`, `!` or `?` that ended a sentence
pub fn clean_text(text: &str) -> String {
    let s = RE_TABS.replace_all(text, " ");
    let s = s.replace('\u{00a0}', " ");
    let s = collapse_whitespace(&s);
    RE_SENTENCE_BREAK.replace_all(&s, "$1\n").into_owned()
}

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

// ── Segmentation ─────────────────────────────────────────────────────────

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());
static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static RE_HARD_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

/// Split text after every `.`, `!` or `?` that is followed by whitespace.
///
/// The terminal punctuation stays with its sentence; empty pieces are
/// dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(text) {
        // The punctuation mark is one ASCII byte.
        push_trimmed(&mut out, &text[start..m.start() + 1]);
        start = m.end();
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

/// Split text into paragraphs on blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for p in RE_PARAGRAPH_BREAK.split(text) {
        push_trimmed(&mut out, p);
    }
    out
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Group the sentences of each paragraph into chunks of at most
/// `max_sentences`, dropping chunks shorter than `min_chars`.
///
/// Paragraphs are separated by two or more newlines. After [`clean_text`]
/// a page has none, so the whole page is one paragraph.
pub fn chunk_paragraphs(text: &str, max_sentences: usize, min_chars: usize) -> Vec<String> {
    let max_sentences = max_sentences.max(1);
    let mut chunks = Vec::new();

    for paragraph in RE_HARD_PARAGRAPH_BREAK.split(text) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let sentences = split_sentences(paragraph);
        for group in sentences.chunks(max_sentences) {
            let chunk = group.join(" ");
            if chunk.chars().count() >= min_chars {
                chunks.push(chunk);
            }
        }
    }

    chunks
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ── Chapters ─────────────────────────────────────────────────────────────

/// Size of a fallback part when no chapter headings are found.
pub const CHAPTER_PART_CHARS: usize = 50_000;

/// Minimum body length for a detected chapter to be kept.
const MIN_CHAPTER_CHARS: usize = 100;

/// Matches a heading needed at least this many times before a pattern is
/// trusted.
const MIN_CHAPTER_HEADINGS: usize = 3;

static CHAPTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?im)(?:^|\n)(?:глава|chapter)\s+(\d+|[IVX]+)[:.\s]+([^\n]+)").unwrap(),
        Regex::new(r"(?im)(?:^|\n)(\d+)\.\s+([^\n]{10,100})\n").unwrap(),
        Regex::new(r"(?im)(?:^|\n)([IVX]+)\.\s+([^\n]{10,100})\n").unwrap(),
    ]
});

/// One chapter (or fixed-size part) of a book.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Chapter {
    /// Chapter number as printed (`"3"`, `"IV"`).
    pub number: String,
    pub title: String,
    pub content: String,
}

impl Chapter {
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Split the full text of a book into chapters.
///
/// Heading patterns are tried in order (`Chapter 3: Title`, `3. Title`,
/// `IV. Title`). The first pattern that matches at least three times and
/// yields at least one chapter body longer than 100 characters wins. With
/// no usable headings the text is cut into parts of
/// [`CHAPTER_PART_CHARS`] characters titled `Part N`.
pub fn split_into_chapters(full_text: &str) -> Vec<Chapter> {
    for pattern in CHAPTER_PATTERNS.iter() {
        let matches: Vec<_> = pattern.captures_iter(full_text).collect();
        if matches.len() < MIN_CHAPTER_HEADINGS {
            continue;
        }

        let mut chapters = Vec::new();
        for (i, caps) in matches.iter().enumerate() {
            let (Some(whole), Some(number), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(full_text.len());
            let start = whole.end().min(end);
            let content = full_text[start..end].trim();
            if content.chars().count() > MIN_CHAPTER_CHARS {
                chapters.push(Chapter {
                    number: number.as_str().to_string(),
                    title: title.as_str().trim().to_string(),
                    content: content.to_string(),
                });
            }
        }

        if !chapters.is_empty() {
            return chapters;
        }
    }

    split_into_parts(full_text, CHAPTER_PART_CHARS)
}

fn split_into_parts(text: &str, part_chars: usize) -> Vec<Chapter> {
    let mut parts = Vec::new();
    let mut rest = text;
    let mut n = 1;
    while !rest.is_empty() {
        let head = truncate_chars(rest, part_chars);
        parts.push(Chapter {
            number: n.to_string(),
            title: format!("Part {n}"),
            content: head.to_string(),
        });
        rest = &rest[head.len()..];
        n += 1;
    }
    parts
}
