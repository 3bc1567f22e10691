//! De-duplication and ordering of quote lists.

use crate::quote::Quote;
use std::collections::HashSet;

/// Keep the first quote for each trimmed text; quotes with empty text are
/// dropped. Order is otherwise preserved.
pub fn dedup_quotes(quotes: Vec<Quote>) -> Vec<Quote> {
    let mut seen: HashSet<String> = HashSet::with_capacity(quotes.len());
    quotes
        .into_iter()
        .filter(|q| {
            let key = q.dedup_key();
            !key.is_empty() && seen.insert(key.to_string())
        })
        .collect()
}

/// Stable sort by `meta.confidence`, highest first. Quotes without a
/// confidence sort last.
pub fn sort_by_confidence(quotes: &mut [Quote]) {
    quotes.sort_by(|a, b| {
        let a = a.meta.confidence.unwrap_or(f64::NEG_INFINITY);
        let b = b.meta.confidence.unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(text: &str, confidence: Option<f64>) -> Quote {
        let mut q = Quote::new(text);
        q.meta.confidence = confidence;
        q
    }

    #[test]
    fn dedup_keeps_first_by_trimmed_text() {
        let mut first = quote("Доверие продаёт.", None);
        first.page = Some(1);
        let mut second = quote("  Доверие продаёт.  ", None);
        second.page = Some(2);
        let out = dedup_quotes(vec![first, second, quote("Другая мысль.", None)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].page, Some(1));
        assert_eq!(out[1].quote, "Другая мысль.");
    }

    #[test]
    fn dedup_drops_empty_quotes() {
        let out = dedup_quotes(vec![quote("   ", None), quote("", None), quote("a.", None)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut quotes = vec![
            quote("low", Some(0.2)),
            quote("none", None),
            quote("high-a", Some(0.9)),
            quote("high-b", Some(0.9)),
        ];
        sort_by_confidence(&mut quotes);
        let order: Vec<_> = quotes.iter().map(|q| q.quote.as_str()).collect();
        assert_eq!(order, ["high-a", "high-b", "low", "none"]);
    }
}
