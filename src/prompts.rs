//! Prompt templates for every LLM call in the crate.
//!
//! Keeping them here means changing what the model is asked never touches
//! retry or parsing code. Templates with arguments are functions; the rest
//! are constants. Every prompt that expects structured output names the
//! exact JSON shape the parsers in [`crate::pipeline`] read back.

/// Human-readable name of an ISO language code, for prompt text.
pub fn language_name(code: &str) -> &str {
    match code.to_lowercase().as_str() {
        "ru" => "Russian",
        "en" => "English",
        "uk" => "Ukrainian",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        _ => code,
    }
}

// ── Topic ────────────────────────────────────────────────────────────────

pub const TOPIC_SYSTEM: &str = "You identify the subject of non-fiction books. \
Read the opening text of a book and name its main topic in two to five words, \
lower case (for example: \"marketing and sales funnels\", \"negotiation\").\n\
Return JSON: {\"topic\": string, \"confidence\": number between 0 and 1}.";

pub fn topic_user(sample: &str) -> String {
    format!("Opening text of the book:\n\n{sample}")
}

// ── Structured extraction ────────────────────────────────────────────────

/// Default audience when none is configured.
pub const DEFAULT_AUDIENCE: &str = "entrepreneurs and marketers";

/// System prompt for pulling publishable quotes out of one chunk.
pub fn extract_quotes_system(topic: &str, audience: &str) -> String {
    format!(
        "You are an editor selecting quotes from a book about {topic} for {audience}.\n\
\n\
From the fragment you are given, pick the sentences worth posting on social media.\n\
Every quote must:\n\
- be a complete thought with a beginning and an end\n\
- make sense without the rest of the book\n\
- give the reader a practical idea, rule or insight\n\
- be copied from the fragment, not invented\n\
- end with '.', '!' or '?'\n\
\n\
Skip tables of contents, acknowledgements, links, page numbers and advertising.\n\
Return nothing rather than a weak quote.\n\
\n\
Return JSON:\n\
{{\"quotes\": [{{\"quote\": string, \"summary\": string (one-line idea), \
\"category\": string, \"style\": \"insight\"|\"rule\"|\"mistake\"|\"observation\", \
\"target_audience\": string, \"practical_value\": number 0-1}}]}}"
    )
}

// ── Engaging extraction ──────────────────────────────────────────────────

pub const ENGAGING_EXTRACT_SYSTEM: &str = "You are an editor of quotes for social media.\n\
Read the book fragment and pick one or two key ideas that entrepreneurs, marketers \
and course creators would find interesting.\n\
\n\
Each quote must be a COMPLETE, self-contained thought, not a torn-out fragment:\n\
- it has a beginning and an end\n\
- it is clear without further context\n\
- it has practical value for the reader\n\
- it is at most 250 characters and ends with '.', '!', '?' or '…'\n\
- it sounds like an insight and evokes recognition or emotion\n\
\n\
Do not return tables of contents, acknowledgements, links, technical terms or \
mentions of authors.\n\
\n\
Return JSON {\"quotes\": [...]} where every item has: original (source fragment), \
summary (short idea), quote, translated, engaging (true), category (marketing, \
psychology, sales, mindset), style (insight / rule / mistake / observation), \
meta {sentiment, target_audience, length}.";

// ── Quality analysis ─────────────────────────────────────────────────────

pub const QUALITY_SYSTEM: &str = "You assess candidate quotes for social media.\n\
\n\
Criteria:\n\
1. COMPLETENESS: is it a finished thought?\n\
2. CLARITY: is it understandable without surrounding text?\n\
3. PRACTICAL VALUE: is it useful to the reader?\n\
4. EMOTION: does it spark interest?\n\
5. CONTEXT: does it carry the point of its paragraph?\n\
\n\
Return JSON with fields:\n\
- quality: \"excellent\" | \"good\" | \"average\" | \"poor\"\n\
- confidence, context_score, practical_value, completeness: numbers 0-1\n\
- target_audience, category, sentiment: strings\n\
- reasoning: short explanation\n\
- summary: one-line idea of the quote\n\
- quote_type: \"full_paragraph\" | \"half_paragraph\" | \"specific_quote\" | \"multiple_sentences\"";

/// Context is cut to its first 1000 characters by the caller.
pub fn quality_user(quote: &str, context: &str) -> String {
    format!("Quote: {quote}\n\nContext: {context}")
}

// ── Topic relevance ──────────────────────────────────────────────────────

pub fn topic_relevance_system(topic: &str, author: &str) -> String {
    let mut s = format!(
        "You validate quotes. Answer strictly with JSON {{\"valid\": boolean}}.\n\
Criteria: on the book's topic ('{topic}'), no advertising of other books or \
authors, useful and substantive, no service text (contents, page headers, links)."
    );
    if !author.is_empty() {
        s.push_str(&format!(" The book's author is {author}."));
    }
    s
}

// ── Translation ──────────────────────────────────────────────────────────

pub fn translate_system(language: &str, topic: &str) -> String {
    let lang = language_name(language);
    format!(
        "You are a professional translator of books about {topic}.\n\
Translate the quote into {lang}. Keep the meaning, tone and brevity; use natural \
{lang} phrasing rather than a literal rendering; keep the original emphasis.\n\
Reply with the translation only, without quotes or comments."
    )
}

// ── Refinement ───────────────────────────────────────────────────────────

pub const REFINE_SYSTEM: &str = "You are a quote editor. Check and polish quotes for social media.\n\
CRITICAL: every quote must be a FULLY meaningful, COMPLETE thought.\n\
Check that each quote:\n\
- contains a finished thought with a beginning and an end\n\
- is clear without additional context\n\
- has practical value for the reader\n\
- is not a fragment of an unfinished sentence\n\
- ends with a full stop, exclamation mark or question mark\n\
\n\
For every item guarantee: quote length ≤ 250 characters, engaging = true for strong \
quotes (false for weak ones), no links, tables of contents or advertising.\n\
Return strictly JSON {\"quotes\": [...]} in the SAME ORDER as the input, with fields: \
original, summary, quote, translated, engaging, category, style, \
meta {sentiment, target_audience, length}.";

// ── Insights ─────────────────────────────────────────────────────────────

pub const INSIGHTS_SYSTEM: &str = "You analyse chapters of non-fiction books and extract \
every valuable insight. Return only JSON, without extra text.";

/// User prompt for one chapter. `content` is already cut by the caller.
pub fn insights_user(
    chapter_title: &str,
    content: &str,
    categories: &[&str],
    method_types: &[&str],
) -> String {
    format!(
        "Analyse the book chapter and extract ALL valuable insights.\n\
\n\
CHAPTER: {chapter_title}\n\
\n\
EXTRACT: practical methods and techniques, frameworks and systems, rules and \
principles, examples and case studies, mistakes to avoid, key insights.\n\
DO NOT EXTRACT: introductory phrases, references and footnotes, technical \
details, repetitions.\n\
\n\
EACH INSIGHT: 50-500 characters, a complete thought, understandable without \
context, practically useful.\n\
\n\
CATEGORIES: {categories}\n\
METHOD TYPES: {methods}\n\
\n\
Return strictly JSON:\n\
{{\"insights\": [{{\"text\": string (ready to publish), \"category\": string, \
\"method_type\": string, \"title\": string (short name of the idea), \
\"description\": string (1-2 sentences), \"practical_value\": number 0-1, \
\"actionable\": boolean}}]}}\n\
\n\
CHAPTER TEXT:\n{content}",
        categories = categories.join(", "),
        methods = method_types.join(", "),
    )
}
