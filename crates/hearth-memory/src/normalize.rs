//! Text normalization applied before chunking, embedding, and retrieval.
//!
//! Queries and documents must go through the same pass, or their embeddings
//! drift apart. The pass strips everything that carries no semantic weight
//! for similarity search: code blocks, markup syntax, HTML, case, and
//! whitespace shape. Normalization is idempotent: running it twice yields
//! the same output.

use regex_lite::Regex;
use std::sync::OnceLock;

fn fenced_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").unwrap())
}

fn inline_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`\n]*`").unwrap())
}

fn html_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap())
}

fn html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap())
}

fn image() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap())
}

fn link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap())
}

// Header and blockquote markers in a single repeated alternation, so nested
// or mixed prefix runs ("## # x", "> > x", "> # x") strip in one pass and a
// second pass finds nothing new.
fn line_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:#{1,6}\s+|>\s?)+").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Normalize raw text for embedding and similarity search.
///
/// Strips fenced and inline code, flattens headers/links/images to their
/// visible text, drops HTML tags and comments and emphasis markup, collapses
/// whitespace, lowercases, and trims.
pub fn normalize(text: &str) -> String {
    let text = fenced_code().replace_all(text, " ");
    let text = inline_code().replace_all(&text, " ");
    let text = html_comment().replace_all(&text, " ");
    let text = html_tag().replace_all(&text, " ");
    // Emphasis chars go before the line-marker strip: "**# x**" must not
    // leave a bare header marker for a later pass to find.
    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '~'))
        .collect();
    let text = image().replace_all(&text, "$1");
    let text = link().replace_all(&text, "$1");
    let text = line_markers().replace_all(&text, "");
    let text = whitespace().replace_all(&text, " ");
    text.trim().to_lowercase()
}
