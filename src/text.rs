//! Text processing: tokenization, title derivation and snippet generation.
//!
//! The tokenizer here is the single one used for indexing, querying and
//! snippet highlighting, so a term that matches in the index is also the one
//! that gets highlighted in the excerpt.

use crate::admission::CanonicalUrl;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    /// Runs of letters and digits
    static ref WORD_REGEX: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
}

/// Terms too common to carry relevance
const STOP_WORDS: &[&str] = &[
    "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "has", "have",
    "how", "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "so", "such",
    "that", "the", "their", "then", "there", "these", "they", "this", "to", "was", "we", "what",
    "when", "which", "will", "with", "you", "your",
];

/// Separators between a page title and the site name
const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " :: ", " — ", " – "];

/// Path extensions dropped when deriving a title from a URL
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "md", "markdown", "mdx", "txt", "php", "aspx"];

/// Highlight marker placed around matched terms in snippets
const HIGHLIGHT: &str = "**";

/// Marker for elided text
const ELLIPSIS: char = '…';

/// A token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lower-cased term
    pub term: String,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

fn is_indexable(term: &str) -> bool {
    term.chars().nth(1).is_some() && !STOP_WORDS.contains(&term)
}

/// Split text into lower-cased index terms with their byte spans.
/// Single-character tokens and stop words are dropped.
pub fn tokenize(text: &str) -> Vec<Token> {
    WORD_REGEX
        .find_iter(text)
        .filter_map(|m| {
            let term = m.as_str().to_lowercase();
            is_indexable(&term).then(|| Token {
                term,
                start: m.start(),
                end: m.end(),
            })
        })
        .collect()
}

/// Tokenize a query into distinct terms, keeping first-occurrence order
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .map(|t| t.term)
        .filter(|term| seen.insert(term.clone()))
        .collect()
}

/// Produce a display title from an extracted candidate.
///
/// Whitespace is collapsed and a trailing site name (`Page | Site`) removed.
/// An empty candidate falls back to a title derived from the URL.
pub fn normalize_title(candidate: &str, url: &CanonicalUrl) -> String {
    let collapsed = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = strip_site_suffix(&collapsed);

    if stripped.is_empty() {
        title_from_url(url)
    } else {
        stripped.to_string()
    }
}

fn strip_site_suffix(title: &str) -> &str {
    let mut title = title.trim();
    for separator in TITLE_SEPARATORS {
        if let Some((head, _)) = title.split_once(separator)
            && !head.trim().is_empty()
        {
            title = head.trim();
        }
    }
    title
}

/// Derive a title from the last meaningful path segment of a URL.
///
/// `https://example.com/docs/getting-started.html` becomes `Getting Started`;
/// a URL without a path yields its host.
pub fn title_from_url(url: &CanonicalUrl) -> String {
    let segments: Vec<String> = url
        .as_url()
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let stem = segments
        .iter()
        .rev()
        .map(|segment| strip_extension(segment))
        .find(|stem| {
            let lower = stem.to_ascii_lowercase();
            !stem.is_empty() && lower != "index" && lower != "readme"
        });

    let words: Vec<String> = stem
        .unwrap_or_default()
        .split(|c: char| c == '-' || c == '_' || c == '+' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();

    if words.is_empty() {
        url.host().to_string()
    } else {
        words.join(" ")
    }
}

fn strip_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext)) if PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => segment,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Truncate to at most `max_len` characters
pub fn truncate_chars(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

/// Build a query-relevant excerpt of at most `max_len` characters.
///
/// The excerpt is centered on the densest cluster of query-term occurrences,
/// widened to sentence or line boundaries where the length allows, with
/// matched terms wrapped in `**`. Without any match the leading text is used.
pub fn snippet(body: &str, query_terms: &[String], max_len: usize) -> String {
    if max_len == 0 || body.trim().is_empty() {
        return String::new();
    }

    let terms: HashSet<&str> = query_terms.iter().map(String::as_str).collect();
    let hits: Vec<Token> = tokenize(body)
        .into_iter()
        .filter(|t| terms.contains(t.term.as_str()))
        .collect();

    if hits.is_empty() {
        return leading(body, max_len);
    }

    let (first, last) = densest_window(body, &hits, max_len);
    let (left, right) = expand_to_boundaries(body, hits[first].start, hits[last].end, max_len);
    render(body, left, right, &terms, max_len)
}

/// Index range `(first, last)` into `hits` covering the most hits within `max_len` chars.
/// Earliest window wins ties.
fn densest_window(body: &str, hits: &[Token], max_len: usize) -> (usize, usize) {
    let mut byte_offsets = Vec::with_capacity(hits.len() * 2);
    for hit in hits {
        byte_offsets.push(hit.start);
        byte_offsets.push(hit.end);
    }
    let chars = char_positions(body, &byte_offsets);
    let start_char = |i: usize| chars[i * 2];
    let end_char = |i: usize| chars[i * 2 + 1];

    let mut best = (0, 0);
    let mut best_count = 0;
    let mut j = 0;
    for i in 0..hits.len() {
        j = j.max(i);
        while j + 1 < hits.len() && end_char(j + 1) - start_char(i) <= max_len {
            j += 1;
        }
        let count = j - i + 1;
        if count > best_count {
            best_count = count;
            best = (i, j);
        }
    }
    best
}

/// Character positions of non-decreasing byte offsets, in one pass over `body`
fn char_positions(body: &str, byte_offsets: &[usize]) -> Vec<usize> {
    let mut positions = Vec::with_capacity(byte_offsets.len());
    let mut chars = body.char_indices().peekable();
    let mut count = 0;
    for &offset in byte_offsets {
        while let Some(&(b, _)) = chars.peek() {
            if b >= offset {
                break;
            }
            chars.next();
            count += 1;
        }
        positions.push(count);
    }
    positions
}

fn is_sentence_end(body: &str, idx: usize, c: char) -> bool {
    c == '\n'
        || (matches!(c, '.' | '!' | '?')
            && body[idx + c.len_utf8()..]
                .chars()
                .next()
                .is_none_or(char::is_whitespace))
}

/// Widen `[start, end)` towards sentence boundaries without exceeding `max_len` chars
fn expand_to_boundaries(body: &str, start: usize, end: usize, max_len: usize) -> (usize, usize) {
    let window = body[start..end].chars().count();
    if window >= max_len {
        return (start, end);
    }
    let slack = max_len - window;

    let mut left = start;
    let mut found = false;
    for (steps, (idx, c)) in body[..start].char_indices().rev().enumerate() {
        if steps >= slack {
            break;
        }
        if is_sentence_end(body, idx, c) {
            left = idx + c.len_utf8();
            found = true;
            break;
        }
    }
    if !found {
        left = body[..start]
            .char_indices()
            .rev()
            .take(slack / 2)
            .last()
            .map(|(idx, _)| idx)
            .unwrap_or(start);
        if left > 0
            && let Some(ws) = body[left..start].find(char::is_whitespace)
        {
            left += ws;
        }
    }

    let used = body[left..end].chars().count();
    let remaining = max_len.saturating_sub(used);
    let mut right = end;
    let mut last_space = None;
    for (steps, (offset, c)) in body[end..].char_indices().enumerate() {
        let idx = end + offset;
        if steps >= remaining {
            right = last_space.unwrap_or(idx);
            return (left, right);
        }
        if is_sentence_end(body, idx, c) {
            right = if c == '\n' { idx } else { idx + c.len_utf8() };
            return (left, right);
        }
        if c.is_whitespace() {
            last_space = Some(idx);
        }
        right = idx + c.len_utf8();
    }
    (left, right)
}

fn highlight(piece: &str, terms: &HashSet<&str>) -> String {
    let mut out = String::with_capacity(piece.len() + 8);
    let mut cursor = 0;
    for m in WORD_REGEX.find_iter(piece) {
        let already_bold =
            piece[..m.start()].ends_with(HIGHLIGHT) && piece[m.end()..].starts_with(HIGHLIGHT);
        if !already_bold && terms.contains(m.as_str().to_lowercase().as_str()) {
            out.push_str(&piece[cursor..m.start()]);
            out.push_str(HIGHLIGHT);
            out.push_str(m.as_str());
            out.push_str(HIGHLIGHT);
            cursor = m.end();
        }
    }
    out.push_str(&piece[cursor..]);
    out
}

fn render(body: &str, left: usize, right: usize, terms: &HashSet<&str>, max_len: usize) -> String {
    let lead = !body[..left].trim().is_empty();
    let trail = !body[right..].trim().is_empty();
    let budget = max_len.saturating_sub(usize::from(lead) + 1);

    let mut out = String::new();
    let mut used = 0;
    let mut truncated = false;
    for piece in body[left..right].split_whitespace() {
        let rendered = highlight(piece, terms);
        let cost = rendered.chars().count() + usize::from(used > 0);
        if used + cost > budget {
            truncated = true;
            break;
        }
        if used > 0 {
            out.push(' ');
        }
        out.push_str(&rendered);
        used += cost;
    }

    if out.is_empty() {
        let plain = body[left..right].split_whitespace().collect::<Vec<_>>().join(" ");
        out = truncate_chars(&plain, budget);
        truncated = true;
    }

    let mut result = String::with_capacity(out.len() + 8);
    if lead {
        result.push(ELLIPSIS);
    }
    result.push_str(&out);
    if trail || truncated {
        result.push(ELLIPSIS);
    }
    truncate_chars(&result, max_len)
}

/// Leading text of the body, collapsed, within `max_len` characters
fn leading(body: &str, max_len: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }

    let mut cut = truncate_chars(&collapsed, max_len.saturating_sub(1));
    if let Some(space) = cut.rfind(' ')
        && space >= cut.len() / 2
    {
        cut.truncate(space);
    }
    cut.push(ELLIPSIS);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionFilter;

    fn url(raw: &str) -> CanonicalUrl {
        AdmissionFilter::new(["example.com"]).admit(raw).unwrap()
    }

    fn terms(query: &str) -> Vec<String> {
        tokenize_query(query)
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("The Widget API: a widget-factory for S3");
        let words: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(words, vec!["widget", "api", "widget", "factory", "s3"]);
        assert_eq!(tokens[0].start, 4);
        assert_eq!(tokens[0].end, 10);
    }

    #[test]
    fn test_tokenize_unicode() {
        let words: Vec<String> = tokenize("Über Größe café").into_iter().map(|t| t.term).collect();
        assert_eq!(words, vec!["über", "größe", "café"]);
    }

    #[test]
    fn test_tokenize_query_dedups() {
        assert_eq!(terms("Widget widget GUIDE the"), vec!["widget", "guide"]);
        assert!(terms("the a of").is_empty());
    }

    #[test]
    fn test_normalize_title() {
        let u = url("https://example.com/docs/page");
        assert_eq!(normalize_title("  Getting \n Started  ", &u), "Getting Started");
        assert_eq!(normalize_title("Page Title | Site Name", &u), "Page Title");
        assert_eq!(normalize_title("Page Title - Site Name", &u), "Page Title");
        assert_eq!(normalize_title("| Site Name", &u), "| Site Name");
        assert_eq!(normalize_title("", &u), "Page");
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            title_from_url(&url("https://example.com/docs/getting-started.html")),
            "Getting Started"
        );
        assert_eq!(
            title_from_url(&url("https://example.com/docs/api_reference/index.md")),
            "Api Reference"
        );
        assert_eq!(title_from_url(&url("https://example.com/my%20guide")), "My Guide");
        assert_eq!(title_from_url(&url("https://example.com/")), "example.com");
        assert_eq!(title_from_url(&url("https://example.com/v1.2")), "V1.2");
    }

    #[test]
    fn test_snippet_without_match_uses_leading_text() {
        let body = "Intro line.\nSecond line with more words in it.";
        assert_eq!(snippet(body, &terms("absent"), 200), "Intro line. Second line with more words in it.");

        let short = snippet(body, &terms("absent"), 20);
        assert!(short.chars().count() <= 20);
        assert!(short.starts_with("Intro line."));
        assert!(short.ends_with('…'));
    }

    #[test]
    fn test_snippet_highlights_terms() {
        let body = "Widgets are configured per project. A widget has a name.";
        let s = snippet(body, &terms("widget"), 200);
        assert!(s.contains("**widget**"), "{}", s);
        assert!(s.chars().count() <= 200);
    }

    #[test]
    fn test_snippet_keeps_existing_bold_terms() {
        let body = "Install the **widget**. Then restart the widget service.";
        let s = snippet(body, &terms("widget"), 200);
        assert!(!s.contains("****"), "{}", s);
        assert_eq!(s.matches("**widget**").count(), 2, "{}", s);
    }

    #[test]
    fn test_snippet_finds_dense_region() {
        let filler = "Lorem ipsum dolor sit amet consectetur. ".repeat(20);
        let body = format!(
            "{}The widget engine drives every widget. Configure the widget here. {}",
            filler, filler
        );
        let s = snippet(&body, &terms("widget"), 120);
        assert!(s.starts_with('…'), "{}", s);
        assert!(s.ends_with('…'), "{}", s);
        assert_eq!(s.matches("**widget**").count(), 3, "{}", s);
        assert!(s.chars().count() <= 120);
    }

    #[test]
    fn test_snippet_respects_max_length() {
        let body = "Widget ".repeat(100) + "end of the widget manual.";
        for max_len in [0, 1, 2, 5, 10, 17, 40, 80, 160] {
            let s = snippet(&body, &terms("widget manual"), max_len);
            assert!(s.chars().count() <= max_len, "{} > {}", s.chars().count(), max_len);
        }
    }

    #[test]
    fn test_snippet_is_deterministic() {
        let body = "Alpha widget beta. Gamma widget delta. Epsilon widget zeta.";
        let a = snippet(body, &terms("widget delta"), 30);
        let b = snippet(body, &terms("widget delta"), 30);
        assert_eq!(a, b);
    }

    #[test]
    fn test_snippet_empty_body() {
        assert_eq!(snippet("", &terms("widget"), 100), "");
        assert_eq!(snippet("   \n", &terms("widget"), 100), "");
    }
}
