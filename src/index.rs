//! Relevance index over known documents.
//!
//! Every known document has an [`IndexEntry`]: a term-weight vector plus a
//! length normalization factor. Fetched documents are indexed from title and
//! body; documents only known from the catalog are indexed from their title
//! and scored at reduced weight.
//!
//! Scoring is TF-IDF style:
//!
//! ```text
//! score(d) = norm(d) * Σ idf(t) * (1 + ln w(t, d))     for query terms t in d
//! idf(t)   = ln(1 + N / df(t))
//! norm(d)  = 1 / (1 + ln len(d))
//! ```
//!
//! where `w(t, d)` sums the positional weight of each occurrence of `t`.
//! Positional weights come from a [`TermWeighting`], kept separate from the
//! TF-IDF arithmetic so the scheme can be swapped.
//!
//! Updates are incremental and copy-on-update: a writer clones the current
//! [`IndexSnapshot`], adjusts the document frequencies of one entry, and
//! swaps the new snapshot in. Readers always rank over a complete snapshot.

use crate::cache::CacheListener;
use crate::text::{Token, tokenize};
use crate::types::Document;
use pulldown_cmark::{Event, Options, Parser, Tag};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error};

/// Weight of tokens on Markdown heading lines (and of the document title)
pub const HEADING_WEIGHT: f64 = 2.0;

/// Weight of tokens inside emphasized spans
pub const EMPHASIS_WEIGHT: f64 = 1.5;

/// Multiplier for documents indexed from their title only
pub const TITLE_ONLY_FACTOR: f64 = 0.5;

/// Length assumed for title-only entries, so a short title does not look
/// like a tiny, perfectly focused document
const TITLE_ONLY_PIVOT_LEN: usize = 64;

/// Assigns a positional weight to each token of a text
pub trait TermWeighting: Send + Sync {
    /// One weight per token, aligned with `tokens`; every weight is at least 1.0
    fn weights(&self, text: &str, tokens: &[Token]) -> Vec<f64>;
}

/// Every position weighs the same
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformWeighting;

impl TermWeighting for UniformWeighting {
    fn weights(&self, _text: &str, tokens: &[Token]) -> Vec<f64> {
        vec![1.0; tokens.len()]
    }
}

/// Boosts tokens on heading lines and inside emphasis
#[derive(Debug, Clone, Copy)]
pub struct MarkdownWeighting {
    /// Weight for ATX (`# Title`) and setext (`Title\n===`) heading lines
    pub heading: f64,
    /// Weight for emphasized spans
    pub emphasis: f64,
}

impl Default for MarkdownWeighting {
    fn default() -> Self {
        Self {
            heading: HEADING_WEIGHT,
            emphasis: EMPHASIS_WEIGHT,
        }
    }
}

impl TermWeighting for MarkdownWeighting {
    fn weights(&self, text: &str, tokens: &[Token]) -> Vec<f64> {
        let spans = MarkdownSpans::parse(text);
        let mut in_heading = SpanCursor::new(&spans.headings);
        let mut in_emphasis = SpanCursor::new(&spans.emphasis);

        tokens
            .iter()
            .map(|token| {
                let mut weight: f64 = 1.0;
                if in_heading.covers(token.start) {
                    weight = weight.max(self.heading);
                }
                if in_emphasis.covers(token.start) {
                    weight = weight.max(self.emphasis);
                }
                weight
            })
            .collect()
    }
}

/// Walks sorted, non-overlapping spans alongside ascending positions
struct SpanCursor<'a> {
    spans: &'a [(usize, usize)],
    next: usize,
}

impl<'a> SpanCursor<'a> {
    fn new(spans: &'a [(usize, usize)]) -> Self {
        Self { spans, next: 0 }
    }

    fn covers(&mut self, position: usize) -> bool {
        while self.next < self.spans.len() && self.spans[self.next].1 <= position {
            self.next += 1;
        }
        self.spans
            .get(self.next)
            .is_some_and(|&(start, end)| start <= position && position < end)
    }
}

/// Byte ranges of heading and emphasis elements, sorted and non-overlapping
#[derive(Debug, Default)]
struct MarkdownSpans {
    headings: Vec<(usize, usize)>,
    emphasis: Vec<(usize, usize)>,
}

impl MarkdownSpans {
    /// Code blocks and code spans yield no heading or emphasis events, so
    /// their text keeps the base weight.
    fn parse(text: &str) -> Self {
        let mut headings = Vec::new();
        let mut emphasis = Vec::new();
        for (event, range) in Parser::new_ext(text, Options::empty()).into_offset_iter() {
            match event {
                Event::Start(Tag::Heading { .. }) => headings.push((range.start, range.end)),
                Event::Start(Tag::Emphasis | Tag::Strong) => emphasis.push((range.start, range.end)),
                _ => {},
            }
        }
        Self {
            headings: merge_spans(headings),
            emphasis: merge_spans(emphasis),
        }
    }
}

/// Union of spans listed in start order
fn merge_spans(spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// What an entry was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// Catalog title only, body not fetched
    TitleOnly,
    /// Title and fetched body
    Body,
}

/// Per-document statistics
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Canonical document URL
    pub url: String,
    /// Title at indexing time
    pub title: String,
    /// What the statistics were built from
    pub source: EntrySource,
    terms: HashMap<String, f64>,
    norm: f64,
}

impl IndexEntry {
    /// Entry for a document known only by its title
    pub fn title_only(url: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        let mut terms = HashMap::new();
        for token in tokenize(&title) {
            *terms.entry(token.term).or_insert(0.0) += HEADING_WEIGHT;
        }
        Self {
            url: url.into(),
            title,
            source: EntrySource::TitleOnly,
            terms,
            norm: length_norm(TITLE_ONLY_PIVOT_LEN),
        }
    }

    /// Entry for a fetched body. The title is weighted like a heading.
    pub fn from_body(
        url: impl Into<String>,
        title: impl Into<String>,
        body: &str,
        weighting: &dyn TermWeighting,
    ) -> Self {
        let title = title.into();
        let mut terms = HashMap::new();

        let title_tokens = tokenize(&title);
        for token in &title_tokens {
            *terms.entry(token.term.clone()).or_insert(0.0) += HEADING_WEIGHT;
        }

        let body_tokens = tokenize(body);
        let weights = weighting.weights(body, &body_tokens);
        debug_assert_eq!(weights.len(), body_tokens.len());
        for (token, weight) in body_tokens.iter().zip(weights) {
            *terms.entry(token.term.clone()).or_insert(0.0) += weight.max(1.0);
        }

        Self {
            url: url.into(),
            title,
            source: EntrySource::Body,
            terms,
            norm: length_norm(title_tokens.len() + body_tokens.len()),
        }
    }

    /// Summed positional weight of a term, if present
    pub fn term_weight(&self, term: &str) -> Option<f64> {
        self.terms.get(term).copied()
    }

    /// Number of distinct terms
    pub fn distinct_terms(&self) -> usize {
        self.terms.len()
    }
}

fn length_norm(len: usize) -> f64 {
    1.0 / (1.0 + (len.max(1) as f64).ln())
}

/// A ranked match
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Canonical document URL
    pub url: String,
    /// Title at indexing time
    pub title: String,
    /// Score normalized into [0, 1] against the best hit
    pub score: f64,
    /// Unnormalized score
    pub raw_score: f64,
    /// Number of distinct query terms the document contains
    pub overlap: usize,
    /// Whether the document was ranked from its title only
    pub source: EntrySource,
}

/// Immutable view of the whole index
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    entries: HashMap<String, Arc<IndexEntry>>,
    doc_freq: HashMap<String, usize>,
}

impl IndexSnapshot {
    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no document is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a URL
    pub fn entry(&self, url: &str) -> Option<&Arc<IndexEntry>> {
        self.entries.get(url)
    }

    /// Number of documents containing `term`
    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    fn insert(&mut self, entry: IndexEntry) {
        if let Some(old) = self.entries.remove(&entry.url) {
            self.release(&old);
        }
        for term in entry.terms.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.entries.insert(entry.url.clone(), Arc::new(entry));
    }

    fn remove(&mut self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some(old) => {
                self.release(&old);
                true
            },
            None => false,
        }
    }

    fn release(&mut self, old: &IndexEntry) {
        for term in old.terms.keys() {
            match self.doc_freq.get_mut(term) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.doc_freq.remove(term);
                },
                None => {
                    error!(term = %term, url = %old.url, "Document frequency underflow, index is inconsistent");
                    debug_assert!(
                        false,
                        "document frequency underflow for {term:?} in {}",
                        old.url
                    );
                },
            }
        }
    }

    /// Rank documents for distinct query terms, best first, at most `k`
    pub fn rank(&self, query_terms: &[String], k: usize) -> Vec<Hit> {
        if k == 0 || query_terms.is_empty() || self.entries.is_empty() {
            return Vec::new();
        }

        let n = self.entries.len() as f64;
        let idfs: Vec<(&str, f64)> = query_terms
            .iter()
            .filter_map(|t| {
                self.doc_freq
                    .get(t)
                    .map(|&df| (t.as_str(), (1.0 + n / df as f64).ln()))
            })
            .collect();
        if idfs.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<Hit> = self
            .entries
            .values()
            .filter_map(|entry| {
                let mut raw = 0.0;
                let mut overlap = 0;
                for (term, idf) in &idfs {
                    if let Some(weight) = entry.terms.get(*term) {
                        raw += idf * (1.0 + weight.ln());
                        overlap += 1;
                    }
                }
                raw *= entry.norm;
                if entry.source == EntrySource::TitleOnly {
                    raw *= TITLE_ONLY_FACTOR;
                }
                (overlap > 0 && raw > 0.0).then(|| Hit {
                    url: entry.url.clone(),
                    title: entry.title.clone(),
                    score: 0.0,
                    raw_score: raw,
                    overlap,
                    source: entry.source,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then(b.overlap.cmp(&a.overlap))
                .then_with(|| a.url.cmp(&b.url))
        });
        hits.truncate(k);

        let max = hits.first().map(|h| h.raw_score).unwrap_or(1.0);
        for hit in &mut hits {
            hit.score = (hit.raw_score / max).clamp(0.0, 1.0);
        }
        hits
    }
}

/// Incrementally maintained TF-IDF index
pub struct RelevanceIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
    weighting: Arc<dyn TermWeighting>,
}

impl RelevanceIndex {
    /// Empty index with Markdown-aware weighting
    pub fn new() -> Self {
        Self::with_weighting(Arc::new(MarkdownWeighting::default()))
    }

    /// Empty index with a custom weighting for structured documents
    pub fn with_weighting(weighting: Arc<dyn TermWeighting>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
            weighting,
        }
    }

    /// Current snapshot; stays valid and unchanged while writers proceed
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no document is indexed
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn update<F: FnOnce(&mut IndexSnapshot)>(&self, apply: F) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = IndexSnapshot::clone(&self.snapshot());
        apply(&mut next);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Add title-only entries in one update. Documents already indexed from a
    /// body keep their body statistics.
    pub fn seed_titles<I>(&self, documents: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let documents: Vec<(String, String)> = documents.into_iter().collect();
        if documents.is_empty() {
            return;
        }
        self.update(|snapshot| {
            for (url, title) in documents {
                let has_body = snapshot
                    .entry(&url)
                    .is_some_and(|e| e.source == EntrySource::Body);
                if !has_body {
                    snapshot.insert(IndexEntry::title_only(url, title));
                }
            }
        });
    }

    /// Add or replace the entry for a document: body statistics when the body
    /// is present, title-only otherwise
    pub fn upsert(&self, document: &Document) {
        let entry = match document.body.as_deref() {
            Some(body) if document.format.is_structured() => IndexEntry::from_body(
                document.url.as_str(),
                document.title.as_str(),
                body,
                self.weighting.as_ref(),
            ),
            Some(body) => IndexEntry::from_body(
                document.url.as_str(),
                document.title.as_str(),
                body,
                &UniformWeighting,
            ),
            None => IndexEntry::title_only(document.url.as_str(), document.title.as_str()),
        };
        debug!(
            url = %entry.url,
            terms = entry.distinct_terms(),
            source = ?entry.source,
            "Indexing document"
        );
        self.update(|snapshot| snapshot.insert(entry));
    }

    /// Drop a document from the index
    pub fn remove(&self, url: &str) -> bool {
        let mut removed = false;
        self.update(|snapshot| removed = snapshot.remove(url));
        removed
    }

    /// Rank documents for distinct query terms, at most `k`
    pub fn search(&self, query_terms: &[String], k: usize) -> Vec<Hit> {
        self.snapshot().rank(query_terms, k)
    }
}

impl CacheListener for RelevanceIndex {
    fn on_populated(&self, document: &Document) {
        self.upsert(document);
    }

    fn on_expired(&self, document: &Document) {
        self.upsert(document);
    }
}

impl Default for RelevanceIndex {
    fn default() -> Self {
        Self::new()
    }
}
