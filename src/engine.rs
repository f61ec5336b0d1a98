//! The documentation engine: search and fetch over the admitted catalog.
//!
//! [`DocsEngine`] owns the admission filter, the document cache and the
//! relevance index. The index listens to the cache, so every successful fetch
//! enriches search immediately.

use crate::admission::AdmissionFilter;
use crate::cache::{CacheConfig, CacheStats, DocumentCache};
use crate::catalog::{CatalogLoad, CatalogLoader};
use crate::fetcher::{ContentFetch, FetchConfig, HttpFetcher};
use crate::index::{EntrySource, Hit, RelevanceIndex};
use crate::text::{snippet, tokenize_query, truncate_chars};
use crate::types::{
    CatalogEntry, Document, FetchResponse, ScriptoriumError, ScriptoriumResult, SearchResult,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Default snippet length in characters
pub const DEFAULT_SNIPPET_LENGTH: usize = 200;

/// Default number of search results
pub const DEFAULT_SEARCH_LIMIT: i64 = 5;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Allow-listed domains; an empty list admits nothing
    pub allowed_domains: Vec<String>,

    /// Catalog sources: local paths or URLs
    pub catalog_sources: Vec<String>,

    /// Maximum snippet length in characters
    pub snippet_max_len: usize,

    /// Whether admitted URLs outside the catalog may be fetched
    pub allow_uncataloged: bool,

    /// Whether search fetches its hits and re-ranks
    pub hydrate_results: bool,

    /// Network settings
    pub fetch: FetchConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            catalog_sources: Vec::new(),
            snippet_max_len: DEFAULT_SNIPPET_LENGTH,
            allow_uncataloged: true,
            hydrate_results: false,
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Search-and-fetch engine over one allow-listed catalog
pub struct DocsEngine {
    config: EngineConfig,
    filter: Arc<AdmissionFilter>,
    fetcher: Arc<dyn ContentFetch>,
    cache: DocumentCache,
    index: Arc<RelevanceIndex>,
}

impl DocsEngine {
    /// Create an engine that fetches over HTTP
    pub fn new(config: EngineConfig) -> ScriptoriumResult<Self> {
        let filter = Arc::new(AdmissionFilter::new(&config.allowed_domains));
        let fetcher = Arc::new(HttpFetcher::new(filter, config.fetch.clone())?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Create an engine with a custom fetcher
    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn ContentFetch>) -> Self {
        let filter = Arc::new(AdmissionFilter::new(&config.allowed_domains));
        let index = Arc::new(RelevanceIndex::new());
        let cache = DocumentCache::with_listener(fetcher.clone(), config.cache.clone(), index.clone());

        if filter.allowed_domains().is_empty() {
            warn!("Allow-list is empty, every URL will be rejected");
        }

        Self {
            config,
            filter,
            fetcher,
            cache,
            index,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Admission filter in use
    pub fn filter(&self) -> &AdmissionFilter {
        &self.filter
    }

    /// Document cache
    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    /// Relevance index
    pub fn index(&self) -> &RelevanceIndex {
        &self.index
    }

    /// Load the configured catalog sources and seed their entries
    pub async fn load_catalog(&self) -> CatalogLoad {
        let loader = CatalogLoader::new(self.filter.clone(), self.fetcher.clone());
        let load = loader.load(&self.config.catalog_sources).await;
        let added = self.seed(&load.entries);
        info!(
            sources = self.config.catalog_sources.len(),
            entries = load.entries.len(),
            added = added,
            failures = load.failures.len(),
            "Catalog loaded"
        );
        load
    }

    /// Register catalog entries without fetching them; they become searchable
    /// by title. Returns the number of newly known URLs.
    pub fn seed(&self, entries: &[CatalogEntry]) -> usize {
        let added = self.cache.seed(entries);
        self.index.seed_titles(
            entries
                .iter()
                .map(|entry| (entry.url.to_string(), self.cache.peek_title(&entry.url))),
        );
        added
    }

    /// Ranked search over known documents. `k <= 0` yields no results.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, k: i64) -> Vec<SearchResult> {
        if k <= 0 {
            return Vec::new();
        }
        let k = usize::try_from(k).unwrap_or(usize::MAX);

        let terms = tokenize_query(query);
        if terms.is_empty() {
            debug!(query = %query, "Query has no searchable terms");
            return Vec::new();
        }

        let mut hits = self.index.search(&terms, k);
        if self.config.hydrate_results && hits.iter().any(|h| h.source == EntrySource::TitleOnly) {
            self.hydrate(&hits).await;
            hits = self.index.search(&terms, k);
        }

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let body = self.cache.cached(&hit.url).await.and_then(|d| d.body.clone());
            let snippet = match body {
                Some(body) => snippet(&body, &terms, self.config.snippet_max_len),
                None => truncate_chars(&hit.title, self.config.snippet_max_len),
            };
            results.push(SearchResult {
                url: hit.url,
                title: hit.title,
                score: round_score(hit.score),
                snippet,
            });
        }

        info!(query = %query, results = results.len(), "Search completed");
        results
    }

    /// Fetch the bodies of title-only hits concurrently. Failures are ignored.
    async fn hydrate(&self, hits: &[Hit]) {
        let fetches = hits
            .iter()
            .filter(|hit| hit.source == EntrySource::TitleOnly)
            .filter_map(|hit| self.filter.admit(&hit.url).ok())
            .map(|url| async move { self.cache.get_or_fetch(&url).await });

        let results = join_all(fetches).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(fetched = results.len() - failed, failed = failed, "Hydrated search hits");
    }

    /// Full document for a URL, or a classified error
    #[instrument(skip(self))]
    pub async fn fetch(&self, uri: &str) -> FetchResponse {
        match self.fetch_document(uri).await {
            Ok(document) => FetchResponse::from(document.as_ref()),
            Err(e) => FetchResponse::error(uri, &e),
        }
    }

    /// Admit, then return the cached document or fetch it
    pub async fn fetch_document(&self, uri: &str) -> ScriptoriumResult<Arc<Document>> {
        let url = self.filter.admit(uri).map_err(|rejection| {
            warn!(uri = %uri, reason = %rejection, "Rejected fetch");
            ScriptoriumError::from(rejection)
        })?;

        if !self.config.allow_uncataloged && !self.cache.is_cataloged(url.as_str()) {
            return Err(ScriptoriumError::NotFound(url.to_string()));
        }

        self.cache.get_or_fetch(&url).await
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Round a normalized score to 3 decimals
fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}
