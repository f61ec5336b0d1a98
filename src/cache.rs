//! Document cache with lazy, coalesced population.
//!
//! The cache keeps two things apart: the set of *known* documents (catalog
//! entries and directly fetched URLs, with their best title and last failure)
//! and the fetched *bodies*. Bodies live in a `moka` cache whose per-key
//! initialization guarantees that concurrent misses on one URL share a single
//! fetch. Failed fetches are never stored, so the next call retries.

use crate::admission::CanonicalUrl;
use crate::fetcher::ContentFetch;
use crate::text::title_from_url;
use crate::types::{CatalogEntry, Document, ScriptoriumError, ScriptoriumResult};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Configuration for the document cache
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Drop fetched bodies after this long; `None` keeps them for the process lifetime
    pub ttl: Option<Duration>,
}

/// Observer of body population and expiry
pub trait CacheListener: Send + Sync {
    /// A body was fetched and stored. Called once per successful fetch.
    fn on_populated(&self, document: &Document);

    /// A body expired; `document` carries the title but no body
    fn on_expired(&self, document: &Document);
}

#[derive(Debug, Clone, Default)]
struct KnownDocument {
    title_hint: Option<String>,
    fetched_title: Option<String>,
    fetched_at: Option<DateTime<Utc>>,
    in_catalog: bool,
    last_error: Option<ScriptoriumError>,
}

type KnownMap = Arc<RwLock<BTreeMap<String, KnownDocument>>>;

/// In-memory document store keyed by canonical URL
pub struct DocumentCache {
    known: KnownMap,
    bodies: Cache<String, Arc<Document>>,
    fetcher: Arc<dyn ContentFetch>,
    listener: Option<Arc<dyn CacheListener>>,
}

impl DocumentCache {
    /// Create a cache without a listener
    pub fn new(fetcher: Arc<dyn ContentFetch>, config: CacheConfig) -> Self {
        Self::build(fetcher, config, None)
    }

    /// Create a cache that reports population and expiry to `listener`
    pub fn with_listener(
        fetcher: Arc<dyn ContentFetch>,
        config: CacheConfig,
        listener: Arc<dyn CacheListener>,
    ) -> Self {
        Self::build(fetcher, config, Some(listener))
    }

    fn build(
        fetcher: Arc<dyn ContentFetch>,
        config: CacheConfig,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Self {
        let known: KnownMap = Arc::default();

        let mut builder = Cache::<String, Arc<Document>>::builder();
        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        let expiry_known = known.clone();
        let expiry_listener = listener.clone();
        let bodies = builder
            .eviction_listener(move |key: Arc<String>, document: Arc<Document>, cause| {
                if cause != RemovalCause::Expired {
                    return;
                }
                // A body replaced by a newer fetch may still report its expiry late.
                // The guard is held through the listener call so a concurrent
                // refetch cannot record its body in between.
                let mut known = write_known(&expiry_known);
                match known.get_mut(key.as_str()) {
                    Some(record) if record.fetched_at == document.fetched_at => {
                        record.fetched_at = None;
                    },
                    _ => return,
                }
                debug!(url = %key, "Cached body expired");
                if let Some(listener) = &expiry_listener {
                    let downgraded = Document {
                        body: None,
                        fetched_at: None,
                        ..Document::clone(&document)
                    };
                    listener.on_expired(&downgraded);
                }
                drop(known);
            })
            .build();

        Self {
            known,
            bodies,
            fetcher,
            listener,
        }
    }

    /// Register catalog entries as known documents without fetching them.
    /// Returns the number of URLs that were not known before.
    pub fn seed(&self, entries: &[CatalogEntry]) -> usize {
        let mut known = write_known(&self.known);
        let mut added = 0;
        for entry in entries {
            let record = known.entry(entry.url.to_string()).or_insert_with(|| {
                added += 1;
                KnownDocument::default()
            });
            record.in_catalog = true;
            if record.title_hint.is_none() {
                record.title_hint = entry.title_hint.clone();
            }
        }
        debug!(added = added, total = known.len(), "Seeded document cache");
        added
    }

    /// Return the cached document, fetching it on a miss.
    ///
    /// Concurrent callers for the same URL share one fetch and observe the
    /// same document or the same failure.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_or_fetch(&self, url: &CanonicalUrl) -> ScriptoriumResult<Arc<Document>> {
        let key = url.as_str().to_string();

        if let Some(document) = self.bodies.get(&key).await {
            debug!(url = %url, "Cache hit for document");
            return Ok(document);
        }

        self.bodies
            .try_get_with(key, self.populate(url))
            .await
            .map_err(|e| ScriptoriumError::clone(&e))
    }

    /// Fetch and record one document. Runs at most once at a time per URL.
    async fn populate(&self, url: &CanonicalUrl) -> ScriptoriumResult<Arc<Document>> {
        match self.fetcher.fetch(url).await {
            Ok(content) => {
                let document = Arc::new(Document {
                    url: url.clone(),
                    title: content.title,
                    body: Some(content.body),
                    fetched_at: Some(Utc::now()),
                    format: content.format,
                });

                {
                    let mut known = write_known(&self.known);
                    let record = known.entry(url.to_string()).or_default();
                    record.fetched_title = Some(document.title.clone());
                    record.fetched_at = document.fetched_at;
                    record.last_error = None;
                }

                if let Some(listener) = &self.listener {
                    listener.on_populated(&document);
                }

                info!(url = %url, title = %document.title, "Cached document");
                Ok(document)
            },
            Err(e) => {
                warn!(url = %url, error = %e, kind = e.kind(), "Document fetch failed");
                if let Some(record) = write_known(&self.known).get_mut(url.as_str()) {
                    record.last_error = Some(e.clone());
                }
                Err(e)
            },
        }
    }

    /// The cached document, without fetching
    pub async fn cached(&self, url: &str) -> Option<Arc<Document>> {
        self.bodies.get(url).await
    }

    /// Best available title without triggering a fetch
    pub fn peek_title(&self, url: &CanonicalUrl) -> String {
        read_known(&self.known)
            .get(url.as_str())
            .and_then(|record| record.fetched_title.clone().or_else(|| record.title_hint.clone()))
            .unwrap_or_else(|| title_from_url(url))
    }

    /// All known URLs, fetched or not, in lexicographic order
    pub fn list_known_urls(&self) -> Vec<String> {
        read_known(&self.known).keys().cloned().collect()
    }

    /// Whether the URL is known (catalog or fetched)
    pub fn is_known(&self, url: &str) -> bool {
        read_known(&self.known).contains_key(url)
    }

    /// Whether the URL came from the catalog
    pub fn is_cataloged(&self, url: &str) -> bool {
        read_known(&self.known)
            .get(url)
            .is_some_and(|record| record.in_catalog)
    }

    /// Failure of the most recent fetch attempt, cleared by a success
    pub fn last_error(&self, url: &str) -> Option<ScriptoriumError> {
        read_known(&self.known)
            .get(url)
            .and_then(|record| record.last_error.clone())
    }

    /// Counts of known, fetched and failed documents
    pub fn stats(&self) -> CacheStats {
        let known = read_known(&self.known);
        CacheStats {
            known: known.len(),
            fetched: known.values().filter(|r| r.fetched_at.is_some()).count(),
            failed: known.values().filter(|r| r.last_error.is_some()).count(),
        }
    }
}

fn read_known(
    known: &RwLock<BTreeMap<String, KnownDocument>>,
) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, KnownDocument>> {
    known.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_known(
    known: &RwLock<BTreeMap<String, KnownDocument>>,
) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, KnownDocument>> {
    known.write().unwrap_or_else(PoisonError::into_inner)
}

/// Statistics about the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of known documents
    pub known: usize,

    /// Number of documents with a cached body
    pub fetched: usize,

    /// Number of documents whose last fetch failed
    pub failed: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache Stats: {} known, {} fetched, {} failed",
            self.known, self.fetched, self.failed
        )
    }
}
