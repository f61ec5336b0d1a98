//! Catalog loading.
//!
//! A catalog is a Markdown document (for example an `llms.txt`) whose links
//! `[Title](URL)` name the documents to serve. Sources are local files or
//! admitted URLs; every link passes the admission filter before it becomes a
//! [`CatalogEntry`].

use crate::admission::AdmissionFilter;
use crate::fetcher::ContentFetch;
use crate::types::{CatalogEntry, ScriptoriumError, ScriptoriumResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

lazy_static! {
    // [text](target) or [text](target "title"), optionally prefixed by `!` for images
    static ref LINK_REGEX: Regex =
        Regex::new(r#"(!?)\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).unwrap();
}

/// A raw link found in catalog text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLink {
    /// Link text
    pub text: String,
    /// Link target as written
    pub href: String,
}

/// Extract Markdown links in document order. Images and in-page anchors are skipped.
pub fn parse_catalog(text: &str) -> Vec<CatalogLink> {
    LINK_REGEX
        .captures_iter(text)
        .filter(|c| c[1].is_empty() && !c[3].starts_with('#'))
        .map(|c| CatalogLink {
            text: c[2].split_whitespace().collect::<Vec<_>>().join(" "),
            href: c[3].to_string(),
        })
        .collect()
}

/// Result of loading all catalog sources
#[derive(Debug, Default)]
pub struct CatalogLoad {
    /// Admitted, de-duplicated entries in source order
    pub entries: Vec<CatalogEntry>,
    /// Sources that could not be read
    pub failures: Vec<(String, ScriptoriumError)>,
}

/// Reads catalog sources into entries
pub struct CatalogLoader {
    filter: Arc<AdmissionFilter>,
    fetcher: Arc<dyn ContentFetch>,
}

impl CatalogLoader {
    /// Create a loader; remote sources are retrieved with `fetcher`
    pub fn new(filter: Arc<AdmissionFilter>, fetcher: Arc<dyn ContentFetch>) -> Self {
        Self { filter, fetcher }
    }

    /// Load every source. A failing source is reported and the rest still load.
    #[instrument(skip(self))]
    pub async fn load(&self, sources: &[String]) -> CatalogLoad {
        let mut load = CatalogLoad::default();
        let mut seen = HashSet::new();

        for source in sources {
            match self.read_source(source).await {
                Ok((text, base)) => {
                    let entries = self.entries_from_text(&text, base.as_ref(), &mut seen);
                    info!(source = %source, entries = entries.len(), "Loaded catalog source");
                    load.entries.extend(entries);
                },
                Err(e) => {
                    warn!(source = %source, error = %e, "Failed to load catalog source");
                    load.failures.push((source.clone(), e));
                },
            }
        }

        load
    }

    /// Source text and the base URL relative links resolve against
    async fn read_source(&self, source: &str) -> ScriptoriumResult<(String, Option<Url>)> {
        if source.contains("://") {
            let url = self.filter.admit(source)?;
            let content = self.fetcher.fetch(&url).await?;
            Ok((content.body, Some(url.as_url().clone())))
        } else {
            let text = tokio::fs::read_to_string(source).await?;
            Ok((text, None))
        }
    }

    /// Admit the links of one source. URLs already in `seen` are skipped, so
    /// the first title for a URL wins.
    pub fn entries_from_text(
        &self,
        text: &str,
        base: Option<&Url>,
        seen: &mut HashSet<String>,
    ) -> Vec<CatalogEntry> {
        let mut entries = Vec::new();

        for link in parse_catalog(text) {
            let admitted = match base {
                Some(base) => self.filter.admit_relative(base, &link.href),
                None => self.filter.admit(&link.href),
            };

            let url = match admitted {
                Ok(url) => url,
                Err(rejection) => {
                    warn!(href = %link.href, reason = %rejection, "Skipping catalog link");
                    continue;
                },
            };

            if !seen.insert(url.to_string()) {
                warn!(url = %url, "Skipping duplicate catalog link");
                continue;
            }

            entries.push(CatalogEntry::new(url, Some(link.text)));
        }

        entries
    }
}
