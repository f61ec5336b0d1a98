//! URL admission: the security boundary in front of every network access.
//!
//! A URL is admitted when it parses, uses `http` or `https`, and its host is
//! an allow-listed domain or a subdomain of one. Admission also produces the
//! canonical form used as the cache and index key, so two spellings of the
//! same location always land on the same document.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use url::{Host, Url};

/// Why a URL was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not parsable as an absolute URL
    #[error("malformed url: {0}")]
    Malformed(String),

    /// Scheme other than http/https
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// URL has no host component
    #[error("missing host")]
    MissingHost,

    /// Host is not covered by the allow-list
    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// A redirect pointed outside the allow-list
    #[error("redirect to non-admitted location: {0}")]
    RedirectBlocked(String),
}

/// An admitted URL in canonical form.
///
/// Only [`AdmissionFilter`] constructs these, so holding one is proof that the
/// location passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    /// The canonical string form
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The parsed URL
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Host name (lower-case, without port)
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Path component, always starting with `/`
    pub fn path(&self) -> &str {
        self.0.path()
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for CanonicalUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Validates and canonicalizes URLs against a read-only domain allow-list.
///
/// An empty allow-list admits nothing.
#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    domains: Vec<String>,
}

impl AdmissionFilter {
    /// Build a filter from allow-list entries.
    ///
    /// Entries may be bare domains (`example.com`), URL prefixes
    /// (`https://docs.example.com/`) or wildcards (`*.example.com`). Entries
    /// that do not yield a host are ignored.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = domains
            .into_iter()
            .filter_map(|d| normalize_domain(d.as_ref()))
            .collect();
        normalized.sort();
        normalized.dedup();
        Self {
            domains: normalized,
        }
    }

    /// Normalized allow-list hosts
    pub fn allowed_domains(&self) -> &[String] {
        &self.domains
    }

    /// Admit an absolute URL string
    pub fn admit(&self, raw: &str) -> Result<CanonicalUrl, Rejection> {
        let url = Url::parse(raw.trim()).map_err(|e| Rejection::Malformed(e.to_string()))?;
        self.admit_url(url)
    }

    /// Admit a possibly relative reference, resolved against `base`
    pub fn admit_relative(&self, base: &Url, reference: &str) -> Result<CanonicalUrl, Rejection> {
        let url = base
            .join(reference.trim())
            .map_err(|e| Rejection::Malformed(e.to_string()))?;
        self.admit_url(url)
    }

    /// Admit an already parsed URL
    pub fn admit_url(&self, mut url: Url) -> Result<CanonicalUrl, Rejection> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Rejection::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host() {
            None => return Err(Rejection::MissingHost),
            Some(Host::Domain(d)) if d.trim_end_matches('.').is_empty() => {
                return Err(Rejection::MissingHost);
            },
            Some(host) => host.to_owned(),
        };

        if !self.is_host_allowed(&host) {
            return Err(Rejection::DomainNotAllowed(host.to_string()));
        }

        if let Host::Domain(d) = &host
            && d.ends_with('.')
        {
            url.set_host(Some(d.trim_end_matches('.')))
                .map_err(|e| Rejection::Malformed(e.to_string()))?;
        }

        url.set_fragment(None);
        // Credentials never belong in a cache key.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(CanonicalUrl(url))
    }

    /// Whether a host is an allow-listed domain or one of its subdomains.
    /// IP-literal hosts only match an identical entry.
    pub fn is_host_allowed(&self, host: &Host<String>) -> bool {
        match host {
            Host::Domain(d) => {
                let d = d.trim_end_matches('.').to_ascii_lowercase();
                self.domains.iter().any(|allowed| {
                    d == *allowed
                        || d.strip_suffix(allowed.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.'))
                })
            },
            Host::Ipv4(ip) => {
                let ip = ip.to_string();
                self.domains.iter().any(|allowed| *allowed == ip)
            },
            Host::Ipv6(ip) => {
                let ip = format!("[{}]", ip);
                self.domains.iter().any(|allowed| *allowed == ip)
            },
        }
    }
}

/// Reduce an allow-list entry to a lower-case host
fn normalize_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let rest = raw.split_once("://").map(|(_, r)| r).unwrap_or(raw);
    let rest = rest.trim_start_matches("*.").trim_start_matches('.');
    if rest.is_empty() {
        return None;
    }

    let parsed = Url::parse(&format!("http://{}", rest)).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}
