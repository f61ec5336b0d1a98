//! Common types and data structures used throughout Scriptorium.
//!
//! This module contains the shared types including:
//! - The error taxonomy returned by the core operations
//! - Catalog entries, documents and search results
//! - Tool arguments and their JSON schemas

use crate::admission::{CanonicalUrl, Rejection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Scriptorium operations
pub type ScriptoriumResult<T> = Result<T, ScriptoriumError>;

/// Errors that can occur during Scriptorium operations.
///
/// The enum is `Clone` because a single fetch failure is handed to every
/// caller that was coalesced onto the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptoriumError {
    /// The URL did not pass the admission filter
    #[error("AdmissionRejected({0})")]
    AdmissionRejected(Rejection),

    /// Host unreachable, DNS failure, timeout or broken connection
    #[error("NetworkError({0})")]
    NetworkError(String),

    /// Remote answered with a non-2xx status
    #[error("HttpError({0})")]
    HttpError(u16),

    /// Remote content is neither HTML, Markdown nor plain text
    #[error("UnsupportedContentType({0})")]
    UnsupportedContentType(String),

    /// Remote content was empty after extraction
    #[error("EmptyBody")]
    EmptyBody,

    /// Remote content exceeded the configured size limit
    #[error("BodyTooLarge({0} bytes)")]
    BodyTooLarge(u64),

    /// URL is admitted but not part of the catalog
    #[error("NotFound({0})")]
    NotFound(String),

    /// Invalid arguments provided
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl ScriptoriumError {
    /// Short classification name, used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdmissionRejected(_) => "admission_rejected",
            Self::NetworkError(_) => "network_error",
            Self::HttpError(_) => "http_error",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::EmptyBody => "empty_body",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::NotFound(_) => "not_found",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ServerError(_) => "server_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }

    /// Whether retrying the same request may succeed without any remote change
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::HttpError(429))
    }
}

impl From<Rejection> for ScriptoriumError {
    fn from(rejection: Rejection) -> Self {
        Self::AdmissionRejected(rejection)
    }
}

impl From<reqwest::Error> for ScriptoriumError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpError(status.as_u16());
        }
        if err.is_timeout() {
            return Self::NetworkError("request timed out".to_string());
        }
        if err.is_connect() {
            return Self::NetworkError(format!("connection failed: {}", err));
        }
        Self::NetworkError(err.to_string())
    }
}

impl From<std::io::Error> for ScriptoriumError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScriptoriumError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

/// Source format of a document body, decides how its text is weighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// HTML page, converted to Markdown text on fetch
    Html,
    /// Markdown source served as-is
    Markdown,
    /// Anything textual without structure
    #[default]
    PlainText,
}

impl DocumentFormat {
    /// Whether the stored body carries Markdown structure (headings, emphasis)
    pub fn is_structured(&self) -> bool {
        matches!(self, DocumentFormat::Html | DocumentFormat::Markdown)
    }
}

/// A single reference from the curated catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Canonical document URL
    pub url: CanonicalUrl,

    /// Link text from the catalog, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_hint: Option<String>,
}

impl CatalogEntry {
    /// Create a catalog entry
    pub fn new(url: CanonicalUrl, title_hint: Option<String>) -> Self {
        let title_hint = title_hint
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self { url, title_hint }
    }
}

/// A known document. `body` is `None` until the document has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Canonical document URL
    pub url: CanonicalUrl,

    /// Best known title
    pub title: String,

    /// Extracted text, absent when not yet fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// When the body was fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,

    /// Format of the source the body came from
    pub format: DocumentFormat,
}

impl Document {
    /// Whether the body has been fetched
    pub fn is_fetched(&self) -> bool {
        self.body.is_some()
    }

    /// Word count of the body, zero when not fetched
    pub fn word_count(&self) -> usize {
        self.body
            .as_deref()
            .map(|b| b.split_whitespace().count())
            .unwrap_or(0)
    }
}

/// A single ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document URL
    pub url: String,

    /// Display title
    pub title: String,

    /// Relevance in [0, 1], higher is better
    pub score: f64,

    /// Query-relevant excerpt, or the title when the body is not cached
    pub snippet: String,
}

/// Outcome of the fetch operation: the document or a classified error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchResponse {
    /// Successfully fetched (or cached) document
    Document {
        /// Canonical document URL
        url: String,
        /// Document title
        title: String,
        /// Full document text
        content: String,
    },
    /// Classified failure
    Error {
        /// Human-readable classification, e.g. `HttpError(404)`
        error: String,
        /// URL as supplied by the caller
        url: String,
    },
}

impl FetchResponse {
    /// Build the error variant for a requested URL
    pub fn error(url: impl Into<String>, error: &ScriptoriumError) -> Self {
        FetchResponse::Error {
            error: error.to_string(),
            url: url.into(),
        }
    }

    /// Whether this is the error variant
    pub fn is_error(&self) -> bool {
        matches!(self, FetchResponse::Error { .. })
    }
}

impl From<&Document> for FetchResponse {
    fn from(doc: &Document) -> Self {
        FetchResponse::Document {
            url: doc.url.to_string(),
            title: doc.title.clone(),
            content: doc.body.clone().unwrap_or_default(),
        }
    }
}

fn default_k() -> i64 {
    5
}

/// Arguments for the search tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchArgs {
    /// The search query string
    pub query: String,

    /// Maximum number of results; zero or negative yields no results
    #[serde(default = "default_k")]
    pub k: i64,
}

/// Arguments for the fetch tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchArgs {
    /// Document URI (http or https)
    #[serde(alias = "url")]
    pub uri: String,
}

/// JSON Schema for search arguments (used for MCP tool definition)
pub fn search_args_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query string (e.g. \"getting started\", \"api reference\")"
            },
            "k": {
                "type": "integer",
                "description": "Maximum number of results to return",
                "default": 5
            }
        },
        "required": ["query"]
    })
}

/// JSON Schema for fetch arguments
pub fn fetch_args_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "uri": {
                "type": "string",
                "format": "uri",
                "description": "Document URI (http or https) found via search or provided directly"
            }
        },
        "required": ["uri"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionFilter;

    fn url(raw: &str) -> CanonicalUrl {
        AdmissionFilter::new(["example.com"]).admit(raw).unwrap()
    }

    #[test]
    fn test_error_display_is_classification() {
        assert_eq!(ScriptoriumError::HttpError(404).to_string(), "HttpError(404)");
        assert_eq!(ScriptoriumError::EmptyBody.to_string(), "EmptyBody");
        assert_eq!(
            ScriptoriumError::AdmissionRejected(Rejection::DomainNotAllowed(
                "evil.example".to_string()
            ))
            .to_string(),
            "AdmissionRejected(domain not allowed: evil.example)"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(ScriptoriumError::NetworkError("reset".into()).is_transient());
        assert!(ScriptoriumError::HttpError(429).is_transient());
        assert!(!ScriptoriumError::HttpError(404).is_transient());
        assert!(!ScriptoriumError::EmptyBody.is_transient());
    }

    #[test]
    fn test_catalog_entry_blank_hint_is_absent() {
        let entry = CatalogEntry::new(url("https://example.com/a"), Some("   ".to_string()));
        assert_eq!(entry.title_hint, None);

        let entry = CatalogEntry::new(url("https://example.com/a"), Some(" Guide ".to_string()));
        assert_eq!(entry.title_hint.as_deref(), Some("Guide"));
    }

    #[test]
    fn test_fetch_response_serialization() {
        let ok = FetchResponse::Document {
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            content: "body".to_string(),
        };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["title"], "A");
        assert!(value.get("error").is_none());

        let err = FetchResponse::error("https://evil.example/x", &ScriptoriumError::HttpError(404));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"], "HttpError(404)");
        assert_eq!(value["url"], "https://evil.example/x");
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_search_args_default_k() {
        let args: SearchArgs = serde_json::from_value(serde_json::json!({"query": "guide"})).unwrap();
        assert_eq!(args.k, 5);
    }

    #[test]
    fn test_fetch_args_accepts_url_alias() {
        let args: FetchArgs =
            serde_json::from_value(serde_json::json!({"url": "https://example.com/a"})).unwrap();
        assert_eq!(args.uri, "https://example.com/a");
    }

    #[test]
    fn test_schemas() {
        assert!(search_args_schema()["properties"]["query"].is_object());
        assert!(fetch_args_schema()["properties"]["uri"].is_object());
    }
}
