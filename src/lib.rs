//! # Scriptorium - Documentation Search and Retrieval MCP Server
//!
//! Scriptorium serves a curated documentation catalog (for example an
//! `llms.txt`) to an agent through two operations: ranked `search` and
//! full-document `fetch`. It is designed to be used as both a library and as a
//! standalone CLI binary.
//!
//! ## Features
//!
//! - **Allow-listed fetching**: every URL, including redirect targets, must
//!   belong to a configured domain before any network access happens
//! - **Lazy loading**: catalog entries are searchable by title immediately;
//!   bodies are fetched on demand and cached
//! - **Coalesced fetches**: concurrent requests for one URL share one download
//! - **Markdown-aware ranking**: TF-IDF scoring with extra weight for headings
//!   and emphasis, maintained incrementally as documents arrive
//! - **Dual Transport**: Support for both STDIO and HTTP (SSE) transports
//!
//! ## Quick Start
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use scriptorium::{DocsEngine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = DocsEngine::new(EngineConfig {
//!         allowed_domains: vec!["docs.example.com".to_string()],
//!         catalog_sources: vec!["https://docs.example.com/llms.txt".to_string()],
//!         ..Default::default()
//!     })?;
//!     engine.load_catalog().await;
//!
//!     for result in engine.search("getting started", 5).await {
//!         println!("{:.3} {} {}", result.score, result.title, result.url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### As an MCP Server
//!
//! ```rust,no_run
//! use scriptorium::{ScriptoriumServer, ServerConfig, TransportType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ScriptoriumServer::new(ServerConfig::default())?;
//!     server.run(TransportType::Stdio).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`admission`]: URL validation, canonicalization and the domain allow-list
//! - [`fetcher`]: HTTP retrieval and HTML/Markdown/text extraction
//! - [`cache`]: document store with coalesced lazy population
//! - [`text`]: tokenizer, title derivation and snippets
//! - [`index`]: incremental TF-IDF relevance index
//! - [`catalog`]: catalog parsing and loading
//! - [`engine`]: the `search` and `fetch` operations
//! - [`server`]: MCP server implementation with transport handling
//! - [`types`]: common types, errors and tool schemas

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod admission;
pub mod cache;
pub mod catalog;
pub mod engine;
pub mod fetcher;
pub mod index;
pub mod server;
pub mod text;
pub mod types;

// Re-export commonly used items at crate root
pub use admission::{AdmissionFilter, CanonicalUrl, Rejection};
pub use cache::{CacheConfig, CacheStats, DocumentCache};
pub use engine::{DocsEngine, EngineConfig};
pub use fetcher::{ContentFetch, FetchConfig, FetchedContent, HttpFetcher};
pub use index::{MarkdownWeighting, RelevanceIndex, TermWeighting, UniformWeighting};
pub use server::{ScriptoriumServer, ServerConfig, TransportType};
pub use types::{
    CatalogEntry, Document, DocumentFormat, FetchArgs, FetchResponse, ScriptoriumError,
    ScriptoriumResult, SearchArgs, SearchResult,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name for MCP protocol
pub const SERVER_NAME: &str = "scriptorium";

/// Server description
pub const SERVER_DESCRIPTION: &str = "Documentation search and retrieval MCP server";
