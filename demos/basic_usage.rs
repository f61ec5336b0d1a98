//! Basic usage example for Scriptorium
//!
//! Run with: cargo run --example basic_usage

use scriptorium::{DocsEngine, EngineConfig, FetchResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("📚 Scriptorium Basic Usage Example\n");

    let engine = DocsEngine::new(EngineConfig {
        allowed_domains: vec!["docs.anthropic.com".to_string()],
        catalog_sources: vec!["https://docs.anthropic.com/llms.txt".to_string()],
        ..Default::default()
    })?;

    // Example 1: Load the catalog
    println!("=== Example 1: Load the Catalog ===\n");

    let load = engine.load_catalog().await;
    println!("Loaded {} catalog entries", load.entries.len());
    for (source, error) in &load.failures {
        eprintln!("Could not load {}: {}", source, error);
    }

    // Example 2: Search catalog titles (no fetching yet)
    println!("\n=== Example 2: Search Titles ===\n");

    let results = engine.search("tool use", 5).await;
    for (i, result) in results.iter().enumerate() {
        println!("{}. {} ({:.3})", i + 1, result.title, result.score);
        println!("   URL: {}\n", result.url);
    }

    // Example 3: Fetch the top hit
    println!("\n=== Example 3: Fetch a Document ===\n");

    if let Some(top) = results.first() {
        match engine.fetch(&top.url).await {
            FetchResponse::Document { title, content, .. } => {
                println!("Title: {}", title);
                println!("Words: {}", content.split_whitespace().count());
                let preview: String = content.chars().take(300).collect();
                println!("\nPreview:\n{}...", preview);
            },
            FetchResponse::Error { error, url } => {
                eprintln!("Fetch of {} failed: {}", url, error);
            },
        }
    }

    // Example 4: Search again, now ranked with the fetched body
    println!("\n=== Example 4: Search After Fetching ===\n");

    for result in engine.search("tool use", 3).await {
        println!("{:.3} {}", result.score, result.title);
        println!("   {}\n", result.snippet);
    }

    // Example 5: Disallowed domains are rejected before any request
    println!("\n=== Example 5: Admission ===\n");

    if let FetchResponse::Error { error, .. } = engine.fetch("https://example.com/").await {
        println!("Rejected as expected: {}", error);
    }

    println!("\nCache: {}", engine.stats());

    println!("\n✅ Examples completed!");

    Ok(())
}
