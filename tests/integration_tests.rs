//! Integration tests for Scriptorium
//!
//! These run the engine against a local mock server, so no external network
//! access is needed.

use scriptorium::{DocsEngine, EngineConfig, FetchResponse};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine_config(catalog_sources: Vec<String>) -> EngineConfig {
    EngineConfig {
        allowed_domains: vec!["127.0.0.1".to_string()],
        catalog_sources,
        ..Default::default()
    }
}

fn engine(catalog_sources: Vec<String>) -> DocsEngine {
    DocsEngine::new(engine_config(catalog_sources)).unwrap()
}

/// Write a catalog file linking `links` (title, path) on the mock server
fn catalog_file(server: &MockServer, links: &[(&str, &str)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# Widget Docs\n").unwrap();
    for (title, link_path) in links {
        writeln!(file, "- [{}]({}{}): notes", title, server.uri(), link_path).unwrap();
    }
    file
}

fn source(file: &tempfile::NamedTempFile) -> String {
    file.path().to_string_lossy().to_string()
}

fn html_page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><nav>Home | Blog</nav><main>{}</main></body></html>",
        title, body
    )
}

mod fetch_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_html_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/setup"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                html_page("Widget Setup", "<h1>Widget setup</h1><p>Install the widget first.</p>"),
                "text/html; charset=utf-8",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(Vec::new());
        let url = format!("{}/setup", server.uri());

        match engine.fetch(&url).await {
            FetchResponse::Document {
                url: fetched_url,
                title,
                content,
            } => {
                assert_eq!(fetched_url, url);
                assert_eq!(title, "Widget Setup");
                assert!(content.contains("Install the widget first."));
                assert!(!content.contains("Home | Blog"));
            },
            other => panic!("expected a document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("# Guide\n\nWidgets explained.", "text/markdown"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(Vec::new());
        let url = format!("{}/guide.md", server.uri());

        let first = engine.fetch(&url).await;
        let second = engine.fetch(&url).await;
        assert!(!first.is_error());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("# Slow\n\nEventually consistent widgets.", "text/markdown")
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = Arc::new(engine(Vec::new()));
        let url = format!("{}/slow.md", server.uri());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let url = url.clone();
                tokio::spawn(async move { engine.fetch(&url).await })
            })
            .collect();

        let responses = futures::future::join_all(tasks).await;
        for response in responses {
            let response = response.unwrap();
            assert!(!response.is_error(), "unexpected {:?}", response);
        }
    }

    #[tokio::test]
    async fn test_non_admitted_url_is_never_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let engine = engine(Vec::new());
        let response = engine.fetch("https://evil.example/steal").await;

        match response {
            FetchResponse::Error { error, url } => {
                assert!(error.starts_with("AdmissionRejected"), "got {}", error);
                assert_eq!(url, "https://evil.example/steal");
            },
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(engine.cache().list_known_urls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_on_next_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("# Recovered\n\nThe gizmo is back.", "text/markdown"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let file = catalog_file(&server, &[("Flaky", "/flaky")]);
        let engine = engine(vec![source(&file)]);
        engine.load_catalog().await;
        let url = format!("{}/flaky", server.uri());

        match engine.fetch(&url).await {
            FetchResponse::Error { error, .. } => assert_eq!(error, "HttpError(404)"),
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(engine.search("gizmo", 5).await.is_empty());

        assert!(!engine.fetch(&url).await.is_error());
        let results = engine.search("gizmo", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, url);
        assert!(results[0].snippet.contains("gizmo"));
    }

    #[tokio::test]
    async fn test_catalog_only_mode_refuses_uncataloged_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("anything"))
            .expect(0)
            .mount(&server)
            .await;

        let file = catalog_file(&server, &[("Listed", "/listed")]);
        let engine = DocsEngine::new(EngineConfig {
            allow_uncataloged: false,
            ..engine_config(vec![source(&file)])
        })
        .unwrap();
        engine.load_catalog().await;

        let url = format!("{}/unlisted", server.uri());
        match engine.fetch(&url).await {
            FetchResponse::Error { error, .. } => assert!(error.starts_with("NotFound")),
            other => panic!("expected an error, got {:?}", other),
        }
    }
}

mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_titles_are_searchable_without_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let file = catalog_file(&server, &[("Guide A", "/a"), ("Guide B", "/b")]);
        let engine = engine(vec![source(&file)]);
        let load = engine.load_catalog().await;
        assert_eq!(load.entries.len(), 2);

        let results = engine.search("guide", 5).await;
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.snippet, result.title);
            assert!(result.score > 0.0 && result.score <= 1.0);
        }
        // Equal scores fall back to URL order
        assert_eq!(results[0].title, "Guide A");
        assert_eq!(results[1].title, "Guide B");
    }

    #[tokio::test]
    async fn test_fetched_body_outranks_title_only_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/setup.md"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "# Widget setup\n\nInstall the widget, then configure the widget daemon.",
                "text/markdown",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let file = catalog_file(
            &server,
            &[("Setup", "/setup.md"), ("Widget overview", "/overview.md"), ("Reference", "/ref.md")],
        );
        let engine = engine(vec![source(&file)]);
        engine.load_catalog().await;

        assert!(!engine.fetch(&format!("{}/setup.md", server.uri())).await.is_error());

        let results = engine.search("widget", 5).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, format!("{}/setup.md", server.uri()));
        assert_eq!(results[0].title, "Widget setup");
        assert!(results[0].snippet.to_lowercase().contains("widget"));
        assert_eq!(results[1].snippet, "Widget overview");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_search_limits() {
        let server = MockServer::start().await;
        let file = catalog_file(
            &server,
            &[("Guide A", "/a"), ("Guide B", "/b"), ("Guide C", "/c")],
        );
        let engine = engine(vec![source(&file)]);
        engine.load_catalog().await;

        assert_eq!(engine.search("guide", 2).await.len(), 2);
        assert!(engine.search("guide", 0).await.is_empty());
        assert!(engine.search("guide", -3).await.is_empty());
        assert!(engine.search("   ", 5).await.is_empty());
        assert!(engine.search("nonexistent", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_hydrated_search_fetches_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide.md"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "# Guide\n\nRotations are stored as quaternions in this guide.",
                "text/markdown",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let file = catalog_file(&server, &[("Guide", "/guide.md")]);
        let engine = DocsEngine::new(EngineConfig {
            hydrate_results: true,
            ..engine_config(vec![source(&file)])
        })
        .unwrap();
        engine.load_catalog().await;

        let results = engine.search("guide", 5).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].snippet.contains("quaternions"));

        // Hydrated bodies stay cached
        let results = engine.search("quaternions", 5).await;
        assert_eq!(results.len(), 1);
    }
}

mod catalog_tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_catalog_with_relative_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/llms.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "# Docs\n\n- [Install](install.md)\n- [Install again](install.md)\n- [Offsite](https://evil.example/x)\n",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(vec![format!("{}/docs/llms.txt", server.uri())]);
        let load = engine.load_catalog().await;

        assert!(load.failures.is_empty());
        assert_eq!(load.entries.len(), 1);

        let install = format!("{}/docs/install.md", server.uri());
        assert_eq!(engine.cache().list_known_urls(), vec![install.clone()]);
        assert!(engine.cache().is_cataloged(&install));

        let results = engine.search("install", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Install");
    }

    #[tokio::test]
    async fn test_missing_catalog_source_is_reported() {
        let server = MockServer::start().await;
        let file = catalog_file(&server, &[("Guide", "/guide")]);
        let engine = engine(vec![
            "/nonexistent/llms.txt".to_string(),
            source(&file),
            format!("{}/missing.txt", server.uri()),
        ]);

        let load = engine.load_catalog().await;
        assert_eq!(load.entries.len(), 1);
        assert_eq!(load.failures.len(), 2);
        assert_eq!(engine.stats().known, 1);
    }
}
