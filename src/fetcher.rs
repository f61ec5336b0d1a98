//! Document retrieval and content extraction.
//!
//! The fetcher turns an admitted URL into normalized text plus a title.
//! HTML pages are reduced to their main content region and converted to
//! Markdown; Markdown and plain text are served as-is.

use crate::admission::{AdmissionFilter, CanonicalUrl, Rejection};
use crate::text::{normalize_title, title_from_url};
use crate::types::{DocumentFormat, ScriptoriumError, ScriptoriumResult};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Default user agent for requests
const USER_AGENT: &str = concat!("scriptorium/", env!("CARGO_PKG_VERSION"));

/// Maximum redirect hops followed for a single fetch
pub const MAX_REDIRECTS: usize = 10;

lazy_static! {
    // Content selectors in order of preference
    static ref CONTENT_SELECTORS: Vec<Selector> = vec![
        Selector::parse("main").unwrap(),
        Selector::parse("article").unwrap(),
        Selector::parse("[role='main']").unwrap(),
        Selector::parse("#content").unwrap(),
        Selector::parse(".content").unwrap(),
        Selector::parse(".markdown-body").unwrap(),
        Selector::parse(".main").unwrap(),
        Selector::parse(".documentation").unwrap(),
        Selector::parse(".post-content").unwrap(),
    ];

    static ref BODY_SELECTOR: Selector = Selector::parse("body").unwrap();
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref H1_SELECTOR: Selector = Selector::parse("h1").unwrap();

    // Page chrome removed before the content region is selected
    static ref CHROME_PATTERNS: Vec<Regex> = ["script", "style", "noscript", "template", "nav", "footer", "aside"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .chain(std::iter::once(Regex::new(r"(?s)<!--.*?-->").unwrap()))
        .collect();

    // First level-1 ATX heading of a Markdown document
    static ref MARKDOWN_TITLE_REGEX: Regex = Regex::new(r"(?m)^ {0,3}#[ \t]+(.+?)[ \t#]*$").unwrap();
}

/// Settings for network retrieval
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Largest accepted body in bytes
    pub max_content_size: u64,
    /// Total time spent retrying transient failures
    pub retry_window: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_content_size: 10 * 1024 * 1024,
            retry_window: Duration::from_secs(10),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Extracted content of one document
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    /// Admitted URL that was fetched
    pub url: CanonicalUrl,
    /// Extracted or derived title
    pub title: String,
    /// Normalized text
    pub body: String,
    /// Source format of the body
    pub format: DocumentFormat,
}

/// Retrieves document content for admitted URLs
#[async_trait]
pub trait ContentFetch: Send + Sync {
    /// Fetch and extract one document
    async fn fetch(&self, url: &CanonicalUrl) -> ScriptoriumResult<FetchedContent>;
}

/// HTTP implementation of [`ContentFetch`]
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    filter: Arc<AdmissionFilter>,
    config: FetchConfig,
}

struct RawResponse {
    content_type: Option<String>,
    body: String,
}

impl HttpFetcher {
    /// Create a fetcher that only talks to hosts admitted by `filter`
    pub fn new(filter: Arc<AdmissionFilter>, config: FetchConfig) -> ScriptoriumResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .redirect(redirect_policy(filter.clone()))
            .build()
            .map_err(|e| ScriptoriumError::ServerError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            filter,
            config,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch raw content, retrying transient failures within the retry window
    async fn fetch_with_retry(&self, url: &CanonicalUrl) -> ScriptoriumResult<RawResponse> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.retry_window),
            ..Default::default()
        };

        retry(backoff, move || async move {
            self.fetch_once(url).await.map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, url = %url, "Fetch failed, retrying...");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn fetch_once(&self, url: &CanonicalUrl) -> ScriptoriumResult<RawResponse> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %url, "Fetch returned non-success status");
            return Err(ScriptoriumError::HttpError(status.as_u16()));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.config.max_content_size
        {
            return Err(ScriptoriumError::BodyTooLarge(content_length));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = self.read_body(response).await?;
        Ok(RawResponse { content_type, body })
    }

    /// Read the body in chunks, giving up as soon as the size limit is passed
    async fn read_body(&self, mut response: Response) -> ScriptoriumResult<String> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(ScriptoriumError::from)? {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > self.config.max_content_size {
                return Err(ScriptoriumError::BodyTooLarge(size));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl ContentFetch for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &CanonicalUrl) -> ScriptoriumResult<FetchedContent> {
        let url = self.filter.admit(url.as_str()).map_err(|rejection| {
            error!(url = %url, reason = %rejection, "Non-admitted URL reached the fetcher");
            ScriptoriumError::AdmissionRejected(rejection)
        })?;

        info!(url = %url, "Fetching document");
        let raw = self.fetch_with_retry(&url).await?;
        let content = extract(url, raw)?;

        info!(
            url = %content.url,
            title = %content.title,
            format = ?content.format,
            word_count = content.body.split_whitespace().count(),
            "Document fetched successfully"
        );
        Ok(content)
    }
}

/// Follow at most [`MAX_REDIRECTS`] hops, each of which must be admitted
fn redirect_policy(filter: Arc<AdmissionFilter>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (more than {})", MAX_REDIRECTS));
        }
        match filter.admit_url(attempt.url().clone()) {
            Ok(_) => attempt.follow(),
            Err(rejection) => {
                let target = attempt.url().to_string();
                warn!(target = %target, reason = %rejection, "Refusing redirect");
                attempt.error(Rejection::RedirectBlocked(target))
            },
        }
    })
}

/// Map a request error, recovering admission failures raised by the redirect policy
fn classify_request_error(err: reqwest::Error) -> ScriptoriumError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(rejection) = cause.downcast_ref::<Rejection>() {
            return ScriptoriumError::AdmissionRejected(rejection.clone());
        }
        source = cause.source();
    }
    ScriptoriumError::from(err)
}

/// Decide the document format from the content type, falling back to the path
fn classify(content_type: Option<&str>, url: &CanonicalUrl) -> ScriptoriumResult<DocumentFormat> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let path = url.path().to_ascii_lowercase();
    let markdown_path = [".md", ".markdown", ".mdx"]
        .iter()
        .any(|ext| path.ends_with(ext));

    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Ok(DocumentFormat::Html),
        "text/markdown" | "text/x-markdown" => Ok(DocumentFormat::Markdown),
        "text/plain" if markdown_path => Ok(DocumentFormat::Markdown),
        "text/plain" => Ok(DocumentFormat::PlainText),
        "" | "application/octet-stream" if markdown_path => Ok(DocumentFormat::Markdown),
        "" if path.ends_with(".html") || path.ends_with(".htm") => Ok(DocumentFormat::Html),
        "" => Ok(DocumentFormat::PlainText),
        other => Err(ScriptoriumError::UnsupportedContentType(other.to_string())),
    }
}

fn extract(url: CanonicalUrl, raw: RawResponse) -> ScriptoriumResult<FetchedContent> {
    let format = classify(raw.content_type.as_deref(), &url)?;
    debug!(url = %url, format = ?format, "Extracting content");

    let (title, body) = match format {
        DocumentFormat::Html => extract_html(&raw.body, &url),
        DocumentFormat::Markdown => {
            let candidate = markdown_title(&raw.body).unwrap_or_default();
            (normalize_title(&candidate, &url), raw.body.trim().to_string())
        },
        DocumentFormat::PlainText => (title_from_url(&url), raw.body.trim().to_string()),
    };

    if body.trim().is_empty() {
        return Err(ScriptoriumError::EmptyBody);
    }

    Ok(FetchedContent {
        url,
        title,
        body,
        format,
    })
}

/// Title and Markdown body of an HTML page
fn extract_html(html: &str, url: &CanonicalUrl) -> (String, String) {
    let stripped = strip_chrome(html);
    let document = Html::parse_document(&stripped);

    let candidate = first_text(&document, &TITLE_SELECTOR)
        .or_else(|| first_text(&document, &H1_SELECTOR))
        .unwrap_or_default();

    let content_html = CONTENT_SELECTORS
        .iter()
        .find_map(|selector| document.select(selector).next())
        .or_else(|| document.select(&BODY_SELECTOR).next())
        .map(|el| el.html())
        .unwrap_or(stripped);

    let markdown = clean_markdown(&html_to_markdown(&content_html));
    if markdown.split_whitespace().count() < 10 {
        warn!(url = %url, "Extracted content is very short");
    }

    (normalize_title(&candidate, url), markdown)
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.trim().is_empty())
}

/// Remove scripts, styles, navigation and other chrome
fn strip_chrome(html: &str) -> String {
    CHROME_PATTERNS
        .iter()
        .fold(html.to_string(), |acc, pattern| pattern.replace_all(&acc, "").into_owned())
}

/// Text of the first level-1 ATX heading
fn markdown_title(markdown: &str) -> Option<String> {
    MARKDOWN_TITLE_REGEX
        .captures(markdown)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Convert HTML to Markdown
fn html_to_markdown(html: &str) -> String {
    html2md::parse_html(html)
}

/// Clean up Markdown content
fn clean_markdown(markdown: &str) -> String {
    let mut result = String::new();
    let mut prev_blank = false;

    for line in markdown.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if !prev_blank {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            // Skip lines that are just list markers
            if trimmed == "-" || trimmed == "*" || trimmed == "+" {
                continue;
            }

            result.push_str(trimmed);
            result.push('\n');
            prev_blank = false;
        }
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_filter() -> Arc<AdmissionFilter> {
        Arc::new(AdmissionFilter::new(["127.0.0.1"]))
    }

    fn fetcher(config: FetchConfig) -> HttpFetcher {
        HttpFetcher::new(local_filter(), config).unwrap()
    }

    fn quick_config() -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(5),
            retry_window: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn admit(server: &MockServer, route: &str) -> CanonicalUrl {
        local_filter()
            .admit(&format!("{}{}", server.uri(), route))
            .unwrap()
    }

    #[test]
    fn test_classify() {
        let filter = AdmissionFilter::new(["example.com"]);
        let page = filter.admit("https://example.com/guide").unwrap();
        let md = filter.admit("https://example.com/guide.md").unwrap();

        assert_eq!(classify(Some("text/html; charset=utf-8"), &page), Ok(DocumentFormat::Html));
        assert_eq!(classify(Some("text/markdown"), &page), Ok(DocumentFormat::Markdown));
        assert_eq!(classify(Some("text/plain"), &md), Ok(DocumentFormat::Markdown));
        assert_eq!(classify(Some("text/plain"), &page), Ok(DocumentFormat::PlainText));
        assert_eq!(classify(None, &md), Ok(DocumentFormat::Markdown));
        assert_eq!(
            classify(Some("image/png"), &page),
            Err(ScriptoriumError::UnsupportedContentType("image/png".to_string()))
        );
    }

    #[test]
    fn test_clean_markdown() {
        let input = "# Title\n\n\n\nParagraph\n\n-\n\n\n\nAnother paragraph";
        let expected = "# Title\n\nParagraph\n\nAnother paragraph";
        assert_eq!(clean_markdown(input), expected);
    }

    #[test]
    fn test_strip_chrome() {
        let html = "<body><nav class=\"top\">Menu</nav><!-- note --><p>Text</p><SCRIPT>evil()</SCRIPT><footer>Legal</footer></body>";
        let stripped = strip_chrome(html);
        assert_eq!(stripped, "<body><p>Text</p></body>");
    }

    #[test]
    fn test_markdown_title() {
        assert_eq!(
            markdown_title("Intro\n\n# Widget Guide ##\n\n## Install").as_deref(),
            Some("Widget Guide")
        );
        assert_eq!(markdown_title("## Only level two"), None);
    }

    #[tokio::test]
    async fn test_fetch_html_extracts_main_content() {
        let server = MockServer::start().await;
        let html = r#"<html><head><title>Widget Guide | Example Docs</title><style>p { color: red }</style></head>
            <body><nav>Home Products Pricing</nav>
            <main><h1>Widgets</h1><p>Widgets are configured per project and deployed with care.</p></main>
            <footer>Copyright</footer><script>track()</script></body></html>"#;
        Mock::given(method("GET"))
            .and(path("/guide"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .expect(1)
            .mount(&server)
            .await;

        let content = fetcher(quick_config()).fetch(&admit(&server, "/guide")).await.unwrap();
        assert_eq!(content.title, "Widget Guide");
        assert_eq!(content.format, DocumentFormat::Html);
        assert!(content.body.contains("Widgets are configured per project"));
        assert!(!content.body.contains("Pricing"));
        assert!(!content.body.contains("Copyright"));
        assert!(!content.body.contains("track()"));
    }

    #[tokio::test]
    async fn test_fetch_html_title_falls_back_to_h1() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><h1>Install Steps</h1><p>Run it.</p></body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let content = fetcher(quick_config()).fetch(&admit(&server, "/page")).await.unwrap();
        assert_eq!(content.title, "Install Steps");
    }

    #[tokio::test]
    async fn test_fetch_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/setup.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Setup\n\nInstall the **widget**.\n"))
            .mount(&server)
            .await;

        let content = fetcher(quick_config())
            .fetch(&admit(&server, "/docs/setup.md"))
            .await
            .unwrap();
        assert_eq!(content.format, DocumentFormat::Markdown);
        assert_eq!(content.title, "Setup");
        assert_eq!(content.body, "# Setup\n\nInstall the **widget**.");
    }

    #[tokio::test]
    async fn test_fetch_plain_text_uses_url_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes/release-notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Version 2 adds widgets."))
            .mount(&server)
            .await;

        let content = fetcher(quick_config())
            .fetch(&admit(&server, "/notes/release-notes.txt"))
            .await
            .unwrap();
        assert_eq!(content.format, DocumentFormat::PlainText);
        assert_eq!(content.title, "Release Notes");
    }

    #[tokio::test]
    async fn test_fetch_classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/image"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blank"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n "))
            .mount(&server)
            .await;

        let f = fetcher(quick_config());
        assert_eq!(
            f.fetch(&admit(&server, "/missing")).await,
            Err(ScriptoriumError::HttpError(404))
        );
        assert_eq!(
            f.fetch(&admit(&server, "/image")).await,
            Err(ScriptoriumError::UnsupportedContentType("image/png".to_string()))
        );
        assert_eq!(f.fetch(&admit(&server, "/blank")).await, Err(ScriptoriumError::EmptyBody));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let f = fetcher(FetchConfig {
            max_content_size: 16,
            ..quick_config()
        });
        let result = f.fetch(&admit(&server, "/big")).await;
        assert!(matches!(result, Err(ScriptoriumError::BodyTooLarge(_))), "{:?}", result);
    }

    #[tokio::test]
    async fn test_fetch_refuses_non_admitted_url() {
        let url = AdmissionFilter::new(["example.com"])
            .admit("https://example.com/x")
            .unwrap();
        let result = fetcher(quick_config()).fetch(&url).await;
        assert_eq!(
            result,
            Err(ScriptoriumError::AdmissionRejected(Rejection::DomainNotAllowed(
                "example.com".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_redirect_within_allow_list_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Moved content."))
            .expect(1)
            .mount(&server)
            .await;

        let content = fetcher(quick_config()).fetch(&admit(&server, "/old")).await.unwrap();
        assert_eq!(content.body, "Moved content.");
    }

    #[tokio::test]
    async fn test_redirect_leaving_allow_list_is_blocked() {
        let server = MockServer::start().await;
        let outside = format!("http://localhost:{}/landing", server.address().port());
        Mock::given(method("GET"))
            .and(path("/jump"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", outside.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("should not be reached"))
            .expect(0)
            .mount(&server)
            .await;

        let result = fetcher(quick_config()).fetch(&admit(&server, "/jump")).await;
        assert!(
            matches!(
                result,
                Err(ScriptoriumError::AdmissionRejected(Rejection::RedirectBlocked(_)))
            ),
            "{:?}",
            result
        );
    }
}
