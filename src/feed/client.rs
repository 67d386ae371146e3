use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::util::clean_text;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while resolving a URL.
///
/// The ingest pipeline never propagates these: a failed fetch is simply a
/// `NotFeed` outcome. They exist for logging and for the manifest fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Binary classification of a fetched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// The body parsed as RSS, Atom or JSON Feed
    Feed,
    /// Anything else (HTML page, image, unparseable XML, ...)
    NotFeed,
}

/// The result of resolving one URL: final location, status, classification
/// and whatever metadata the body carried.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchHandle {
    url: String,
    status_code: u16,
    kind: PageKind,
    title: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    language: Option<String>,
    author: Option<String>,
    feed_links: Vec<String>,
}

impl FetchHandle {
    /// A handle for a resource classified as a feed.
    pub fn feed(url: impl Into<String>, status_code: u16) -> Self {
        Self::with_kind(url, status_code, PageKind::Feed)
    }

    /// A handle for a resource that is not a feed.
    pub fn page(url: impl Into<String>, status_code: u16) -> Self {
        Self::with_kind(url, status_code, PageKind::NotFeed)
    }

    fn with_kind(url: impl Into<String>, status_code: u16, kind: PageKind) -> Self {
        Self {
            url: url.into(),
            status_code,
            kind,
            title: None,
            description: None,
            thumbnail: None,
            language: None,
            author: None,
            feed_links: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Feed URLs advertised by this page, in document order.
    pub fn with_feed_links(mut self, links: Vec<String>) -> Self {
        self.feed_links = links;
        self
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn classify(&self) -> PageKind {
        self.kind
    }

    /// Feed URLs discovered on the page; empty for feeds and for pages
    /// without alternate links.
    pub fn discover_feeds(&self) -> &[String] {
        &self.feed_links
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }
}

/// Resolves URLs into classified [`FetchHandle`]s.
///
/// The ingest pipeline only depends on this trait, so tests can substitute
/// scripted clients for the network.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch `url` and classify the response.
    ///
    /// Implementations must give up after `timeout` and report
    /// [`FetchError::Timeout`].
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<FetchHandle, FetchError>;
}

/// [`FeedClient`] backed by `reqwest`.
///
/// - Retries 429 and 5xx responses with exponential backoff
/// - Limits bodies to 10MB
/// - Classifies by Content-Type: XML types are parsed as feeds, HTML is
///   scanned for `<link rel="alternate">` feed links, anything else tries
///   the feed parser first
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFeedClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Build a client with the given User-Agent and redirect handling.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::new(client))
    }

    /// Number of retries for 429/5xx responses (0 disables retrying).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Base delay of the exponential backoff (delay doubles per retry).
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The underlying HTTP client, shared with the manifest fetcher.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Delay before retry number `retry_count` (zero-based). Saturates for
    /// large retry budgets.
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry_count))
    }

    async fn fetch(&self, url: &str) -> Result<FetchHandle, FetchError> {
        let mut retry_count = 0;

        let response = loop {
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error()
            {
                if retry_count >= self.max_retries {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(self.max_retries)
                    });
                }

                let delay = self.backoff_delay(retry_count);
                tracing::debug!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            break response;
        };

        let final_url = response.url().to_string();
        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let bytes = read_limited_bytes(response, MAX_BODY_SIZE).await?;
        Ok(classify_body(&final_url, status_code, &content_type, &bytes))
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<FetchHandle, FetchError> {
        tokio::time::timeout(timeout, self.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

/// Decide what a response body is.
fn classify_body(url: &str, status_code: u16, content_type: &str, bytes: &[u8]) -> FetchHandle {
    let is_xml = content_type.contains("application/rss+xml")
        || content_type.contains("application/atom+xml")
        || content_type.contains("application/feed+json")
        || content_type.contains("application/xml")
        || content_type.contains("text/xml");

    let is_html = content_type.contains("text/html") || content_type.contains("application/xhtml");

    if is_xml {
        return parse_feed_handle(url, status_code, bytes)
            .unwrap_or_else(|| FetchHandle::page(url, status_code));
    }

    if is_html {
        return html_handle(url, status_code, bytes);
    }

    // Ambiguous or missing Content-Type: try feed first, fallback to HTML scan
    parse_feed_handle(url, status_code, bytes).unwrap_or_else(|| html_handle(url, status_code, bytes))
}

/// Parse `bytes` as a feed and copy its channel metadata into a handle.
fn parse_feed_handle(url: &str, status_code: u16, bytes: &[u8]) -> Option<FetchHandle> {
    let feed = feed_rs::parser::parse(bytes).ok()?;

    let mut handle = FetchHandle::feed(url, status_code);
    handle.title = feed.title.and_then(|t| clean_text(&t.content));
    handle.description = feed.description.and_then(|d| clean_text(&d.content));
    handle.language = feed.language.and_then(|l| clean_text(&l));
    handle.author = feed.authors.first().and_then(|p| clean_text(&p.name));
    handle.thumbnail = feed
        .logo
        .or(feed.icon)
        .map(|image| image.uri)
        .filter(|uri| !uri.trim().is_empty());
    Some(handle)
}

fn html_handle(url: &str, status_code: u16, bytes: &[u8]) -> FetchHandle {
    let html = String::from_utf8_lossy(bytes);
    FetchHandle::page(url, status_code).with_feed_links(find_feed_links_in_html(&html, url))
}

/// Scans HTML for `<link>` tags with `rel="alternate"` and an RSS/Atom type.
///
/// Uses simple string scanning (no HTML parser dependency). Handles attribute
/// ordering variations and resolves relative URLs against the base URL.
/// Returns every distinct feed URL in document order.
///
/// Only ASCII is folded so offsets found in the lowercased copy stay valid in
/// `html`.
fn find_feed_links_in_html(html: &str, base_url: &str) -> Vec<String> {
    let html_lower = html.to_ascii_lowercase();
    let mut links: Vec<String> = Vec::new();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let Some(tag_end) = remaining.find('>') else {
            break;
        };
        let tag = &remaining[..=tag_end];

        if contains_attr(tag, "rel", "alternate") && is_feed_type(tag) {
            // Extract href from the original HTML to preserve URL case
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(resolved) =
                extract_attr_value(original_tag, "href").and_then(|href| resolve_url(href, base_url))
            {
                if !links.contains(&resolved) {
                    links.push(resolved);
                }
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    links
}

/// Checks if a lowercased tag contains an attribute with the given value.
fn contains_attr(tag: &str, attr_name: &str, attr_value: &str) -> bool {
    let pattern_double = format!("{attr_name}=\"{attr_value}\"");
    let pattern_single = format!("{attr_name}='{attr_value}'");
    tag.contains(&pattern_double) || tag.contains(&pattern_single)
}

/// Checks if a lowercased `<link>` tag has an RSS or Atom feed type.
fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml") || tag.contains("application/atom+xml")
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let value_start = tag_lower.find(&attr_prefix)? + attr_prefix.len();
    let rest = tag.get(value_start..)?;
    let quote = *rest.as_bytes().first()?;

    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}

/// Resolves a potentially relative URL against the page URL.
///
/// Protocol-relative links get `https:`. Returns `None` when the href cannot
/// form an absolute URL.
fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if href.starts_with("//") {
        return url::Url::parse(&format!("https:{href}"))
            .ok()
            .map(|u| u.to_string());
    }

    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .ok()
        .map(|u| u.to_string())
}

/// Reads a response body, enforcing a size limit and Content-Length completeness.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
