//! End-to-end tests of the ingest pipeline: filter, batch scheduling, worker
//! pool and persistence working together.
//!
//! Stores live in temp directories because the scheduler opens a fresh
//! handle per batch. Network access is replaced by scripted clients, except
//! for the wiremock test at the bottom.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use feedsift::feed::{FeedClient, FetchError, FetchHandle, HttpFeedClient};
use feedsift::ingest::{filter_known, BatchScheduler, CandidateSet, PoolOptions, ProgressUpdate};
use feedsift::storage::{Database, FeedRecord};

const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test doubles
// ============================================================================

/// What a scripted URL resolves to.
#[derive(Clone)]
enum Page {
    /// A feed, stored under the given final URL
    Feed(&'static str),
    /// An HTML page advertising these feeds
    Html(Vec<&'static str>),
    Fail,
    /// Never answers; gives up once the timeout passes
    Hang,
}

/// Scripted client that also records when each fetch started and finished.
struct ScriptedClient {
    pages: HashMap<String, Page>,
    delay: Duration,
    calls: Mutex<Vec<(String, Instant, Instant)>>,
}

impl ScriptedClient {
    fn new(pages: &[(&str, Page)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, page)| (url.to_string(), page.clone()))
                .collect(),
            delay: Duration::from_millis(10),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Vec<(String, Instant, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedClient for ScriptedClient {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<FetchHandle, FetchError> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        let result = match self.pages.get(url) {
            Some(Page::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(FetchError::Timeout)
            }
            Some(Page::Feed(final_url)) => Ok(FetchHandle::feed(*final_url, 200).with_title("Scripted")),
            Some(Page::Html(feeds)) => Ok(FetchHandle::page(url, 200)
                .with_feed_links(feeds.iter().map(|f| f.to_string()).collect())),
            Some(Page::Fail) | None => Err(FetchError::HttpStatus(404)),
        };
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), started, Instant::now()));
        result
    }
}

async fn temp_store() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feeds.db").to_string_lossy().into_owned();
    // Create the schema up front so tests can seed it
    Database::open(&path).await.unwrap().close().await;
    (dir, path)
}

async fn stored_links(path: &str) -> Vec<String> {
    let db = Database::open(path).await.unwrap();
    let mut links: Vec<String> = db
        .get_feed_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.link)
        .collect();
    db.close().await;
    links.sort();
    links
}

fn set(urls: &[&str]) -> CandidateSet {
    urls.iter().collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_new_feed_stored_known_skipped_timeout_rejected() {
    let (_dir, path) = temp_store().await;
    {
        let db = Database::open(&path).await.unwrap();
        db.insert_feed_record(&FeedRecord::new("https://b.example/rss", 200))
            .await
            .unwrap();
        db.close().await;
    }

    let client = Arc::new(ScriptedClient::new(&[
        ("https://a.example/rss", Page::Feed("https://a.example/rss")),
        ("https://b.example/rss", Page::Feed("https://b.example/rss")),
        ("https://c.example/rss", Page::Hang),
    ]));
    let timeout = Duration::from_millis(200);

    let db = Database::open(&path).await.unwrap();
    let remaining = filter_known(
        set(&["https://a.example/rss", "https://b.example/rss", "https://c.example/rss"]),
        client.as_ref(),
        &db,
        timeout,
        false,
    )
    .await
    .unwrap();
    db.close().await;
    // Discovery on C times out too, which keeps it as a candidate
    assert!(remaining.contains("https://a.example/rss"));
    assert!(remaining.contains("https://c.example/rss"));
    assert_eq!(remaining.len(), 2);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = BatchScheduler::new(path.as_str(), client)
        .pool_options(PoolOptions {
            workers: 2,
            fetch_timeout: timeout,
        })
        .progress_updates(tx)
        .run(remaining.into_vec())
        .await
        .unwrap();

    let totals = summary.totals();
    assert_eq!(totals.size, 2);
    assert_eq!(totals.inserted, 1);
    assert_eq!(totals.not_feeds, 1);
    assert_eq!(
        stored_links(&path).await,
        vec!["https://a.example/rss", "https://b.example/rss"]
    );

    let mut lines = Vec::new();
    while let Ok(update) = rx.try_recv() {
        lines.push(update.to_string());
    }
    // A finishes long before C gives up
    assert_eq!(
        lines,
        vec![
            "[1/2] https://a.example/rss: OK".to_string(),
            "[2/2] https://c.example/rss: NOK".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_two_pages_discovering_same_feed_store_one_record() {
    let (_dir, path) = temp_store().await;
    let client = Arc::new(ScriptedClient::new(&[
        ("https://x.example/", Page::Html(vec!["https://z.example/feed"])),
        ("https://y.example/", Page::Html(vec!["https://z.example/feed"])),
        ("https://z.example/feed", Page::Feed("https://z.example/feed")),
    ]));

    let db = Database::open(&path).await.unwrap();
    let remaining = filter_known(
        set(&["https://x.example/", "https://y.example/"]),
        client.as_ref(),
        &db,
        TIMEOUT,
        false,
    )
    .await
    .unwrap();
    db.close().await;

    assert_eq!(remaining.into_vec(), vec!["https://z.example/feed".to_string()]);

    let summary = BatchScheduler::new(path.as_str(), client)
        .run(vec!["https://z.example/feed".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.totals().inserted, 1);
    assert_eq!(stored_links(&path).await, vec!["https://z.example/feed"]);
}

#[tokio::test]
async fn test_batches_run_in_sequence() {
    let (_dir, path) = temp_store().await;
    let candidates: Vec<String> = (0..5).map(|i| format!("https://f{i}.example/rss")).collect();
    let pages: Vec<(&str, Page)> = candidates
        .iter()
        .map(|c| (c.as_str(), Page::Fail))
        .collect();
    let client = Arc::new(ScriptedClient::new(&pages).with_delay(Duration::from_millis(30)));

    let summary = BatchScheduler::new(path.as_str(), client.clone())
        .batch_size(2)
        .pool_options(PoolOptions {
            workers: 2,
            fetch_timeout: TIMEOUT,
        })
        .run(candidates.clone())
        .await
        .unwrap();

    let sizes: Vec<usize> = summary.batches.iter().map(|b| b.size).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let calls: HashMap<String, (Instant, Instant)> = client
        .calls()
        .into_iter()
        .map(|(url, start, end)| (url, (start, end)))
        .collect();
    assert_eq!(calls.len(), 5);

    let batches: Vec<&[String]> = candidates.chunks(2).collect();
    for pair in batches.windows(2) {
        let last_finish = pair[0].iter().map(|u| calls[u].1).max().unwrap();
        let first_start = pair[1].iter().map(|u| calls[u].0).min().unwrap();
        assert!(
            last_finish <= first_start,
            "a fetch of the next batch started before the previous batch finished"
        );
    }
}

#[tokio::test]
async fn test_progress_counts_every_fetch_once() {
    let (_dir, path) = temp_store().await;
    let candidates: Vec<String> = (0..7).map(|i| format!("https://p{i}.example/rss")).collect();
    let pages: Vec<(&str, Page)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let page = if i % 2 == 0 { Page::Fail } else { Page::Html(vec![]) };
            (c.as_str(), page)
        })
        .collect();
    let client = Arc::new(ScriptedClient::new(&pages));

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    BatchScheduler::new(path.as_str(), client)
        .batch_size(3)
        .pool_options(PoolOptions {
            workers: 3,
            fetch_timeout: TIMEOUT,
        })
        .progress_updates(tx)
        .run(candidates)
        .await
        .unwrap();

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }

    let completed: Vec<usize> = updates.iter().map(|u| u.completed).collect();
    assert_eq!(completed, (1..=7).collect::<Vec<_>>());
    assert!(updates.iter().all(|u| u.total == 7 && !u.ok));
}

#[tokio::test]
async fn test_concurrent_workers_persist_each_link_once() {
    let (_dir, path) = temp_store().await;
    // Every mirror redirects to the same feed
    let candidates: Vec<String> = (0..12)
        .map(|i| format!("https://mirror{i}.example/rss"))
        .collect();
    let pages: Vec<(&str, Page)> = candidates
        .iter()
        .map(|c| (c.as_str(), Page::Feed("https://origin.example/rss")))
        .collect();
    let client = Arc::new(ScriptedClient::new(&pages).with_delay(Duration::from_millis(5)));

    let summary = BatchScheduler::new(path.as_str(), client)
        .batch_size(12)
        .pool_options(PoolOptions {
            workers: 6,
            fetch_timeout: TIMEOUT,
        })
        .run(candidates)
        .await
        .unwrap();

    let totals = summary.totals();
    assert_eq!(totals.inserted, 1);
    assert_eq!(totals.duplicates, 11);
    assert_eq!(totals.store_errors, 0);
    assert_eq!(stored_links(&path).await, vec!["https://origin.example/rss"]);
}

#[tokio::test]
async fn test_second_run_adds_nothing() {
    let (_dir, path) = temp_store().await;
    let urls = ["https://a.example/rss", "https://b.example/rss", "https://c.example/atom"];
    let pages: Vec<(&str, Page)> = urls.iter().map(|u| (*u, Page::Feed(*u))).collect();
    let client = Arc::new(ScriptedClient::new(&pages));

    for round in 0..2 {
        let db = Database::open(&path).await.unwrap();
        let remaining = filter_known(set(&urls), client.as_ref(), &db, TIMEOUT, false)
            .await
            .unwrap();
        db.close().await;

        if round == 1 {
            assert!(remaining.is_empty());
        }
        BatchScheduler::new(path.as_str(), client.clone())
            .run(remaining.into_vec())
            .await
            .unwrap();
    }

    let links = stored_links(&path).await;
    let distinct: HashSet<&String> = links.iter().collect();
    assert_eq!(links.len(), 3);
    assert_eq!(distinct.len(), links.len());
}

// ============================================================================
// Over HTTP
// ============================================================================

#[tokio::test]
async fn test_http_page_discovery_to_stored_feed() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(
                    r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#,
                ),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/rss+xml")
                .set_body_string(
                    r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Mock Blog</title><description>Posts</description><item><guid>1</guid><title>Hi</title></item></channel></rss>"#,
                ),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (_dir, store) = temp_store().await;
    let client: Arc<dyn FeedClient> = Arc::new(HttpFeedClient::new(reqwest::Client::new()));

    let db = Database::open(&store).await.unwrap();
    let candidates = set(&[
        format!("{}/blog", server.uri()).as_str(),
        format!("{}/missing", server.uri()).as_str(),
    ]);
    // The mock server listens on loopback
    let remaining = filter_known(candidates, client.as_ref(), &db, TIMEOUT, true)
        .await
        .unwrap();
    db.close().await;

    let summary = BatchScheduler::new(store.as_str(), client)
        .run(remaining.into_vec())
        .await
        .unwrap();
    assert_eq!(summary.totals().inserted, 1);
    assert_eq!(summary.totals().not_feeds, 1);

    let db = Database::open(&store).await.unwrap();
    let records = db.get_feed_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].link, format!("{}/feed.xml", server.uri()));
    assert_eq!(records[0].title.as_deref(), Some("Mock Blog"));
    assert_eq!(records[0].description.as_deref(), Some("Posts"));
    assert_eq!(records[0].status_code, 200);
}
