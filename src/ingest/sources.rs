use futures::future::join_all;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::CandidateSet;
use crate::feed::{opml, ManifestFetcher, RemoteSource};
use crate::util::validate_url;

/// Where candidates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Every file under `root` whose name ends in `.{extension}`, parsed as
    /// OPML.
    Directory { root: PathBuf, extension: String },
    /// A JSON or YAML list served over HTTP.
    Remote(RemoteSource),
}

/// Merge every source into one set, rejecting private and loopback hosts.
pub async fn aggregate(sources: &[SourceDescriptor], fetcher: &ManifestFetcher) -> CandidateSet {
    aggregate_with(sources, fetcher, false).await
}

/// Merge every source into one set.
///
/// Sources are read concurrently. A failing source is logged and contributes
/// nothing; it never fails the aggregation. With `allow_private_hosts` unset,
/// URLs pointing at loopback or private addresses are dropped.
pub async fn aggregate_with(
    sources: &[SourceDescriptor],
    fetcher: &ManifestFetcher,
    allow_private_hosts: bool,
) -> CandidateSet {
    let per_source = join_all(
        sources
            .iter()
            .map(|source| read_source(source, fetcher, allow_private_hosts)),
    )
    .await;

    let mut all = CandidateSet::new();
    for set in per_source {
        all.union(set);
    }

    tracing::info!(sources = sources.len(), candidates = all.len(), "Aggregated candidates");
    all
}

async fn read_source(
    source: &SourceDescriptor,
    fetcher: &ManifestFetcher,
    allow_private_hosts: bool,
) -> CandidateSet {
    let urls = match source {
        SourceDescriptor::Directory { root, extension } => read_directory(root, extension).await,
        SourceDescriptor::Remote(remote) => match fetcher.fetch_urls(remote).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(url = %remote.url, error = %e, "Skipping remote source");
                Vec::new()
            }
        },
    };

    let mut set = CandidateSet::new();
    for url in urls {
        if !allow_private_hosts {
            if let Err(e) = validate_url(&url) {
                tracing::warn!(url = %url, error = %e, "Skipping candidate");
                continue;
            }
        }
        set.insert(&url);
    }
    set
}

/// Collect the feed URLs of every matching OPML file under `root`.
async fn read_directory(root: &Path, extension: &str) -> Vec<String> {
    let files = match find_files(root.to_path_buf(), extension.to_string()).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Directory scan failed");
            return Vec::new();
        }
    };

    let mut urls = Vec::new();
    for path in files {
        match opml::parse(&path).await {
            Ok(feeds) => {
                tracing::debug!(path = %path.display(), feeds = feeds.len(), "Read OPML file");
                urls.extend(feeds.into_iter().map(|f| f.xml_url));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping OPML file");
            }
        }
    }
    urls
}

/// Walk `root` on the blocking pool. Symlinks are not followed.
async fn find_files(root: PathBuf, extension: String) -> Result<Vec<PathBuf>, tokio::task::JoinError> {
    let suffix = format!(".{}", extension.trim_start_matches('.').to_lowercase());

    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable path");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.to_lowercase().ends_with(&suffix))
            })
            .map(|entry| entry.into_path())
            .collect()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ManifestFormat;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opml(urls: &[&str]) -> String {
        let outlines: String = urls
            .iter()
            .map(|u| format!(r#"<outline type="rss" xmlUrl="{u}"/>"#))
            .collect();
        format!(r#"<?xml version="1.0"?><opml version="2.0"><body>{outlines}</body></opml>"#)
    }

    fn sorted(set: CandidateSet) -> Vec<String> {
        let mut v = set.into_vec();
        v.sort();
        v
    }

    fn fetcher() -> ManifestFetcher {
        ManifestFetcher::new(reqwest::Client::new())
    }

    fn directory(root: &Path) -> SourceDescriptor {
        SourceDescriptor::Directory {
            root: root.to_path_buf(),
            extension: "opml".into(),
        }
    }

    #[tokio::test]
    async fn test_directory_scan_is_recursive_and_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("a.opml"), opml(&["https://a.example/rss"])).unwrap();
        std::fs::write(
            dir.path().join("nested/deeper/B.OPML"),
            opml(&["https://b.example/rss", "https://A.example/rss"]),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), opml(&["https://c.example/rss"])).unwrap();

        let set = aggregate(&[directory(dir.path())], &fetcher()).await;
        assert_eq!(sorted(set), vec!["https://a.example/rss", "https://b.example/rss"]);
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_hide_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.opml"), opml(&["https://good.example/rss"])).unwrap();
        std::fs::write(dir.path().join("bad.opml"), "<opml><body><outline></body>").unwrap();

        let set = aggregate(&[directory(dir.path())], &fetcher()).await;
        assert_eq!(sorted(set), vec!["https://good.example/rss"]);
    }

    #[tokio::test]
    async fn test_missing_directory_contributes_nothing() {
        let set = aggregate(&[directory(Path::new("/nonexistent/feedsift"))], &fetcher()).await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_private_hosts_rejected_unless_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mixed.opml"),
            opml(&["https://public.example/rss", "http://192.168.1.10/rss", "http://localhost/rss"]),
        )
        .unwrap();
        let sources = [directory(dir.path())];

        let strict = aggregate(&sources, &fetcher()).await;
        assert_eq!(sorted(strict), vec!["https://public.example/rss"]);

        let relaxed = aggregate_with(&sources, &fetcher(), true).await;
        assert_eq!(relaxed.len(), 3);
    }

    #[tokio::test]
    async fn test_directory_and_remote_sources_are_merged() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "feeds:\n  - url: https://b.example/rss\n  - url: https://c.example/rss\n",
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("subs.opml"),
            opml(&["https://a.example/rss", "https://b.example/rss"]),
        )
        .unwrap();

        let sources = vec![
            directory(dir.path()),
            SourceDescriptor::Remote(RemoteSource {
                url: format!("{}/list", mock_server.uri()),
                format: ManifestFormat::Yaml,
                url_field: "url".into(),
            }),
            SourceDescriptor::Remote(RemoteSource::new(format!("{}/gone.json", mock_server.uri()))),
        ];

        // The manifest server itself is on loopback; the URLs it lists are public
        let set = aggregate(&sources, &fetcher()).await;
        assert_eq!(
            sorted(set),
            vec![
                "https://a.example/rss",
                "https://b.example/rss",
                "https://c.example/rss",
            ]
        );
    }
}
