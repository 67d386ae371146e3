use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::client::{read_limited_bytes, FetchError};

const MAX_MANIFEST_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from fetching or decoding a remote manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to fetch manifest: {0}")]
    Fetch(#[from] FetchError),

    #[error("Manifest is not valid UTF-8")]
    Encoding,

    #[error("Invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Encoding of a remote manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// Pick by URL suffix (`.json`, `.yaml`, `.yml`); otherwise try JSON,
    /// then YAML.
    #[default]
    Auto,
    Json,
    Yaml,
}

impl ManifestFormat {
    /// Resolve `Auto` from the manifest URL. Returns `Auto` when the suffix
    /// says nothing.
    pub fn for_url(self, url: &str) -> Self {
        if self != ManifestFormat::Auto {
            return self;
        }
        let path = url::Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| url.to_lowercase());
        if path.ends_with(".json") {
            ManifestFormat::Json
        } else if path.ends_with(".yaml") || path.ends_with(".yml") {
            ManifestFormat::Yaml
        } else {
            ManifestFormat::Auto
        }
    }
}

fn default_url_field() -> String {
    "url".to_string()
}

/// A remote list of feed URLs, as configured under `[[remote_sources]]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSource {
    pub url: String,
    #[serde(default)]
    pub format: ManifestFormat,
    /// Key whose string values are feed URLs, at any depth.
    #[serde(default = "default_url_field")]
    pub url_field: String,
}

impl RemoteSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: ManifestFormat::Auto,
            url_field: default_url_field(),
        }
    }
}

/// Downloads manifests and pulls feed URLs out of them.
#[derive(Clone)]
pub struct ManifestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ManifestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Download `url` as text. Non-2xx statuses are errors.
    pub async fn fetch_text(&self, url: &str) -> Result<String, ManifestError> {
        let bytes = tokio::time::timeout(self.timeout, async {
            let response = self.client.get(url).send().await.map_err(FetchError::from)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            read_limited_bytes(response, MAX_MANIFEST_SIZE).await
        })
        .await
        .map_err(|_| FetchError::Timeout)??;

        String::from_utf8(bytes).map_err(|_| ManifestError::Encoding)
    }

    /// Download and decode one remote source.
    pub async fn fetch_urls(&self, source: &RemoteSource) -> Result<Vec<String>, ManifestError> {
        let text = self.fetch_text(&source.url).await?;
        let urls = decode_urls(&text, source.format.for_url(&source.url), &source.url_field)?;
        tracing::debug!(url = %source.url, count = urls.len(), "Decoded remote manifest");
        Ok(urls)
    }
}

/// Collect every string stored under `url_field`, at any depth.
///
/// A value that is an array of strings contributes each string. Values of
/// other types under that key are ignored. Order is not significant.
pub fn decode_urls(
    text: &str,
    format: ManifestFormat,
    url_field: &str,
) -> Result<Vec<String>, ManifestError> {
    let document: Value = match format {
        ManifestFormat::Json => serde_json::from_str(text)?,
        ManifestFormat::Yaml => serde_yaml::from_str(text)?,
        ManifestFormat::Auto => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str(text)?,
        },
    };

    let mut urls = Vec::new();
    collect_field(&document, url_field, &mut urls);
    Ok(urls)
}

fn collect_field(value: &Value, field: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == field {
                    match child {
                        Value::String(s) => out.push(s.clone()),
                        Value::Array(items) => out.extend(
                            items.iter().filter_map(|v| v.as_str().map(str::to_owned)),
                        ),
                        _ => {}
                    }
                }
                collect_field(child, field, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_field(item, field, out);
            }
        }
        _ => {}
    }
}
