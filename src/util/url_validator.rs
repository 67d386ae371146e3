use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL normalization and validation.
///
/// Covers parsing failures as well as the security policy applied to
/// candidates coming from untrusted manifests (SSRF prevention).
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Normalizes a URL string into its canonical candidate form.
///
/// The `url` crate lower-cases scheme and host, drops default ports and
/// turns an empty path into `/`. On top of that the fragment is removed,
/// since it never changes what the server returns.
///
/// Two candidates are the same entity iff their normalized forms are equal.
///
/// # Errors
///
/// Returns [`UrlValidationError`] if the string cannot be parsed, uses a
/// scheme other than `http`/`https`, or has no host.
///
/// # Examples
///
/// ```
/// use feedsift::util::normalize_url;
///
/// let url = normalize_url(" HTTPS://Example.COM:443/feed.xml#top ").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    url.set_fragment(None);
    Ok(url)
}

/// Normalizes a URL and applies the public-host policy.
///
/// On top of [`normalize_url`], rejects:
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// # Errors
///
/// Returns [`UrlValidationError::Localhost`] or
/// [`UrlValidationError::PrivateIp`] for internal hosts, and the errors of
/// [`normalize_url`] otherwise.
///
/// # Examples
///
/// ```
/// use feedsift::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = normalize_url(url_str)?;

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_lowercases_scheme_and_host() {
        let url = normalize_url("HTTP://News.Example.ORG/Path").unwrap();
        assert_eq!(url.as_str(), "http://news.example.org/Path");
    }

    #[test]
    fn test_normalize_strips_fragment_and_default_port() {
        let url = normalize_url("https://example.com:443/rss#latest").unwrap();
        assert_eq!(url.as_str(), "https://example.com/rss");
    }

    #[test]
    fn test_normalize_adds_root_path() {
        let url = normalize_url("https://example.com").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_normalize_keeps_query() {
        let url = normalize_url("https://example.com/feed?format=rss").unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed?format=rss");
    }

    #[test]
    fn test_normalize_allows_localhost() {
        assert!(normalize_url("http://127.0.0.1:8080/feed").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            normalize_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            normalize_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected() {
        assert!(validate_url("http://localhost/feed").is_err());
        assert!(validate_url("http://127.0.0.1/feed").is_err());
    }

    #[test]
    fn test_private_ips_rejected() {
        assert!(validate_url("http://192.168.1.1/feed").is_err());
        assert!(validate_url("http://10.0.0.1/feed").is_err());
        assert!(validate_url("http://172.16.0.1:3000/feed").is_err());
    }

    #[test]
    fn test_ipv6_internal_rejected() {
        assert!(validate_url("http://[::1]/feed").is_err());
        assert!(validate_url("http://[fe80::1]/feed").is_err());
        assert!(validate_url("http://[fd00::1]/feed").is_err());
    }

    #[test]
    fn test_zero_address_rejected() {
        assert!(validate_url("http://0.0.0.0/feed").is_err());
    }

    #[test]
    fn test_valid_public_url_accepted() {
        let url = validate_url("https://example.com:8443/feed.xml").unwrap();
        assert_eq!(url.port(), Some(8443));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            host in "[a-z]{1,12}\\.(com|org|net)",
            path in "(/[a-z0-9]{1,8}){0,3}",
            frag in proptest::option::of("[a-z]{1,5}"),
        ) {
            let raw = match frag {
                Some(f) => format!("https://{host}{path}#{f}"),
                None => format!("https://{host}{path}"),
            };
            let once = normalize_url(&raw).unwrap();
            let twice = normalize_url(once.as_str()).unwrap();
            prop_assert_eq!(once.as_str(), twice.as_str());
            prop_assert!(once.fragment().is_none());
        }

        #[test]
        fn normalize_ignores_host_case(host in "[a-zA-Z]{1,12}\\.com") {
            let upper = normalize_url(&format!("https://{}/rss", host.to_uppercase())).unwrap();
            let lower = normalize_url(&format!("https://{}/rss", host.to_lowercase())).unwrap();
            prop_assert_eq!(upper, lower);
        }
    }
}
