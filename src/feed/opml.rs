use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription extracted from an OPML document.
///
/// Represents a single `<outline>` element with an `xmlUrl` attribute.
/// URLs are returned exactly as written; normalization and the host policy
/// are applied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OpmlFeed {
    /// Display title. Sourced from `title`, falling back to `text`, then to
    /// the XML URL itself.
    pub title: String,
    /// URL of the RSS/Atom feed.
    pub xml_url: String,
    /// URL of the feed's website, if provided via `htmlUrl`.
    pub html_url: Option<String>,
}

/// Reads an OPML file from disk and extracts its feed subscriptions.
///
/// # Errors
///
/// Returns [`OpmlError::Io`] if the file cannot be read, and the errors of
/// [`parse_opml_content`] otherwise.
pub async fn parse(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml_content(&content)
}

/// Parses OPML content and extracts feed subscriptions.
///
/// Handles both nested and flat documents: every `<outline>` carrying a
/// non-empty `xmlUrl` is returned regardless of depth, in document order.
/// Category outlines (without `xmlUrl`) are traversed but not returned.
///
/// # Security
///
/// XXE is not possible: quick-xml (0.37) never parses `<!ENTITY>`
/// declarations, and `decode_and_unescape_value()` only resolves the five
/// XML builtins, so custom entities are reported as parse errors.
pub fn parse_opml_content(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

/// Extracts feed attributes from an outline element.
///
/// Returns `None` for category/folder outlines without a feed URL.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<OpmlFeed>, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"htmlUrl" => &mut html_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        *slot = Some(value.trim().to_string());
    }

    let Some(xml_url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    Ok(Some(OpmlFeed {
        title: title
            .filter(|t| !t.is_empty())
            .or(text.filter(|t| !t.is_empty()))
            .unwrap_or_else(|| xml_url.clone()),
        xml_url,
        html_url: html_url.filter(|u| !u.is_empty()),
    }))
}
