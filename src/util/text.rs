/// Maximum stored length (in chars) of a feed title or description.
const MAX_METADATA_CHARS: usize = 1000;

/// Normalizes a piece of feed metadata for storage.
///
/// Control characters are dropped, every run of whitespace collapses to a
/// single space and the result is trimmed and capped at 1000 characters.
/// Returns `None` when nothing printable is left, so callers can store NULL
/// instead of an empty string.
///
/// # Examples
///
/// ```
/// use feedsift::util::clean_text;
///
/// assert_eq!(clean_text("  Example\n\tBlog \x07"), Some("Example Blog".to_string()));
/// assert_eq!(clean_text(" \x1b "), None);
/// ```
pub fn clean_text(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len().min(MAX_METADATA_CHARS));
    let mut pending_space = false;
    let mut count = 0;

    for c in s.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if count >= MAX_METADATA_CHARS {
            break;
        }
        if pending_space {
            out.push(' ');
            count += 1;
            pending_space = false;
        }
        out.push(c);
        count += 1;
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
