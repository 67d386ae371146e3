//! Utility functions shared by the feed collaborators and the ingest pipeline.
//!
//! - **URL normalization/validation**: canonical candidate form plus the
//!   SSRF policy applied to untrusted manifests
//! - **Text cleanup**: sanitizing feed metadata before it is stored

mod text;
mod url_validator;

pub use text::clean_text;
pub use url_validator::{normalize_url, validate_url, UrlValidationError};
