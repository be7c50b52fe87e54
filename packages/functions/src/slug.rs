// ABOUTME: Function slug validation
// ABOUTME: A slug names a directory under functions/ and a path segment inside the sandbox

use crate::{Result, ServeError};
use regex::Regex;
use std::sync::LazyLock;

static FUNCTION_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap_or_else(|e| panic!("invalid slug pattern: {e}"))
});

/// Validates a function slug.
///
/// # Examples
///
/// ```
/// use fnserve_functions::validate_function_slug;
///
/// assert!(validate_function_slug("hello-world").is_ok());
/// assert!(validate_function_slug("../etc").is_err());
/// ```
pub fn validate_function_slug(slug: &str) -> Result<()> {
    if FUNCTION_SLUG.is_match(slug) {
        Ok(())
    } else {
        Err(ServeError::InvalidSlug {
            slug: slug.to_string(),
        })
    }
}
