//! Identifier safety and filesystem sanitization
//!
//! Every schema, table, and column name that reaches generated SQL must pass
//! `ensure_safe_identifier` first. Values never go through here; they are
//! always bound as query parameters.

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{ApiError, ApiResult};

const MAX_IDENTIFIER_LEN: usize = 128;

static SAFE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_IDENTIFIER_LEN && SAFE_IDENTIFIER.is_match(name)
}

/// Reject unsafe identifiers before any SQL interpolation
pub fn ensure_safe_identifier(name: &str) -> ApiResult<()> {
    if is_safe_identifier(name) {
        Ok(())
    } else {
        Err(ApiError::invalid_identifier(name))
    }
}

pub fn ensure_safe_identifiers<'a, I>(names: I) -> ApiResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in names {
        ensure_safe_identifier(name)?;
    }
    Ok(())
}

/// Make a name safe for use as a path component.
///
/// Replaces `/ \ : < > | * ? "` with `_` and trims leading/trailing spaces
/// and dots, matching the storage layout contract.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '<' | '>' | '|' | '*' | '?' | '"' => '_',
            other => other,
        })
        .collect();
    replaced.trim_matches(|c| c == ' ' || c == '.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(is_safe_identifier("users"));
        assert!(is_safe_identifier("_tmp"));
        assert!(is_safe_identifier("Order_Items2"));
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(!is_safe_identifier("t; DROP TABLE users"));
        assert!(!is_safe_identifier("users--"));
        assert!(!is_safe_identifier("a.b"));
        assert!(!is_safe_identifier("\"quoted\""));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("1starts_with_digit"));
    }

    #[test]
    fn rejects_over_long_identifiers() {
        let long = "a".repeat(129);
        assert!(!is_safe_identifier(&long));
        assert!(is_safe_identifier(&"a".repeat(128)));
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_filename("my/db:prod"), "my_db_prod");
        assert_eq!(sanitize_filename("  spaced.  "), "spaced");
        assert_eq!(sanitize_filename("a*b?c\"d"), "a_b_c_d");
    }
}
