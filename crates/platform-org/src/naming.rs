//! Object naming rules
//!
//! Project and role binding names share one charset: lowercase ASCII letters,
//! digits and hyphens, starting and ending with an alphanumeric character,
//! at most [`MAX_NAME_LENGTH`] characters long.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of a project or role binding name.
pub const MAX_NAME_LENGTH: usize = 63;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());

static DISALLOWED_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Check whether a name satisfies the platform naming rules.
///
/// # Examples
///
/// ```
/// use platform_org::naming::is_valid_name;
///
/// assert!(is_valid_name("marketing-docs"));
/// assert!(!is_valid_name("Marketing Docs"));
/// assert!(!is_valid_name("-leading"));
/// ```
pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LENGTH && NAME_PATTERN.is_match(name)
}

/// Convert arbitrary text into a valid name.
///
/// Lowercases the input, collapses every run of disallowed characters into a
/// single hyphen, strips leading and trailing hyphens and truncates to
/// [`MAX_NAME_LENGTH`]. Sanitizing an already sanitized name returns it
/// unchanged.
///
/// # Examples
///
/// ```
/// use platform_org::naming::sanitize_name;
///
/// assert_eq!(sanitize_name("Test Project 123!"), "test-project-123");
/// assert_eq!(sanitize_name("test-project-123"), "test-project-123");
/// ```
pub fn sanitize_name(input: &str) -> String {
    let lowered = input.to_lowercase();
    let collapsed = DISALLOWED_RUN.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');
    truncate(trimmed, MAX_NAME_LENGTH)
        .trim_end_matches('-')
        .to_string()
}

/// Truncate a string to at most `limit` characters.
///
/// Inputs within the limit are returned unchanged; longer inputs are cut to
/// exactly `limit` characters. Counting is by `char`, so multi-byte text is
/// never split inside a code point.
///
/// # Examples
///
/// ```
/// use platform_org::naming::truncate;
///
/// assert_eq!(truncate("short", 10), "short");
/// assert_eq!(truncate("abcdefgh", 3), "abc");
/// ```
pub fn truncate(input: &str, limit: usize) -> String {
    match input.char_indices().nth(limit) {
        Some((byte_index, _)) => input[..byte_index].to_string(),
        None => input.to_string(),
    }
}
