//! Input validation for client-supplied identifiers.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Maximum owner id length.
pub const MAX_OWNER_LENGTH: usize = 128;

/// Owner used when a request does not identify its client.
pub const ANONYMOUS_OWNER: &str = "anonymous";

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+\.(csv|jsonl)$").expect("valid artifact name pattern")
});

/// Check that a requested artifact name can only resolve inside the output directory.
pub fn is_valid_artifact_name(name: &str) -> bool {
    name.len() <= 256 && !name.contains("..") && ARTIFACT_NAME.is_match(name)
}

/// Owner ids route progress messages, so they must not contain the
/// message separator.
pub fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner.len() <= MAX_OWNER_LENGTH
        && !owner.contains(':')
        && !owner.chars().any(char::is_control)
}

/// Compare secrets without an early exit on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
