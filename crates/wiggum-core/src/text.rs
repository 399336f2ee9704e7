//! UTF-8 safe text helpers used when shortening commands and assistant text
//! for the activity log.

/// Finds the largest byte index <= `index` that is a valid UTF-8 character boundary.
///
/// Stable stand-in for the nightly-only `str::floor_char_boundary`.
#[must_use]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut boundary = index;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// Finds the smallest byte index >= `index` that is a valid UTF-8 character boundary.
#[must_use]
pub fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut boundary = index;
    while !s.is_char_boundary(boundary) {
        boundary += 1;
    }
    boundary
}

/// Truncates a string to a maximum number of characters, adding "..." if truncated.
///
/// Counts characters, not bytes, so multi-byte characters are never split.
///
/// ```
/// use wiggum_core::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("cargo test --workspace", 10), "cargo test...");
/// assert_eq!(truncate_with_ellipsis("ls", 10), "ls");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}

/// Collapses a possibly multi-line string onto one line for log display.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the last `max_bytes` bytes of `s`, moved forward to a character boundary.
pub fn tail(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    &s[ceil_char_boundary(s, s.len() - max_bytes)..]
}
