//! Markup escaping for untrusted text
//!
//! Every nickname and chat line is escaped exactly once, on the way in,
//! before it is stored or broadcast.

/// Escape `&`, `<`, `>` and `"` as HTML entities.
///
/// `&` is replaced first so the entities produced for the other characters
/// are not escaped again. Apostrophes pass through unchanged.
///
/// Not idempotent: `sanitize("&amp;")` is `"&amp;amp;"`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
