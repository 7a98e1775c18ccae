//! Inbound payload validation
//!
//! Pure checks over raw payload bytes. Both validators sanitize their
//! output, so callers never need to escape the returned text again.

use crate::error::Rejection;
use crate::sanitize::sanitize;
use crate::types::Nickname;

/// Default maximum chat message length, in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 280;

const NICKNAME_MIN: usize = 2;
const NICKNAME_MAX: usize = 10;

/// Validate a nickname claim.
///
/// Fails with `InvalidEncoding` for non-UTF-8 bytes and with `InvalidFormat`
/// unless the sanitized text is 2 to 10 ASCII letters or digits.
pub fn validate_nickname(raw: &[u8]) -> Result<Nickname, Rejection> {
    let text = std::str::from_utf8(raw).map_err(|_| Rejection::InvalidEncoding)?;
    let name = sanitize(text);

    let len = name.chars().count();
    if !(NICKNAME_MIN..=NICKNAME_MAX).contains(&len)
        || !name.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Rejection::InvalidFormat);
    }

    Ok(Nickname::new_unchecked(name))
}

/// Validate a chat message and return its sanitized text.
///
/// Length is measured on the raw input in characters (bytes when the input
/// is not valid UTF-8), so escaping never pushes a message over the limit.
pub fn validate_message(raw: &[u8], max_length: usize) -> Result<String, Rejection> {
    match std::str::from_utf8(raw) {
        Ok(text) if text.chars().count() > max_length => {
            Err(Rejection::TooLong { max: max_length })
        }
        Ok(text) => Ok(sanitize(text)),
        Err(_) if raw.len() > max_length => Err(Rejection::TooLong { max: max_length }),
        Err(_) => Err(Rejection::InvalidEncoding),
    }
}
