//! Header name and value validation.
//!
//! Names must be HTTP tokens. Values may only contain horizontal tab, visible
//! ASCII, space and obs-text (`\x80`..=`\xff`):
//!
//! ```text
//! field-value    = *( field-content / obs-fold )
//! field-content  = field-vchar [ 1*( SP / HTAB ) field-vchar ]
//! field-vchar    = VCHAR / obs-text
//! ```
//!
//! Rejecting everything else keeps CR and LF out of the header block.

use crate::ensure;
use crate::protocol::ValidationError;

/// Returns true if `c` may appear in an HTTP token.
#[inline]
pub(crate) fn is_token_char(c: u8) -> bool {
    matches!(c,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~')
        || c.is_ascii_alphanumeric()
}

/// Returns true if `s` is a non-empty HTTP token.
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

/// Returns true if `value` contains a character that is not a valid field-vchar.
pub fn has_invalid_header_char(value: &str) -> bool {
    value.chars().any(|c| !matches!(c, '\t' | '\x20'..='\x7e' | '\u{80}'..='\u{ff}'))
}

pub fn validate_header_name(name: &str) -> Result<(), ValidationError> {
    ensure!(is_token(name), ValidationError::invalid_header_name(name));
    Ok(())
}

/// Validates a header value; `None` stands for a value that was never provided.
pub fn validate_header_value(name: &str, value: Option<&str>) -> Result<(), ValidationError> {
    let Some(value) = value else {
        return Err(ValidationError::invalid_header_value(name, "value is undefined"));
    };
    ensure!(!has_invalid_header_char(value), ValidationError::invalid_header_value(name, "invalid character in header content"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens() {
        assert!(is_token("Content-Type"));
        assert!(is_token("x-custom_header.v1"));
        assert!(!is_token(""));
        assert!(!is_token("bad header"));
        assert!(!is_token("bad:header"));
        assert!(!is_token("naïve"));
    }

    #[test]
    fn header_injection_is_rejected() {
        assert!(validate_header_value("x-a", Some("ok\tvalue")).is_ok());
        assert!(validate_header_value("x-a", Some("caf\u{e9}")).is_ok());
        assert!(validate_header_value("x-a", Some("a\r\nset-cookie: evil")).is_err());
        assert!(validate_header_value("x-a", Some("nul\0")).is_err());
        assert!(validate_header_value("x-a", Some("\u{100}")).is_err());
        assert!(validate_header_value("x-a", None).is_err());
    }

    #[test]
    fn header_names() {
        assert!(validate_header_name("X-Test").is_ok());
        assert!(matches!(validate_header_name("X Test"), Err(ValidationError::InvalidHeaderName { .. })));
    }
}
