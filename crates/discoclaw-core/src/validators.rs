//! Snowflake and token format validation.

/// Reasons a candidate id/token string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    Empty,
    WrongLength,
    NonDigit,
    WrongSegmentCount,
    InvalidBase64Url,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationError::Empty => "empty input",
            ValidationError::WrongLength => "must be 17-20 digits",
            ValidationError::NonDigit => "contains non-digit characters",
            ValidationError::WrongSegmentCount => "expected exactly three dot-separated segments",
            ValidationError::InvalidBase64Url => "segment is not valid base64url",
        };
        write!(f, "{s}")
    }
}

/// A snowflake is valid iff it consists solely of 17-20 digits.
pub fn is_valid_snowflake(s: &str) -> bool {
    validate_snowflake(s).is_ok()
}

pub fn validate_snowflake(s: &str) -> Result<(), ValidationError> {
    if s.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !(17..=20).contains(&s.len()) {
        return Err(ValidationError::WrongLength);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NonDigit);
    }
    Ok(())
}

/// A discord-style token is valid iff it has exactly three dot-separated
/// base64url segments.
pub fn is_valid_token(s: &str) -> bool {
    validate_token(s).is_ok()
}

pub fn validate_token(s: &str) -> Result<(), ValidationError> {
    if s.is_empty() {
        return Err(ValidationError::Empty);
    }
    let segments: Vec<&str> = s.split('.').collect();
    if segments.len() != 3 {
        return Err(ValidationError::WrongSegmentCount);
    }
    for seg in &segments {
        if seg.is_empty() || !seg.bytes().all(is_base64url_char) {
            return Err(ValidationError::InvalidBase64Url);
        }
    }
    Ok(())
}

fn is_base64url_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_accepts_17_to_20_digits() {
        assert!(is_valid_snowflake("12345678901234567"));
        assert!(is_valid_snowflake("123456789012345678"));
        assert!(is_valid_snowflake("1234567890123456789"));
        assert!(is_valid_snowflake("12345678901234567890"));
    }

    #[test]
    fn snowflake_rejects_wrong_length() {
        assert!(!is_valid_snowflake("1234567890123456")); // 16
        assert!(!is_valid_snowflake("123456789012345678901")); // 21
    }

    #[test]
    fn snowflake_rejects_non_digits() {
        assert!(!is_valid_snowflake("1234567890123456a7"));
        assert!(!is_valid_snowflake(""));
    }

    #[test]
    fn token_accepts_three_base64url_segments() {
        assert!(is_valid_token("MTIzNDU2Nzg5.GaBcDe.AbC-_123"));
    }

    #[test]
    fn token_rejects_wrong_segment_count() {
        assert!(!is_valid_token("a.b"));
        assert!(!is_valid_token("a.b.c.d"));
    }

    #[test]
    fn token_rejects_non_base64url_chars() {
        assert!(!is_valid_token("a.b c.d"));
        assert!(!is_valid_token("a.b.d!"));
    }

    #[test]
    fn validate_gives_labeled_reason() {
        assert_eq!(validate_snowflake(""), Err(ValidationError::Empty));
        assert_eq!(
            validate_snowflake("abc"),
            Err(ValidationError::WrongLength)
        );
        assert_eq!(
            validate_token("one.two"),
            Err(ValidationError::WrongSegmentCount)
        );
    }
}
