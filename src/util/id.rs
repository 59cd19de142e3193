//! Issue ID parsing, validation, and formatting.
//!
//! IDs have the shape `<prefix>-<number>`: the prefix is lowercase,
//! letter-led, at most 8 characters; the number is a positive integer
//! allocated from a per-prefix monotonic counter.

use crate::error::{BeadsError, Result};

/// Maximum prefix length in characters.
pub const MAX_PREFIX_LEN: usize = 8;

/// A structurally-valid issue ID split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub prefix: String,
    pub number: u64,
}

impl ParsedId {
    #[must_use]
    pub fn to_id_string(&self) -> String {
        format_id(&self.prefix, self.number)
    }
}

/// Format an ID from its parts.
#[must_use]
pub fn format_id(prefix: &str, number: u64) -> String {
    format!("{prefix}-{number}")
}

/// Validate a bare prefix: lowercase, letter-led, alphanumeric, <= 8 chars.
///
/// # Errors
///
/// Returns `InvalidPrefix` if any rule is violated.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(BeadsError::InvalidPrefix {
            prefix: prefix.to_string(),
        })
    }
}

/// Parse an ID of the form `<prefix>-<number>`.
///
/// The split happens at the last hyphen so a hypothetical multi-part prefix
/// still fails prefix validation rather than number parsing.
///
/// # Errors
///
/// Returns `InvalidId` for malformed input and `InvalidPrefix` when the
/// prefix part fails validation.
pub fn parse_id(id: &str) -> Result<ParsedId> {
    let (prefix, number_str) = id.rsplit_once('-').ok_or_else(|| BeadsError::InvalidId {
        id: id.to_string(),
    })?;

    validate_prefix(prefix)?;

    let number: u64 = number_str.parse().map_err(|_| BeadsError::InvalidId {
        id: id.to_string(),
    })?;
    if number == 0 {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    Ok(ParsedId {
        prefix: prefix.to_string(),
        number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_id() {
        let parsed = parse_id("bd-42").unwrap();
        assert_eq!(parsed.prefix, "bd");
        assert_eq!(parsed.number, 42);
        assert_eq!(parsed.to_id_string(), "bd-42");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_id("bd").is_err());
        assert!(parse_id("bd-").is_err());
        assert!(parse_id("bd-0").is_err());
        assert!(parse_id("bd-abc").is_err());
        assert!(parse_id("-42").is_err());
        assert!(parse_id("BD-42").is_err());
    }

    #[test]
    fn prefix_rules() {
        assert!(validate_prefix("bd").is_ok());
        assert!(validate_prefix("proj2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("2bd").is_err());
        assert!(validate_prefix("Bd").is_err());
        assert!(validate_prefix("waytoolongg").is_err());
    }

    #[test]
    fn split_at_last_hyphen() {
        // A hyphenated prefix part fails prefix validation, not number parsing.
        assert!(matches!(
            parse_id("my-proj-3"),
            Err(BeadsError::InvalidPrefix { .. })
        ));
    }
}
