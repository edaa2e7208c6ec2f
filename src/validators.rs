//! Validation of grant-source tokens
//!
//! The grant sources are partially untrusted text; every port token passes
//! through here before it can reach the compiler. Malformed tokens yield
//! `None` and are dropped by the callers, never reported as errors.

use std::collections::BTreeSet;

/// Parses a single port token, accepting only integers in `1..=65535`.
///
/// Leading and trailing whitespace is tolerated; signs, hex, and empty
/// tokens are not.
///
/// # Examples
///
/// ```
/// use rampart::validators::parse_port;
///
/// assert_eq!(parse_port("443"), Some(443));
/// assert_eq!(parse_port(" 80 "), Some(80));
/// assert_eq!(parse_port("0"), None);
/// assert_eq!(parse_port("65536"), None);
/// assert_eq!(parse_port("http"), None);
/// ```
pub fn parse_port(token: &str) -> Option<u16> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u16>().ok().filter(|port| *port >= 1)
}

/// Splits a comma-separated port list, dropping malformed tokens.
///
/// The result is sorted and deduplicated; an all-invalid input yields an
/// empty set.
pub fn parse_port_list(raw: &str) -> BTreeSet<u16> {
    raw.split(',').filter_map(parse_port).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("1"), Some(1));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("99999"), None);
    }

    #[test]
    fn port_rejects_non_numeric() {
        assert_eq!(parse_port(""), None);
        assert_eq!(parse_port("  "), None);
        assert_eq!(parse_port("-1"), None);
        assert_eq!(parse_port("+80"), None);
        assert_eq!(parse_port("8o"), None);
        assert_eq!(parse_port("443x"), None);
    }

    #[test]
    fn port_list_drops_bad_tokens() {
        let ports = parse_port_list("80,,abc,443,70000,443");
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 443]);
    }

    #[test]
    fn port_list_tolerates_whitespace_and_newline() {
        let ports = parse_port_list("80, 90\n");
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 90]);
    }

    #[test]
    fn port_list_empty_when_nothing_valid() {
        assert!(parse_port_list("").is_empty());
        assert!(parse_port_list("a,b,c").is_empty());
    }
}
