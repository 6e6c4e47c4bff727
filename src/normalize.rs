//! Value normalization for identifier blocking and tuple uniqueness.
//!
//! Two source systems rarely agree on formatting. Normalization gives every
//! identifier a cheap canonical form that serves double duty: it is the
//! blocking key for candidate generation and the value component of the
//! store's uniqueness tuple.

use std::sync::OnceLock;

use regex::Regex;

/// Legal-form suffixes dropped from company names so "Acme Corp" and
/// "Acme Corporation" land in the same block.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "ltd",
    "limited",
    "corp",
    "corporation",
    "co",
    "company",
    "gmbh",
    "plc",
];

/// Normalizes an email: trimmed and ASCII-lowercased.
#[must_use]
pub fn email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Normalizes a phone number to bare digits.
///
/// A leading `1` country code or `0` trunk prefix is stripped when the
/// number is otherwise longer than ten digits, so "+1 (555) 123-4567" and
/// "555.123.4567" normalize identically.
#[must_use]
pub fn phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.len() > 10 {
        if let Some(rest) = digits.strip_prefix('1') {
            return rest.to_string();
        }
        if let Some(rest) = digits.strip_prefix('0') {
            return rest.to_string();
        }
    }
    digits
}

/// Normalizes a company name: lowercased, punctuation stripped, whitespace
/// collapsed, and trailing legal-form tokens dropped.
#[must_use]
pub fn company(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();

    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        if COMPANY_SUFFIXES.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join(" ")
}

/// Generic normalization for custom identifier kinds: trim + lowercase.
#[must_use]
pub fn generic(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

static EMAIL_SHAPE: OnceLock<Regex> = OnceLock::new();

/// Cheap shape check used at ingest to reject obviously broken emails.
#[must_use]
pub fn is_plausible_email(raw: &str) -> bool {
    let re = EMAIL_SHAPE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email shape regex is valid")
    });
    re.is_match(raw.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_case_folds_and_trims() {
        assert_eq!(email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_phone_digits_only() {
        assert_eq!(phone("(555) 123-4567"), "5551234567");
        assert_eq!(phone("555.123.4567"), "5551234567");
    }

    #[test]
    fn test_phone_strips_country_and_trunk_prefix() {
        assert_eq!(phone("+1 555 123 4567"), "5551234567");
        assert_eq!(phone("05551234567"), "5551234567");
        // Short numbers are left alone.
        assert_eq!(phone("555-1234"), "5551234");
    }

    #[test]
    fn test_company_strips_punctuation_and_suffixes() {
        assert_eq!(company("Acme, Inc."), "acme");
        assert_eq!(company("Acme Corporation"), "acme");
        assert_eq!(company("ACME   CORP"), "acme");
        assert_eq!(company("Bright & Early LLC"), "bright early");
    }

    #[test]
    fn test_company_keeps_a_lone_suffix_word() {
        // A company literally named "Corp" should not normalize to "".
        assert_eq!(company("Corp"), "corp");
    }

    #[test]
    fn test_is_plausible_email() {
        assert!(is_plausible_email("a@b.com"));
        assert!(is_plausible_email("  a@b.co.uk "));
        assert!(!is_plausible_email("not-an-email"));
        assert!(!is_plausible_email("a @b.com"));
        assert!(!is_plausible_email("a@b"));
    }
}
