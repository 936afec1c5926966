//! Phone and email extraction
//!
//! Phones are Mexican mobile/landline numbers; a match normalizes to the
//! bare digit string (8–10 digits, country code stripped).

use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?52)?\s*(?:[ .-]*\(?(\d{2,3})\)?[ .-]*(\d{3,4})[ .-]*(\d{4})|\b(\d{8,10})\b)")
        .unwrap()
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// Extract and normalize the first phone number found in the text.
pub fn extract_phone(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    for caps in PHONE_RE.captures_iter(text) {
        let mut digits = String::new();
        for i in 1..=4 {
            if let Some(group) = caps.get(i) {
                digits.extend(group.as_str().chars().filter(|c| c.is_ascii_digit()));
            }
        }
        if (8..=10).contains(&digits.len()) {
            tracing::debug!(phone = %digits, "Phone extracted");
            return Some(digits);
        }
    }
    None
}

/// First well-formed email address in the text.
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Normalize a raw transport phone (with country code, separators, ...) to
/// its last 10 digits. Returns None when fewer than 10 digits are present.
pub fn normalize_phone_last10(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 10 {
        Some(digits[digits.len() - 10..].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_ten_digit_phone() {
        assert_eq!(extract_phone("mi número es 2221234567").as_deref(), Some("2221234567"));
    }

    #[test]
    fn extracts_formatted_phone_with_country_code() {
        assert_eq!(
            extract_phone("llámame al +52 (222) 123 4567 por favor").as_deref(),
            Some("2221234567")
        );
        assert_eq!(extract_phone("tel: 782-111-5970").as_deref(), Some("7821115970"));
    }

    #[test]
    fn ignores_too_short_and_too_long_numbers() {
        assert!(extract_phone("somos 4 personas").is_none());
        assert!(extract_phone("folio 123456789012345").is_none());
    }

    #[test]
    fn extracts_email() {
        assert_eq!(
            extract_email("escríbeme a ana.lopez+csa@example.com.mx gracias").as_deref(),
            Some("ana.lopez+csa@example.com.mx")
        );
        assert!(extract_email("sin correo aquí").is_none());
    }

    #[test]
    fn last10_normalization() {
        assert_eq!(normalize_phone_last10("+521 222 123 4567").as_deref(), Some("2221234567"));
        assert!(normalize_phone_last10("12345").is_none());
    }
}
