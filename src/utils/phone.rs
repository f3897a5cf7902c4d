use once_cell::sync::Lazy;
use regex::Regex;

/// Optional leading `+`, then at least seven digits
static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?\d{7,}$").expect("phone regex is valid"));

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_REGEX.is_match(phone)
}

/// Drop everything except digits and `+` (spaces, dashes, brackets)
pub fn sanitize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}
