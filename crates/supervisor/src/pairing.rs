//! Pairing-code bootstrap helpers.
//!
//! When no credential blob exists and a phone number is configured, the
//! supervisor asks the session for a short alphanumeric pairing code instead
//! of showing a QR login token.

use std::time::Duration;

/// How long to let the session object initialize before requesting a code.
pub const PAIRING_DELAY: Duration = Duration::from_secs(2);

/// Strip a configured phone number down to its digits.
#[must_use]
pub fn normalize_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Group a pairing code into 4-character blocks joined by `-`.
#[must_use]
pub fn format_pairing_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
