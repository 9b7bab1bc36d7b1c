//! Caller number normalisation.
//!
//! Russian numbers arrive from the PBX as `8XXXXXXXXXX`, `7XXXXXXXXXX`, `+7 (XXX) ...` or a bare
//! ten-digit mobile starting with 9. Everything is reduced to `+7XXXXXXXXXX` so the client index
//! in the call store has one key per subscriber.

fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether `raw` looks like a dialable Russian number.
pub fn is_valid_phone(raw: &str) -> bool {
    let d = digits(raw);
    match d.len() {
        11 => d.starts_with('7') || d.starts_with('8'),
        10 => d.starts_with('9'),
        _ => false,
    }
}

/// Normalise to `+7XXXXXXXXXX`. Returns `None` for anything that is not a valid number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let d = digits(raw);
    let national = match d.len() {
        11 if d.starts_with('7') || d.starts_with('8') => &d[1..],
        10 if d.starts_with('9') => d.as_str(),
        _ => return None,
    };
    Some(format!("+7{}", national))
}
