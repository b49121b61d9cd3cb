// 🧹 Field Normalization - Deterministic canonical forms per field
// Scoring compares normalized values; merging keeps the raw ones.

use crate::record::Field;

/// Values that count as missing even when non-empty
pub const PLACEHOLDERS: &[&str] = &["", "n/a", "na", "none", "null", "nan", "unknown", "-"];

/// Street designator abbreviations applied token by token
const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("strt", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("boulevard", "blvd"),
    ("blv", "blvd"),
    ("drive", "dr"),
    ("road", "rd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("circle", "cir"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("apartment", "apt"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// True when a value is blank or a known placeholder.
pub fn is_missing(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    PLACEHOLDERS.contains(&v.as_str())
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercase, drop punctuation ("A.B.C." → "abc"), collapse whitespace.
pub fn normalize_name(value: &str) -> String {
    let stripped: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    normalize_text(&stripped)
}

pub fn normalize_address(value: &str) -> String {
    let stripped: String = value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    stripped
        .split_whitespace()
        .map(|token| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Digits only
pub fn normalize_phone(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digits, first five
pub fn normalize_zip(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).take(5).collect()
}

/// Normalize a raw value for the given field; missing values become "".
pub fn normalize_field(field: Field, raw: &str) -> String {
    if is_missing(raw) {
        return String::new();
    }
    match field {
        Field::Name => normalize_name(raw),
        Field::Address => normalize_address(raw),
        Field::Zip => normalize_zip(raw),
        Field::Phone => normalize_phone(raw),
        Field::City | Field::State | Field::Email | Field::ContactPerson => normalize_text(raw),
    }
}

// ============================================================================
// TESTS
// ============================================================================
