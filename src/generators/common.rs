//! Common utilities for document generation.
//!
//! Shared helpers for filename sanitising, value formatting and markup escaping.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Sanitize a string for use in filenames.
///
/// Keeps lowercase ASCII alphanumerics, collapses whitespace, `-` and `_` into single
/// dashes and drops everything else, so the result never contains path separators.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_dash = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_' || ch == '.')
            && !last_dash
            && !result.is_empty()
        {
            result.push('-');
            last_dash = true;
        }
    }

    let trimmed = result.trim_matches('-');
    if trimmed.is_empty() {
        return fallback.to_string();
    }

    trimmed.to_string()
}

/// Format an integer with `,` thousands separators (`5000` -> `5,000`).
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a currency amount with a literal `$` prefix.
pub fn format_currency(value: u64) -> String {
    format!("${}", format_thousands(value))
}

/// Format a timestamp the way an en-US locale prints a short date (`1/5/2025`).
pub fn format_locale_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%-m/%-d/%Y").to_string()
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 16);
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Textual form of a data-record value as it appears after substitution.
pub fn display_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(true) => Cow::Borrowed("true"),
        Value::Bool(false) => Cow::Borrowed("false"),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}
