//! Display helpers for sizes, addresses, hashes and timestamps

use chrono::{DateTime, Utc};

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count with one decimal place in the largest fitting unit, capped at GB.
///
/// `format_file_size(0) == "0 B"`, `format_file_size(1536) == "1.5 KB"`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0;
    let mut threshold = 1024u64;
    while unit < SIZE_UNITS.len() - 1 && bytes >= threshold {
        unit += 1;
        threshold = threshold.saturating_mul(1024);
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

/// Shorten an address to `head...tail`; short inputs are returned unchanged
pub fn truncate_address(address: &str, head: usize, tail: usize) -> String {
    truncate_middle(address, head, tail)
}

/// Shorten a content hash keeping `length` characters on each side
pub fn truncate_hash(hash: &str, length: usize) -> String {
    truncate_middle(hash, length, length)
}

fn truncate_middle(value: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= head + tail + 3 {
        return value.to_string();
    }
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}...{}", start, end)
}

/// Render unix seconds as e.g. `Feb 25, 2024` (UTC)
pub fn format_timestamp(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%b %-d, %Y").to_string(),
        None => timestamp.to_string(),
    }
}

/// Drop an optional `scheme://` prefix and surrounding whitespace
pub fn strip_scheme(hash: &str) -> &str {
    let trimmed = hash.trim();
    match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    }
}
