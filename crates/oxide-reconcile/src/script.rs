//! Multi-statement scripts separated by `GO` lines.

use std::sync::OnceLock;

use regex::Regex;

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*go[ \t]*\r?$").expect("Invalid batch separator regex")
    })
}

/// Splits a script into batches on lines consisting of `GO` alone
/// (any case). Blank batches are dropped.
#[must_use]
pub fn split_batches(script: &str) -> Vec<&str> {
    separator()
        .split(script)
        .map(str::trim)
        .filter(|batch| !batch.is_empty())
        .collect()
}
