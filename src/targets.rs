//! Target string validation and normalization

use regex::Regex;
use std::sync::LazyLock;

/// Accepts hostnames, dotted IPv4, bracketed IPv6, optional http(s) scheme
/// and optional port.
static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:[A-Za-z0-9.-]+|\[[A-Fa-f0-9:]+\]|(?:\d{1,3}\.){3}\d{1,3})(?::\d{1,5})?$",
    )
    .expect("target pattern")
});

/// Upper bound on targets accepted from one raw input blob
const MAX_TARGETS: usize = 1024;

/// Returns true if the string looks like a scannable host/IP/URL
pub fn is_valid_target(target: &str) -> bool {
    TARGET_RE.is_match(target)
}

/// Splits a raw text blob into validated targets.
///
/// Input may be separated by whitespace, commas, or semicolons. Surrounding
/// quotes are stripped, invalid entries dropped, duplicates removed while
/// preserving first-seen order, and the result capped at 1024 entries.
pub fn normalize_targets(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in raw.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let t = item.trim().trim_matches(|c| c == '"' || c == '\'');
        if t.is_empty() || !is_valid_target(t) {
            continue;
        }
        if seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
        if out.len() >= MAX_TARGETS {
            break;
        }
    }
    out
}

/// Normalizes a target to a URL, defaulting to the http scheme
pub fn ensure_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}
