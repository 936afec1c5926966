//! URL validation, repair, and auto-injection
//!
//! Anti-hallucination guardrail over site links: every domain URL in a
//! candidate reply must match a URL actually returned by a tool call this
//! turn. Mismatches are repaired to the closest known URL (similarity ≥ 0.6)
//! or deleted; mentions of a catalogued level without its URL get the URL
//! injected under the matching line.

use once_cell::sync::Lazy;
use regex::Regex;

use admissions_agent_core::{Message, Role};

use crate::loop_detector::similarity_ratio;

/// Minimum similarity for rewriting an unknown URL to a known one. Known
/// risk: a legitimately different but textually similar URL can be rewritten
/// to the wrong target.
pub const REPAIR_CUTOFF: f64 = 0.6;

static SITE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://monteverde\.edu\.mx/[^\s\)\]\,]+").unwrap());

/// `- {level name} → {url}` lines in tool results.
static LEVEL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\s*(.+?)\s*→\s*(https?://monteverde\.edu\.mx/\S+)").unwrap());

/// Empty markdown links left behind by URL deletion: `[label]()` → `label`.
static EMPTY_MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(\s*\)").unwrap());

/// All site URLs found in tool-result messages this turn.
fn collect_tool_urls(messages: &[Message], recovery_text: Option<&str>) -> Vec<String> {
    let mut urls = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::Tool) {
        for m in SITE_URL_RE.find_iter(&message.content) {
            if !urls.contains(&m.as_str().to_string()) {
                urls.push(m.as_str().to_string());
            }
        }
    }
    if let Some(text) = recovery_text {
        for m in SITE_URL_RE.find_iter(text) {
            if !urls.contains(&m.as_str().to_string()) {
                urls.push(m.as_str().to_string());
            }
        }
    }
    urls
}

/// `level name (lowercase) → url` pairs from tool results.
fn collect_level_url_map(messages: &[Message], recovery_text: Option<&str>) -> Vec<(String, String)> {
    let mut map = Vec::new();
    let mut push_from = |content: &str| {
        for caps in LEVEL_LINE_RE.captures_iter(content) {
            let name = caps[1].trim().to_lowercase();
            let url = caps[2].trim().to_string();
            if !map.iter().any(|(n, _)| *n == name) {
                map.push((name, url));
            }
        }
    };
    for message in messages.iter().filter(|m| m.role == Role::Tool) {
        push_from(&message.content);
    }
    if let Some(text) = recovery_text {
        push_from(text);
    }
    map
}

/// True when any tool call this turn produced a site URL.
pub fn has_tool_urls(messages: &[Message]) -> bool {
    messages
        .iter()
        .any(|m| m.role == Role::Tool && SITE_URL_RE.is_match(&m.content))
}

/// Validate every site URL in the reply against the tool-returned set.
///
/// Accepted unchanged on a match (after trailing-slash normalization),
/// rewritten to the closest known URL at similarity ≥ 0.6, deleted
/// otherwise. With no known URLs at all, every reply URL is deleted.
pub fn validate_urls(text: &str, messages: &[Message], recovery_text: Option<&str>) -> String {
    let reply_urls: Vec<String> = SITE_URL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    if reply_urls.is_empty() {
        return text.to_string();
    }

    let tool_urls = collect_tool_urls(messages, recovery_text);
    let normalized: Vec<String> = tool_urls
        .iter()
        .map(|u| u.trim_end_matches('/').to_string())
        .collect();

    let mut text = text.to_string();

    if normalized.is_empty() {
        for url in &reply_urls {
            tracing::warn!(url = %url, "Invented URL removed (no tool data this turn)");
            text = text.replace(url.as_str(), "");
        }
        return EMPTY_MARKDOWN_LINK_RE.replace_all(&text, "$1").to_string();
    }

    for url in &reply_urls {
        let url_normalized = url.trim_end_matches('/');
        if normalized.iter().any(|known| known == url_normalized) {
            continue;
        }

        let closest = normalized
            .iter()
            .map(|known| (known, similarity_ratio(url_normalized, known)))
            .filter(|(_, ratio)| *ratio >= REPAIR_CUTOFF)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match closest {
            Some((known, ratio)) => {
                // Prefer the original (non-normalized) tool URL
                let replacement = tool_urls
                    .iter()
                    .find(|u| u.trim_end_matches('/') == known.as_str())
                    .cloned()
                    .unwrap_or_else(|| known.clone());
                tracing::warn!(
                    from = %url,
                    to = %replacement,
                    ratio = %format!("{ratio:.2}"),
                    "Invented URL rewritten to known URL"
                );
                text = text.replace(url.as_str(), &replacement);
            }
            None => {
                tracing::warn!(url = %url, "Invented URL removed (no close match)");
                text = text.replace(url.as_str(), "");
            }
        }
    }

    EMPTY_MARKDOWN_LINK_RE.replace_all(&text, "$1").to_string()
}

/// If the reply names a catalogued level but omits its URL, append the URL
/// under the matching `...:` line.
pub fn inject_missing_level_urls(
    text: &str,
    messages: &[Message],
    recovery_text: Option<&str>,
) -> String {
    let level_map = collect_level_url_map(messages, recovery_text);
    if level_map.is_empty() {
        return text.to_string();
    }

    // A known URL already present means nothing to inject
    if level_map.iter().any(|(_, url)| text.contains(url.as_str())) {
        return text.to_string();
    }

    let text_lower = text.to_lowercase();

    let mut matched: Option<(&str, Vec<&str>)> = None;
    for (name, url) in &level_map {
        let main_words: Vec<&str> = name.split_whitespace().filter(|w| w.len() > 3).collect();
        if main_words.is_empty() {
            continue;
        }
        if main_words.iter().any(|w| text_lower.contains(w)) {
            matched = Some((url.as_str(), main_words));
            break;
        }
    }

    let Some((url, words)) = matched else {
        return text.to_string();
    };

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    for line in lines.iter_mut() {
        let trimmed = line.trim_end();
        if trimmed.ends_with(':') {
            let line_lower = trimmed.to_lowercase();
            if words.iter().any(|w| line_lower.contains(w)) {
                *line = format!("{}\n{}", trimmed, url);
                tracing::info!(url = %url, "Level URL auto-injected");
                return lines.join("\n");
            }
        }
    }

    text.to_string()
}
