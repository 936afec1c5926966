//! Model-output integrity scanners
//!
//! Two layers of defense over raw model text:
//! - [`clean_model_response`] strips formatting artifacts right after
//!   generation (unicode escapes, fenced blocks, leaked thought JSON,
//!   echoed code).
//! - [`validate_and_clean`] runs immediately before dispatch as the last
//!   line of defense; it can still block a message outright.

use once_cell::sync::Lazy;
use regex::Regex;

use admissions_agent_core::Channel;

/// Zero-width marker prefixed to every emitted reply; used later to
/// deduplicate our own messages against externally observed ones.
pub const REPLY_MARKER: char = '\u{200B}';

/// Internal text fragments that must never reach the user.
const SYSTEM_LEAK_PATTERNS: &[&str] = &[
    "[SISTEMA",
    "[SYSTEM",
    "DATO PRE-CAPTURADO",
    "[INTERNAL",
    "[DEBUG",
    "[CONTEXT",
];

static UNICODE_BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\\)?\[U\+([0-9A-Fa-f]{4,5})\]").unwrap());

static UNICODE_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9A-Fa-f]{4})").unwrap());

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\n.*?\n```").unwrap());

static FENCED_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\n.*?\n```").unwrap());

static THOUGHT_BLOB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{\s*"thought"\s*:.*?\}"#).unwrap());

static PRINT_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)print\s*\((?:[^()]*|\([^()]*\))*\)").unwrap());

static API_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\w+_api\.\w+\s*\((?:[^()]*|\([^()]*\))*\)").unwrap());

static TOOL_CALL_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?:get_levels_by_campus|get_campus_info|get_objection_response)\s*\((?:[^()]*|\([^()]*\))*\)",
    )
    .unwrap()
});

static CODE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:import |from |def |class |>>> ).*$").unwrap());

/// Code written out as text instead of a proper tool call.
static CODE_LEAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:print\s*\(|default_api\.|get_levels_by_campus\s*\(|get_campus_info\s*\(|get_objection_response\s*\(|\w+_api\.\w+\s*\()",
    )
    .unwrap()
});

static JSON_ARTIFACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\{"(?:thought|thinking|reflection|plan)"[^}]*\}"#).unwrap());

/// True when the text contains a leaked code-style tool invocation.
pub fn has_code_leak(text: &str) -> bool {
    CODE_LEAK_RE.is_match(text)
}

/// Char-safe prefix for log previews.
pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Restore escaped unicode and strip generation artifacts.
pub fn clean_model_response(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // `[U+1F989]` / `\[U+1F989]` and literal `\uXXXX` back to characters
    let text = UNICODE_BRACKET_RE.replace_all(text, |caps: &regex::Captures| {
        decode_codepoint(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let text = UNICODE_ESCAPE_RE.replace_all(&text, |caps: &regex::Captures| {
        decode_codepoint(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });

    let text = FENCED_JSON_RE.replace_all(&text, "");
    let text = FENCED_BLOCK_RE.replace_all(&text, "");
    let text = THOUGHT_BLOB_RE.replace_all(&text, "");

    let text = PRINT_CALL_RE.replace_all(&text, "");
    let text = API_CALL_RE.replace_all(&text, "");
    let text = TOOL_CALL_TEXT_RE.replace_all(&text, "");
    let text = CODE_LINE_RE.replace_all(&text, "");

    text.trim().to_string()
}

fn decode_codepoint(hex: &str) -> Option<String> {
    u32::from_str_radix(hex, 16)
        .ok()
        .and_then(char::from_u32)
        .map(String::from)
}

/// Validate and clean a message right before dispatch.
///
/// Returns `None` when the message must be blocked. `last_assistant` is the
/// immediately preceding persisted assistant turn, used for duplicate
/// suppression; `fallback_booking_link` resolves a `{BOOKING_LINK}` that
/// survived this far.
pub fn validate_and_clean(
    text: &str,
    last_assistant: Option<&str>,
    channel: Channel,
    fallback_booking_link: &str,
) -> Option<String> {
    if text.is_empty() {
        tracing::warn!("Outbound validation: empty message blocked");
        return None;
    }

    let mut text = text.replace(REPLY_MARKER, "").trim().to_string();
    if text.is_empty() {
        tracing::warn!("Outbound validation: empty after marker cleanup");
        return None;
    }

    // System text leak: try to rescue the tail after the closing bracket,
    // otherwise block
    for pattern in SYSTEM_LEAK_PATTERNS {
        if text.contains(pattern) {
            let rescued = text
                .find(']')
                .map(|idx| text[idx + 1..].trim().trim_start_matches(':').trim().to_string())
                .filter(|tail| tail.chars().count() > 20);
            match rescued {
                Some(tail) => {
                    tracing::warn!(pattern, "Outbound validation: system leak trimmed");
                    text = tail;
                    break;
                }
                None => {
                    tracing::warn!(pattern, "Outbound validation: unrecoverable system leak");
                    return None;
                }
            }
        }
    }

    text = JSON_ARTIFACT_RE.replace_all(&text, "").trim().to_string();
    if text.is_empty() {
        tracing::warn!("Outbound validation: only JSON artifacts");
        return None;
    }

    if has_code_leak(&text) {
        tracing::warn!(preview = %preview(&text, 80), "Outbound validation: code leak blocked");
        return None;
    }

    if text.contains("{BOOKING_LINK}") {
        tracing::warn!("Outbound validation: unresolved booking placeholder, using fallback");
        text = text.replace("{BOOKING_LINK}", fallback_booking_link);
    }

    if let Some(limit) = channel.hard_length_limit() {
        if text.chars().count() > limit {
            tracing::warn!(len = text.chars().count(), limit, "Outbound validation: truncating");
            text = text.chars().take(limit - 3).collect::<String>() + "...";
        }
    }

    if let Some(last) = last_assistant {
        if last.replace(REPLY_MARKER, "").trim() == text.trim() {
            tracing::warn!("Outbound validation: duplicate of previous assistant turn blocked");
            return None;
        }
    }

    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_unicode_escapes() {
        assert_eq!(clean_model_response(r"Hola ¡bien! [U+1F989]"), "Hola ¡bien! 🦉");
        assert_eq!(clean_model_response(r"\[U+1F43B]"), "🐻");
    }

    #[test]
    fn strips_fenced_blocks_and_thought_blobs() {
        let raw = "Claro.\n```json\n{\"a\": 1}\n```\n{ \"thought\": \"internal\" }\nSigo aquí.";
        let clean = clean_model_response(raw);
        assert!(!clean.contains("thought"));
        assert!(!clean.contains("```"));
        assert!(clean.contains("Sigo aquí."));
    }

    #[test]
    fn strips_echoed_code() {
        let raw = "print(get_levels_by_campus(\"Puebla\"))\nLos niveles son estos.";
        let clean = clean_model_response(raw);
        assert!(!clean.contains("print"));
        assert!(clean.contains("Los niveles son estos."));

        let raw = "import requests\nfrom x import y\nHola";
        assert_eq!(clean_model_response(raw), "Hola");
    }

    #[test]
    fn code_leak_detection() {
        assert!(has_code_leak("voy a llamar get_campus_info(\"Puebla\")"));
        assert!(has_code_leak("default_api.get_levels(...)"));
        assert!(!has_code_leak("Te comparto la información del plantel"));
    }

    #[test]
    fn validate_blocks_empty_and_duplicates() {
        assert!(validate_and_clean("", None, Channel::WhatsApp, "https://x").is_none());
        assert!(validate_and_clean("\u{200B}", None, Channel::WhatsApp, "https://x").is_none());
        assert!(validate_and_clean(
            "mismo mensaje",
            Some("\u{200B}mismo mensaje"),
            Channel::WhatsApp,
            "https://x",
        )
        .is_none());
    }

    #[test]
    fn validate_rescues_system_leak_with_long_tail() {
        let text = "[SISTEMA - DATO]: ¡Perfecto! ¿Me compartes tu correo electrónico para continuar?";
        let cleaned = validate_and_clean(text, None, Channel::WhatsApp, "https://x").unwrap();
        assert!(cleaned.starts_with("¡Perfecto!"));

        // Short tail is unrecoverable
        assert!(validate_and_clean("[SISTEMA]: ok", None, Channel::WhatsApp, "https://x").is_none());
    }

    #[test]
    fn validate_resolves_placeholder_and_truncates_social() {
        let cleaned = validate_and_clean(
            "Agenda aquí: {BOOKING_LINK}",
            None,
            Channel::WhatsApp,
            "https://agenda.leadlink.mx/widget/booking/general",
        )
        .unwrap();
        assert!(cleaned.contains("https://agenda.leadlink.mx/widget/booking/general"));

        let long = "a".repeat(1600);
        let cleaned = validate_and_clean(&long, None, Channel::Instagram, "https://x").unwrap();
        assert_eq!(cleaned.chars().count(), 1500);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn validate_blocks_code_leaks() {
        assert!(
            validate_and_clean("print('hola')", None, Channel::WhatsApp, "https://x").is_none()
        );
    }
}
