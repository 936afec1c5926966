//! Reaction / like / story-mention detection
//!
//! Facebook and Instagram deliver reactions and story mentions as ordinary
//! messages; they must not trigger the agent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Payload content types that are reactions rather than messages.
const REACTION_CONTENT_TYPES: &[&str] = &[
    "reaction",
    "story_mention",
    "story_reply",
    "like",
    "ig_story_mention",
    "ig_story_reply",
    "fb_reaction",
    "ig_reaction",
];

/// Transport-generated reaction phrasings (Spanish and English).
const REACTION_KEYWORDS: &[&str] = &[
    "mención de la historia",
    "mencion de la historia",
    "story_mention",
    "story_reply",
    "reacted to your message",
    "reaccionó a tu mensaje",
    "le dio me gusta a tu mensaje",
    "liked your message",
    "le gustó tu mensaje",
];

/// Entirely emoji (plus whitespace) — covers the common emoji blocks,
/// variation selectors and ZWJ sequences.
static EMOJI_ONLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{1F900}-\u{1F9FF}\u{1FA00}-\u{1FA6F}\u{1FA70}-\u{1FAFF}\u{2702}-\u{27B0}\u{FE00}-\u{FE0F}\u{200D}\u{2600}-\u{26FF}\u{2764}]+\s*$",
    )
    .unwrap()
});

/// True when the message is a reaction, like, or story mention.
///
/// `content_type` / `message_type` come from the webhook payload; either may
/// be empty.
pub fn is_reaction_or_like(message: &str, content_type: &str, message_type: &str) -> bool {
    let content_type = content_type.to_lowercase();
    if REACTION_CONTENT_TYPES.contains(&content_type.as_str()) {
        return true;
    }

    let message_type = message_type.to_lowercase();
    if matches!(message_type.as_str(), "story_mention" | "story_reply" | "reaction") {
        return true;
    }

    let lower = message.to_lowercase();
    let lower = lower.trim();
    if REACTION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return true;
    }

    // 1-3 emojis with no other text is a reaction
    lower.chars().count() <= 12 && EMOJI_ONLY_RE.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_content_type() {
        assert!(is_reaction_or_like("👍", "ig_reaction", ""));
        assert!(is_reaction_or_like("whatever", "", "story_mention"));
    }

    #[test]
    fn detects_transport_phrasings() {
        assert!(is_reaction_or_like("Le dio Me gusta a tu mensaje", "", ""));
        assert!(is_reaction_or_like("Reacted to your message: ❤️", "", ""));
    }

    #[test]
    fn detects_bare_emoji() {
        assert!(is_reaction_or_like("❤️", "", ""));
        assert!(is_reaction_or_like(" 👍👍 ", "", ""));
    }

    #[test]
    fn real_messages_pass_through() {
        assert!(!is_reaction_or_like("Hola, me interesa la primaria 👍", "", ""));
        assert!(!is_reaction_or_like("Hola", "", ""));
    }
}
