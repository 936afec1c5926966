//! History completeness audit
//!
//! Scans everything the USER has said across a conversation and reports
//! which of the five intake fields can already be recovered
//! deterministically. Used by the loop-handoff branches to decide between a
//! booking offer and a plain handoff.

use admissions_agent_config::LocationRegistry;
use admissions_agent_core::Turn;

use crate::contact::{extract_email, extract_phone};
use crate::keywords::detect_level_keyword;

/// What the accumulated user text already contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletenessAudit {
    pub complete: bool,
    pub has_campus: bool,
    /// Normalized campus id when one was mentioned
    pub detected_campus: Option<String>,
    pub has_level: bool,
    pub has_name: bool,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CompletenessAudit {
    pub fn has_partial_data(&self) -> bool {
        self.has_campus || self.has_level
    }
}

/// Audit user turns (plus the transport-provided display name) for the five
/// intake fields.
pub fn audit_history(
    turns: &[Turn],
    guardian_name: Option<&str>,
    registry: &LocationRegistry,
) -> CompletenessAudit {
    let user_text = turns
        .iter()
        .filter(|t| t.is_user())
        .map(|t| t.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let detected_campus = registry
        .detect_in_text(&user_text)
        .map(|loc| loc.normalized.clone());

    let has_level = detect_level_keyword(&user_text).is_some();

    // A usable guardian name needs at least two words
    let has_name = guardian_name
        .map(|n| n.trim().split_whitespace().count() >= 2)
        .unwrap_or(false);

    let phone = extract_phone(&user_text);
    let email = extract_email(&user_text);

    CompletenessAudit {
        complete: detected_campus.is_some()
            && has_level
            && has_name
            && phone.is_some()
            && email.is_some(),
        has_campus: detected_campus.is_some(),
        detected_campus,
        has_level,
        has_name,
        phone,
        email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(user_msgs: &[&str]) -> Vec<Turn> {
        user_msgs.iter().map(|m| Turn::user(*m)).collect()
    }

    #[test]
    fn audits_fields_across_turns() {
        let registry = LocationRegistry::default();
        let history = turns(&[
            "Hola, me interesa el plantel Puebla",
            "para secundaria",
            "mi teléfono es 2221234567 y mi correo ana@example.com",
        ]);

        let audit = audit_history(&history, Some("Ana López"), &registry);
        assert!(audit.complete);
        assert_eq!(audit.detected_campus.as_deref(), Some("puebla"));
        assert_eq!(audit.phone.as_deref(), Some("2221234567"));
    }

    #[test]
    fn single_word_name_does_not_count() {
        let registry = LocationRegistry::default();
        let history = turns(&["primaria en coatza"]);
        let audit = audit_history(&history, Some("Ana"), &registry);
        assert!(!audit.has_name);
        assert!(audit.has_partial_data());
        assert!(!audit.complete);
    }

    #[test]
    fn assistant_turns_are_ignored() {
        let registry = LocationRegistry::default();
        let mut history = turns(&["Hola"]);
        history.push(Turn::assistant("¿Te interesa el plantel Puebla?"));
        let audit = audit_history(&history, None, &registry);
        assert!(!audit.has_campus);
    }
}
