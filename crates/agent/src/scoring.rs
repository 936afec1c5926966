//! Deterministic lead scoring
//!
//! Pure function over the lead state plus context signals; no model
//! involvement. The total maps to one of four non-overlapping tiers, and
//! exactly one tier tag may be active in the CRM at a time.

use std::time::Duration;

use admissions_agent_core::{Channel, LeadState};
use admissions_agent_extraction::lead_form::LeadFormData;
use admissions_agent_extraction::mentions_inscription_intent;

const CAMPUS_MENTIONED: u32 = 10;
const LEVEL_MENTIONED: u32 = 15;
const NAME_PROVIDED: u32 = 10;
const PHONE_PROVIDED: u32 = 15;
const EMAIL_PROVIDED: u32 = 15;
const FAST_RESPONSE: u32 = 10;
const LEAD_FORM_ORIGIN: u32 = 20;
const CHAT_CHANNEL: u32 = 5;
const INSCRIPTION_KEYWORDS: u32 = 20;
const LEAD_FORM_COMPLETE: u32 = 30;

/// A response under this is "fast" for scoring purposes.
const FAST_RESPONSE_LIMIT: Duration = Duration::from_secs(300);

/// Context signals for one scoring pass.
#[derive(Debug, Default)]
pub struct ScoreContext<'a> {
    pub message: &'a str,
    pub channel: Option<Channel>,
    pub is_lead_form: bool,
    pub lead_form: Option<&'a LeadFormData>,
    pub response_time: Option<Duration>,
}

/// Tier tags, cold to urgent.
pub const ALL_SCORE_TAGS: [&str; 4] =
    ["Lead Frio", "Lead Tibio", "Lead Caliente", "Lead Urgente"];

/// Sum the fixed weights for every present signal.
pub fn calculate_score(lead: &LeadState, ctx: &ScoreContext<'_>) -> u32 {
    let mut score = 0;

    if lead.campus.is_some() {
        score += CAMPUS_MENTIONED;
    }
    if lead.level.is_some() {
        score += LEVEL_MENTIONED;
    }
    if lead.guardian_name.is_some() {
        score += NAME_PROVIDED;
    }
    if lead.phone.is_some() {
        score += PHONE_PROVIDED;
    }
    if lead.email.is_some() {
        score += EMAIL_PROVIDED;
    }

    if matches!(ctx.channel, Some(c) if c.is_phone_based()) {
        score += CHAT_CHANNEL;
    }
    if matches!(ctx.response_time, Some(t) if t < FAST_RESPONSE_LIMIT) {
        score += FAST_RESPONSE;
    }

    if ctx.is_lead_form {
        score += LEAD_FORM_ORIGIN;
        if let Some(form) = ctx.lead_form {
            if form.core_fields_filled() >= 3 {
                score += LEAD_FORM_COMPLETE;
            }
        }
    }

    if !ctx.message.is_empty() && mentions_inscription_intent(ctx.message) {
        score += INSCRIPTION_KEYWORDS;
    }

    score
}

/// Tier tag for a score: 0–25 cold, 26–50 warm, 51–80 hot, 81+ urgent.
pub fn score_tag(score: u32) -> &'static str {
    match score {
        0..=25 => "Lead Frio",
        26..=50 => "Lead Tibio",
        51..=80 => "Lead Caliente",
        _ => "Lead Urgente",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_lead() -> LeadState {
        let mut lead = LeadState::new("c1", "loc1");
        lead.campus = Some("puebla".into());
        lead.level = Some("Primaria".into());
        lead.guardian_name = Some("Ana López".into());
        lead.phone = Some("2221234567".into());
        lead.email = Some("ana@example.com".into());
        lead.recompute_progress();
        lead
    }

    #[test]
    fn empty_lead_scores_zero() {
        let lead = LeadState::new("c1", "loc1");
        assert_eq!(calculate_score(&lead, &ScoreContext::default()), 0);
        assert_eq!(score_tag(0), "Lead Frio");
    }

    #[test]
    fn field_weights_accumulate() {
        let lead = full_lead();
        // 10 + 15 + 10 + 15 + 15
        assert_eq!(calculate_score(&lead, &ScoreContext::default()), 65);
        assert_eq!(score_tag(65), "Lead Caliente");
    }

    #[test]
    fn context_signals_add_up_to_urgent() {
        let lead = full_lead();
        let form = LeadFormData {
            full_name: "Ana López".into(),
            phone: "2221234567".into(),
            email: "ana@example.com".into(),
            campus: "Puebla".into(),
            ..Default::default()
        };
        let ctx = ScoreContext {
            message: "quiero inscribir a mi hijo este ciclo escolar",
            channel: Some(Channel::WhatsApp),
            is_lead_form: true,
            lead_form: Some(&form),
            response_time: Some(Duration::from_secs(60)),
        };
        // 65 + 5 + 10 + 20 + 30 + 20
        assert_eq!(calculate_score(&lead, &ctx), 150);
        assert_eq!(score_tag(150), "Lead Urgente");
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(score_tag(25), "Lead Frio");
        assert_eq!(score_tag(26), "Lead Tibio");
        assert_eq!(score_tag(50), "Lead Tibio");
        assert_eq!(score_tag(51), "Lead Caliente");
        assert_eq!(score_tag(80), "Lead Caliente");
        assert_eq!(score_tag(81), "Lead Urgente");
    }

    #[test]
    fn incomplete_lead_form_gets_origin_bonus_only() {
        let lead = LeadState::new("c1", "loc1");
        let form = LeadFormData { full_name: "Ana".into(), ..Default::default() };
        let ctx = ScoreContext {
            is_lead_form: true,
            lead_form: Some(&form),
            ..Default::default()
        };
        assert_eq!(calculate_score(&lead, &ctx), LEAD_FORM_ORIGIN);
    }
}
