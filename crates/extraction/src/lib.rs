//! Text classification and extraction
//!
//! Deterministic guardrail-side text analysis: everything here is a pure
//! function over immutable pattern tables, independently testable, with no
//! I/O and no model involvement.

pub mod contact;
pub mod history;
pub mod keywords;
pub mod lead_form;
pub mod reaction;

pub use contact::{extract_email, extract_phone};
pub use history::{audit_history, CompletenessAudit};
pub use keywords::{
    detect_admin_topic, detect_level_keyword, is_greeting_loop, is_human_request,
    is_website_source, mentions_inscription_intent, reply_marks_not_a_prospect,
};
pub use lead_form::{parse_lead_form, LeadFormData};
pub use reaction::is_reaction_or_like;
