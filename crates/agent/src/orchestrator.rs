//! Per-message orchestration pipeline
//!
//! One execution per inbound message, short-circuiting at the first matching
//! condition: durability first, then human-takeover and handoff stickiness,
//! the administrative filter, pre-capture, loop guards, the safety nets, the
//! dialogue machine itself, and finally persistence, scoring, transfer,
//! booking-link resolution, and dispatch.
//!
//! Failure policy: every external call is isolated. A collaborator failure
//! logs and degrades to a safe default; the pipeline always returns a
//! structured outcome.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use admissions_agent_config::LocationRegistry;
use admissions_agent_core::{
    Advisor, AdvisorDirectory, CapturedFields, Channel, ConversationStore, CrmApi, LeadState,
    LeadStateStore, Message, Role, StructuredReply, Turn,
};
use admissions_agent_extraction::contact::normalize_phone_last10;
use admissions_agent_extraction::lead_form::LeadFormData;
use admissions_agent_extraction::{
    audit_history, detect_admin_topic, extract_email, extract_phone, is_greeting_loop,
    is_human_request, is_website_source,
};

use crate::loop_detector::{detect_history_loop, detect_loop};
use crate::machine::DialogueMachine;
use crate::sanitize::{preview, validate_and_clean};
use crate::scoring::{calculate_score, score_tag, ScoreContext, ALL_SCORE_TAGS};
use crate::state::AgentState;

/// Outbound messages from a human are sticky only after this grace window;
/// younger unrecognized outbounds are assumed to be our own racing writes.
const TAKEOVER_GRACE_SECONDS: i64 = 90;

/// A handoff reply keeps the bot silent for this long.
const HANDOFF_EXPIRY_MINUTES: i64 = 30;

const HISTORY_LIMIT: usize = 20;
const TRANSFER_HISTORY_LIMIT: usize = 50;

/// Booking-link host; any URL under it counts as a sent booking link.
const BOOKING_LINK_HOST: &str = "agenda.leadlink.mx/widget/booking";

static BOOKING_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://agenda\.leadlink\.mx/widget/booking/\S+").unwrap());

/// Assistant phrases that mark a handoff state.
const HANDOFF_MESSAGES: &[&str] = &[
    "Un asesor especializado atenderá",
    "Para dudas sobre trámites escolares",
    "Para que un asesor experto te ayude mejor, agenda tu cita",
    "¡Pronto te contactarán!",
    "un asesor especializado se pondrá en contacto",
    "Un asesor te contactará pronto para cualquier duda adicional",
];

/// CRM-generated outbound bodies that are not human interventions.
const IGNORED_SYSTEM_PREFIXES: &[&str] = &[
    "Opportunity",
    "Stage",
    "Appointment",
    "Tag",
    "Note",
    "Call",
    "Voicemail",
    "Manual Action",
    "Workflow",
    "Invoice",
    "Payment",
    "Task",
    "Moved from",
    "moved from",
    "✨",
    "Bienvenido",
    "bienvenido",
    "Para brindarte",
    "para brindarte",
    "👋 ¡Gracias por tu interés",
];

/// Our own outbound signatures (race: sent but not yet persisted).
const BOT_SIGNATURES: &[&str] = &["🦉", "Soy Emma", "{BOOKING_LINK}"];

/// Single strong marker is enough to classify a workflow blast.
const STRONG_WORKFLOW_PATTERNS: &[&str] = &["wa.me/"];

/// Two or more weak markers classify a workflow blast.
const WEAK_WORKFLOW_PATTERNS: &[&str] = &[
    "Colegio Monteverde",
    "comunidad Monteverde",
    "plantel de tu interés",
    "atención personalizada",
    "Agenda tu cita",
];

const LEAD_FORM_PATTERNS: &[&str] = &[
    "Completé el formulario",
    "Source URL:",
    "Headline:",
    "first_name:",
    "last_name:",
    "phone_number:",
    "email:",
    "elige_tu_campus",
];

/// Normalized inbound message handed over by the webhook layer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub contact_id: String,
    pub full_name: String,
    pub phone: String,
    pub location_id: String,
    pub message: String,
    pub conversation_id: Option<String>,
    pub source: String,
    pub channel: Channel,
    pub direction: String,
    pub is_lead_form: bool,
    pub lead_form: Option<LeadFormData>,
}

/// Structured pipeline outcome; always returned, even on late failures.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PipelineOutcome {
    Ignored { reason: String },
    Error { message: String },
    Success { processed_data: ProcessedData },
}

impl PipelineOutcome {
    fn ignored(reason: &str) -> Self {
        Self::Ignored { reason: reason.to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessedData {
    pub contact_id: String,
    pub full_name: String,
    pub message: String,
    pub conversation_id: Option<String>,
    pub source: String,
    pub direction: String,
    pub ai_response: Option<String>,
    pub safety_net: bool,
    pub recovery: bool,
}

/// Composes the dialogue machine with the persisted lead state and the
/// external collaborators. Handles are injected once at construction.
pub struct ConversationOrchestrator {
    crm: Arc<dyn CrmApi>,
    conversations: Arc<dyn ConversationStore>,
    lead_states: Arc<dyn LeadStateStore>,
    advisors: Arc<dyn AdvisorDirectory>,
    registry: Arc<LocationRegistry>,
    machine: DialogueMachine,
}

impl ConversationOrchestrator {
    pub fn new(
        crm: Arc<dyn CrmApi>,
        conversations: Arc<dyn ConversationStore>,
        lead_states: Arc<dyn LeadStateStore>,
        advisors: Arc<dyn AdvisorDirectory>,
        registry: Arc<LocationRegistry>,
        machine: DialogueMachine,
    ) -> Self {
        Self { crm, conversations, lead_states, advisors, registry, machine }
    }

    /// Full pipeline for one inbound message.
    pub async fn process(&self, inbound: InboundMessage) -> PipelineOutcome {
        let mut contact_id = inbound.contact_id.clone();
        let mut location_id = inbound.location_id.clone();
        let channel = inbound.channel;

        if inbound.message.is_empty() || contact_id.is_empty() {
            tracing::error!("Missing essential fields (message or contact id)");
            return PipelineOutcome::Error {
                message: "Missing required fields: message or contact_id".to_string(),
            };
        }

        // Recover a missing transport conversation handle
        let mut conversation_id = inbound.conversation_id.clone().filter(|c| !c.is_empty());
        if conversation_id.is_none() {
            tracing::warn!(contact_id = %contact_id, "Empty conversation id, searching CRM");
            conversation_id = self
                .crm
                .find_conversation_id(&contact_id, &location_id)
                .await
                .unwrap_or_default();
        }

        // Durability precedes further processing
        let conv_db_id = self
            .conversations
            .get_or_create_conversation(&contact_id, &location_id, &inbound.source)
            .await
            .map_err(|e| tracing::error!(error = %e, "Failed to open conversation row"))
            .ok();
        if let Some(conv_id) = conv_db_id {
            let _ = self
                .conversations
                .append_turn(conv_id, &Turn::user(&inbound.message))
                .await
                .map_err(|e| tracing::error!(error = %e, "Failed to persist inbound turn"));
        }

        tracing::info!(
            contact_id = %contact_id,
            channel = channel.as_str(),
            preview = %preview(&inbound.message, 80),
            "Inbound message"
        );

        let history = self
            .conversations
            .history(&contact_id, HISTORY_LIMIT)
            .await
            .unwrap_or_default();

        if let Some(outcome) = self
            .check_human_takeover(&contact_id, conversation_id.as_deref(), &location_id)
            .await
        {
            return outcome;
        }

        if let Some(outcome) = self.check_handoff_persistence(&history) {
            return outcome;
        }

        // Administrative topics never reach the model
        if let Some(keyword) = detect_admin_topic(&inbound.message) {
            tracing::info!(keyword, "Administrative topic detected");
            let redirect = "Para dudas sobre trámites escolares, boletas o certificados, por favor contacta directamente a tu plantel.";
            self.send_plain(&contact_id, redirect, channel, conversation_id.as_deref(), &location_id)
                .await;
            self.add_tag(&contact_id, "Necesita Humano", &location_id).await;
            self.add_tag(&contact_id, "Tema Administrativo", &location_id).await;
            self.persist_assistant(conv_db_id, redirect, Some("admin_handoff")).await;
            return PipelineOutcome::ignored("admin_topic_handoff");
        }

        let mut lead_state = self
            .lead_states
            .get_or_create(&contact_id, &location_id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Lead state unavailable, using empty");
                LeadState::new(contact_id.clone(), location_id.clone())
            });
        tracing::info!(
            step = lead_state.current_step,
            complete = lead_state.is_complete,
            "Lead state loaded"
        );

        // Pre-capturable fields before model invocation
        let pre_captured = self.pre_captured_fields(&inbound);
        if !pre_captured.is_empty() {
            match self.lead_states.merge(&contact_id, &pre_captured).await {
                Ok(updated) => lead_state = updated,
                Err(e) => tracing::warn!(error = %e, "Pre-capture merge failed"),
            }
        }

        if is_website_source(&inbound.message) {
            tracing::info!("Website source detected");
            self.add_tag(&contact_id, "Sitio Web", &location_id).await;
        }

        // Pre-model loop check
        if detect_history_loop(&history) {
            return self
                .handle_pre_model_loop(&inbound, &contact_id, &location_id, conversation_id.as_deref(), &history, conv_db_id)
                .await;
        }

        // Post-booking resolution
        let booking_state = self.booking_state_with_history(&contact_id, &history).await;
        let mut post_booking_mode = false;
        if booking_state.sent {
            if inbound.is_lead_form {
                tracing::info!("Lead form after booking, processing anyway");
            } else if booking_state.post_booking_count >= 1 {
                tracing::info!("Post-booking reply limit reached, permanent human handoff");
                let handoff = "Un asesor te contactará pronto para cualquier duda adicional. ¡Nos vemos pronto! 🦉";
                self.send_plain(&contact_id, handoff, channel, conversation_id.as_deref(), &location_id)
                    .await;
                self.add_tag(&contact_id, "Lead con cita pendiente", &location_id).await;
                self.persist_assistant(conv_db_id, handoff, Some("post_booking_handoff")).await;
                let _ = self
                    .conversations
                    .set_human_active(&contact_id, true)
                    .await
                    .map_err(|e| tracing::error!(error = %e, "Failed to persist human flag"));
                return PipelineOutcome::Success {
                    processed_data: ProcessedData {
                        contact_id,
                        ai_response: Some(handoff.to_string()),
                        ..self.base_processed(&inbound)
                    },
                };
            } else {
                tracing::info!(count = booking_state.post_booking_count, "Post-booking mode");
                post_booking_mode = true;
            }
        }

        let campus_context = self.registry.campus_name(&location_id).to_string();
        tracing::info!(campus = %campus_context, "Campus context resolved");

        // Safety net A: explicit human request bypasses the model
        if is_human_request(&inbound.message) {
            tracing::info!(message = %preview(&inbound.message, 50), "Safety net: human requested");
            let link = self.next_advisor_link(&location_id).await;
            let text = format!(
                "¡Entendido {}! Para que un asesor experto te atienda personalmente, por favor agenda tu cita aquí: {} 🦉",
                display_name(&inbound.full_name),
                link,
            );
            self.persist_assistant(conv_db_id, &text, None).await;
            self.send_validated(&contact_id, &text, channel, conversation_id.as_deref(), &location_id, &inbound.phone, &history)
                .await;
            return PipelineOutcome::Success {
                processed_data: ProcessedData {
                    contact_id,
                    ai_response: Some(text),
                    safety_net: true,
                    ..self.base_processed(&inbound)
                },
            };
        }

        // Safety net B: message (or lead form) already carries phone + email
        let (incoming_phone, incoming_email) = self.complete_contact_data(&inbound);
        if let (Some(phone), Some(email)) = (incoming_phone.clone(), incoming_email.clone()) {
            tracing::info!(phone = %phone, email = %email, "Safety net: complete data in message");
            let link = self.next_advisor_link(&location_id).await;
            let text = format!(
                "¡Excelente {}! 🦉 Ya tengo todos tus datos. Un asesor te dará toda la información personalizada en tu cita, agenda aquí: {}",
                display_name(&inbound.full_name),
                link,
            );
            self.send_plain(&contact_id, &text, channel, conversation_id.as_deref(), &location_id)
                .await;
            self.persist_assistant(conv_db_id, &text, None).await;

            let mut fields = HashMap::new();
            fields.insert("phone".to_string(), phone.clone());
            fields.insert("email".to_string(), email.clone());
            if inbound.is_lead_form {
                if let Some(form) = &inbound.lead_form {
                    if !form.full_name.is_empty() {
                        fields.insert("name".to_string(), form.full_name.clone());
                        fields.insert("firstName".to_string(), form.first_name.clone());
                        fields.insert("lastName".to_string(), form.last_name.clone());
                    }
                }
            }
            if let Err(e) = self.crm.update_contact_fields(&contact_id, &fields, &location_id).await {
                tracing::warn!(error = %e, "CRM field update failed");
            }

            // The lead state also learns the contact data (monotonic)
            let captured = CapturedFields {
                phone: Some(phone),
                email: Some(email),
                ..Default::default()
            };
            let _ = self.lead_states.merge(&contact_id, &captured).await;

            return PipelineOutcome::Success {
                processed_data: ProcessedData {
                    contact_id,
                    ai_response: Some(text),
                    safety_net: true,
                    ..self.base_processed(&inbound)
                },
            };
        }

        // Dialogue state machine over the fused history
        let messages = self.build_messages(&history, &inbound);
        let mut agent_state = AgentState::new(
            messages,
            contact_id.clone(),
            display_name(&inbound.full_name),
            campus_context.clone(),
            location_id.clone(),
            Some(lead_state.clone()),
            post_booking_mode,
        );
        let reply = self.machine.run(&mut agent_state).await;
        let raw_reply_text = agent_state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        tracing::info!(reply = %preview(&reply.message, 120), relevant = reply.is_relevant, "Model reply formatted");

        // Post-model loop check, skipped on forward progress
        let is_progressing = incoming_phone.is_some()
            || incoming_email.is_some()
            || reply.captured.phone.is_some()
            || reply.captured.email.is_some();
        if !is_progressing && detect_loop(&history, &reply.message) {
            return self
                .handle_post_model_loop(&inbound, &contact_id, &location_id, conversation_id.as_deref(), &reply, &history, conv_db_id)
                .await;
        }

        // Persist captured fields to CRM and lead state
        if !reply.captured.is_empty() {
            let mut fields = HashMap::new();
            if let Some(phone) = &reply.captured.phone {
                fields.insert("phone".to_string(), phone.clone());
            }
            if let Some(email) = &reply.captured.email {
                fields.insert("email".to_string(), email.clone());
            }
            if !fields.is_empty() {
                if let Err(e) = self.crm.update_contact_fields(&contact_id, &fields, &location_id).await {
                    tracing::warn!(error = %e, "CRM captured-field update failed");
                }
            }
        }

        let mut captured = reply.captured.clone();
        if !reply.detected_campus.is_empty() {
            captured.campus = Some(reply.detected_campus.clone());
        }
        if !captured.is_empty() {
            match self.lead_states.merge(&contact_id, &captured).await {
                Ok(updated) => lead_state = updated,
                Err(e) => tracing::warn!(error = %e, "Lead state merge failed"),
            }
        }

        // Booking marker and post-booking counter
        let mut reply_text = reply.message.clone();
        if raw_reply_text.contains("{BOOKING_LINK}") || reply_text.contains(BOOKING_LINK_HOST) {
            let _ = self.lead_states.mark_booking_sent(&contact_id).await;
        }
        if post_booking_mode {
            let _ = self.lead_states.increment_post_booking(&contact_id).await;
        }

        // Deterministic scoring, one tier tag active at a time
        let score = calculate_score(
            &lead_state,
            &ScoreContext {
                message: &inbound.message,
                channel: Some(channel),
                is_lead_form: inbound.is_lead_form,
                lead_form: inbound.lead_form.as_ref(),
                response_time: None,
            },
        );
        if let Err(e) = self.lead_states.update_score(&contact_id, score).await {
            tracing::warn!(error = %e, "Score persist failed");
        }
        tracing::info!(score, tag = score_tag(score), "Lead scored");

        // Campus transfer when the detected campus differs from the current one
        if !reply.detected_campus.is_empty() {
            if let Some((new_contact, new_location)) = self
                .handle_campus_transfer(&inbound, &contact_id, &location_id, conversation_id.as_deref(), &reply.detected_campus, &history)
                .await
            {
                contact_id = new_contact;
                location_id = new_location;
            }
        }

        // Booking-link placeholder resolution
        reply_text = self
            .inject_booking_link(&reply_text, &contact_id, &location_id, &reply.detected_campus, &inbound.full_name, &history)
            .await;

        // Dispatch
        let has_booking_link = reply_text.contains("http") || reply_text.contains("Agenda tu cita");
        let mut final_text = reply_text.clone();
        if reply.is_relevant || has_booking_link || inbound.is_lead_form {
            if inbound.is_lead_form && !reply.is_relevant {
                tracing::warn!("Forcing dispatch: lead forms are always prospects");
            } else if !reply.is_relevant && has_booking_link {
                tracing::warn!("Forcing dispatch: reply carries a booking link");
            }

            let sent = self
                .send_validated(&contact_id, &reply_text, channel, conversation_id.as_deref(), &location_id, &inbound.phone, &history)
                .await;
            if sent.is_none() {
                tracing::warn!("Reply blocked by outbound validation, sending fallback");
                let fallback = "¡Gracias por tu interés! ¿Podrías repetirme tu consulta para ayudarte mejor? 🦉";
                self.send_validated(&contact_id, fallback, channel, conversation_id.as_deref(), &location_id, &inbound.phone, &history)
                    .await;
                final_text = fallback.to_string();
            }

            self.update_relevance_tags(&contact_id, true, &location_id).await;
            self.update_scoring_tags(&contact_id, score, &location_id).await;

            let conv_id = self
                .conversations
                .get_or_create_conversation(&contact_id, &location_id, &inbound.source)
                .await
                .ok();
            self.persist_assistant(conv_id, &final_text, None).await;
        } else {
            tracing::info!("Not a prospect: sending warm redirect");
            self.send_validated(&contact_id, &reply_text, channel, conversation_id.as_deref(), &location_id, &inbound.phone, &history)
                .await;
            self.update_relevance_tags(&contact_id, false, &location_id).await;
            self.add_tag(&contact_id, "No Prospecto", &location_id).await;
            let conv_id = self
                .conversations
                .get_or_create_conversation(&contact_id, &location_id, &inbound.source)
                .await
                .ok();
            self.persist_assistant(conv_id, &final_text, Some("not_relevant_redirect")).await;
        }

        PipelineOutcome::Success {
            processed_data: ProcessedData {
                contact_id,
                ai_response: Some(final_text),
                ..self.base_processed(&inbound)
            },
        }
    }

    // --- short-circuit checks ---

    /// Human takeover: the persisted flag first (fail closed on read errors),
    /// then inference from transport history.
    async fn check_human_takeover(
        &self,
        contact_id: &str,
        conversation_id: Option<&str>,
        location_id: &str,
    ) -> Option<PipelineOutcome> {
        match self.conversations.human_active(contact_id).await {
            Ok(true) => {
                tracing::info!("Human takeover flag active, bot silenced");
                return Some(PipelineOutcome::ignored("human_agent_active"));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Cannot verify human flag, silencing as a precaution");
                return Some(PipelineOutcome::ignored("human_check_error"));
            }
        }

        let Some(conversation_id) = conversation_id else {
            tracing::warn!("No conversation id, skipping transport takeover inference");
            return None;
        };

        let mut messages = match self.crm.recent_messages(conversation_id, location_id, 20).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "Transport history unavailable");
                return None;
            }
        };
        messages.sort_by(|a, b| b.date_added.cmp(&a.date_added));

        let last_outbound = messages.iter().find(|m| {
            m.is_outbound()
                && !IGNORED_SYSTEM_PREFIXES
                    .iter()
                    .any(|p| m.body.trim().starts_with(p))
        })?;
        let body = last_outbound.body.trim().to_string();

        let is_bot_message = self
            .conversations
            .assistant_turn_exists(contact_id, &body)
            .await
            .unwrap_or(false);
        if is_bot_message {
            tracing::info!("Last outbound was the bot (validated), continuing");
            return None;
        }

        if BOT_SIGNATURES.iter().any(|sig| body.contains(sig)) {
            tracing::info!(body = %preview(&body, 80), "Outbound carries bot signature, race assumed");
            return None;
        }
        let strong_hit = STRONG_WORKFLOW_PATTERNS.iter().any(|p| body.contains(p))
            || self.registry.all().iter().any(|loc| body.contains(&format!("📍 {}", loc.name)));
        if strong_hit {
            tracing::warn!(body = %preview(&body, 80), "Workflow blast (strong pattern), ignoring");
            return None;
        }
        if WEAK_WORKFLOW_PATTERNS.iter().filter(|p| body.contains(*p)).count() >= 2 {
            tracing::warn!(body = %preview(&body, 80), "Workflow blast (2+ weak patterns), ignoring");
            return None;
        }
        if LEAD_FORM_PATTERNS.iter().any(|p| body.contains(p)) {
            tracing::warn!(body = %preview(&body, 80), "Lead form echo filtered");
            return None;
        }

        let age = Utc::now() - last_outbound.date_added;
        if age.num_seconds() < TAKEOVER_GRACE_SECONDS {
            tracing::info!(
                age_secs = age.num_seconds(),
                "Recent unverified outbound inside grace window"
            );
            return None;
        }

        tracing::info!(
            body = %preview(&body, 80),
            age_hours = age.num_seconds() / 3600,
            "Human intervention detected"
        );
        let mut flag_saved = false;
        for attempt in 0..2 {
            if self.conversations.set_human_active(contact_id, true).await.is_ok() {
                flag_saved = true;
                break;
            }
            tracing::warn!(attempt = attempt + 1, "set_human_active failed, retrying");
        }
        if !flag_saved {
            tracing::error!(contact_id = %contact_id, "Could not persist human-active flag");
        }

        Some(PipelineOutcome::ignored("human_agent_active"))
    }

    /// Sticky handoff: a recent handoff reply keeps the bot silent.
    fn check_handoff_persistence(&self, history: &[Turn]) -> Option<PipelineOutcome> {
        let last_assistant = history.iter().rev().find(|t| t.is_assistant())?;
        let is_handoff = HANDOFF_MESSAGES
            .iter()
            .any(|phrase| last_assistant.content.contains(phrase));
        if !is_handoff {
            return None;
        }

        let age = Utc::now() - last_assistant.created_at;
        if age.num_minutes() > HANDOFF_EXPIRY_MINUTES {
            tracing::warn!(age_min = age.num_minutes(), "Handoff expired, reactivating bot");
            return None;
        }

        tracing::info!("Conversation in active handoff state, ignoring");
        Some(PipelineOutcome::ignored("handoff_persistence"))
    }

    // --- loop branches ---

    async fn handle_pre_model_loop(
        &self,
        inbound: &InboundMessage,
        contact_id: &str,
        location_id: &str,
        conversation_id: Option<&str>,
        history: &[Turn],
        conv_db_id: Option<uuid::Uuid>,
    ) -> PipelineOutcome {
        let audit = audit_history(history, Some(&inbound.full_name), &self.registry);
        let handoff_channel = Channel::from_source(&inbound.source);

        let message = if audit.has_partial_data() {
            tracing::info!("Loop with partial data: offering booking link + handoff");
            // Prefer the campus the user actually talked about
            let advisor_location = history
                .iter()
                .map(|t| t.content.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            let advisor_location_id = self
                .registry
                .detect_in_text(&advisor_location)
                .map(|loc| loc.location_id.clone())
                .unwrap_or_else(|| location_id.to_string());

            let link = self.next_advisor_link(&advisor_location_id).await;
            format!(
                "¡Gracias {} por tu interés! 🦉 Para que un asesor experto te ayude mejor, agenda tu cita aquí: {}",
                display_name(&inbound.full_name),
                link,
            )
        } else {
            tracing::info!("Loop without data: plain handoff");
            "Un asesor especializado atenderá tus dudas mejor. ¡Pronto te contactarán! 🦉".to_string()
        };

        self.send_plain(contact_id, &message, handoff_channel, conversation_id, location_id)
            .await;
        self.add_tag(contact_id, "Necesita Humano", location_id).await;
        self.persist_assistant(conv_db_id, &message, Some("loop_handoff")).await;

        PipelineOutcome::ignored("loop_detected_handoff")
    }

    async fn handle_post_model_loop(
        &self,
        inbound: &InboundMessage,
        contact_id: &str,
        location_id: &str,
        conversation_id: Option<&str>,
        reply: &StructuredReply,
        history: &[Turn],
        conv_db_id: Option<uuid::Uuid>,
    ) -> PipelineOutcome {
        tracing::info!("Proactive loop prevention: blocking repetitive reply");

        // A stuck greeting recovers into a targeted clarifying question
        if is_greeting_loop(&reply.message) {
            tracing::info!("Greeting loop recovery: forcing level question");
            let fallback = "¡Excelente! ¿Podrías confirmarme qué nivel educativo te interesa para tu hijo/a?";
            self.persist_assistant(conv_db_id, fallback, None).await;
            self.send_plain(contact_id, fallback, inbound.channel, conversation_id, location_id)
                .await;
            return PipelineOutcome::Success {
                processed_data: ProcessedData {
                    contact_id: contact_id.to_string(),
                    ai_response: Some(fallback.to_string()),
                    recovery: true,
                    ..self.base_processed(inbound)
                },
            };
        }

        let audit = audit_history(history, Some(&inbound.full_name), &self.registry);
        let message = if audit.has_partial_data() {
            let link = self.next_advisor_link(location_id).await;
            format!(
                "Entiendo, para brindarte una mejor atención, un asesor experto te ayudará personalmente. Agenda tu cita aquí: {} 🦉",
                link,
            )
        } else {
            "Entiendo, para brindarte una mejor atención, un asesor especializado se pondrá en contacto contigo muy pronto. 🦉".to_string()
        };

        self.send_plain(contact_id, &message, inbound.channel, conversation_id, location_id)
            .await;
        self.add_tag(contact_id, "Necesita Humano", location_id).await;
        self.persist_assistant(conv_db_id, &message, Some("loop_handoff")).await;

        PipelineOutcome::ignored("proactive_loop_prevention")
    }

    // --- campus transfer ---

    /// Recreate the contact under the target location, migrate the local
    /// conversation record, and forward the transcript with provenance.
    async fn handle_campus_transfer(
        &self,
        inbound: &InboundMessage,
        contact_id: &str,
        location_id: &str,
        conversation_id: Option<&str>,
        detected_campus: &str,
        _history: &[Turn],
    ) -> Option<(String, String)> {
        tracing::info!(campus = %detected_campus, "Campus detected in reply");
        let target_location = self.registry.location_id_for(detected_campus)?.to_string();
        if target_location == location_id {
            return None;
        }

        tracing::info!(from = %location_id, to = %target_location, "Campus transfer required");

        let mut transfer_history = self
            .conversations
            .history(contact_id, TRANSFER_HISTORY_LIMIT)
            .await
            .unwrap_or_default();
        transfer_history.push(Turn::user(&inbound.message));

        let original_contact = self
            .crm
            .get_contact(contact_id, location_id)
            .await
            .unwrap_or_default();

        let transfer_channel = Channel::from_source(&inbound.source);
        self.send_plain(
            contact_id,
            "Estás siendo transferido a otro plantel, un asesor de ese plantel te contactará 🦉",
            transfer_channel,
            conversation_id,
            location_id,
        )
        .await;

        let contact = original_contact.clone().unwrap_or_default();
        let fallback_name =
            (!inbound.full_name.is_empty()).then_some(inbound.full_name.as_str());
        let new_contact_id = match self
            .crm
            .create_contact(
                &target_location,
                contact.name.as_deref().or(fallback_name),
                contact.phone.as_deref(),
                contact.email.as_deref(),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Transfer aborted: target contact creation failed");
                return None;
            }
        };
        if let Err(e) = self.crm.delete_contact(contact_id, location_id).await {
            tracing::warn!(error = %e, "Source contact deletion failed after transfer");
        }

        let _ = self
            .conversations
            .migrate_conversation(contact_id, &new_contact_id, &target_location)
            .await
            .map_err(|e| tracing::warn!(error = %e, "Conversation migration failed"));

        // Forward the transcript: chat channels get a message, social
        // channels get a provenance note
        let mut summary = String::from("📋 HISTORIAL DE CONVERSACIÓN TRANSFERIDO:\n\n");
        for turn in &transfer_history {
            let (emoji, label) = match turn.role {
                admissions_agent_core::TurnRole::User => ("👤", "Usuario"),
                admissions_agent_core::TurnRole::Assistant => ("🤖", "Emma"),
            };
            let content: String = turn.content.chars().take(500).collect();
            summary.push_str(&format!("{} {}: {}\n\n", emoji, label, content));
        }
        summary.push_str("─────────────────────────\n⬆️ Historial anterior del prospecto");

        if transfer_channel == Channel::WhatsApp {
            let new_conversation_id = self
                .crm
                .find_conversation_id(&new_contact_id, &target_location)
                .await
                .unwrap_or_default();
            self.send_plain(
                &new_contact_id,
                &summary,
                transfer_channel,
                new_conversation_id.as_deref(),
                &target_location,
            )
            .await;
        } else {
            let origin_campus = self.registry.campus_name(location_id);
            let channel_display = match transfer_channel {
                Channel::Instagram => "Instagram",
                Channel::Facebook => "Facebook Messenger",
                other => other.as_str(),
            };
            let profile = original_contact
                .as_ref()
                .and_then(|c| c.profile_handle.clone().or_else(|| c.name.clone()))
                .unwrap_or_else(|| inbound.full_name.clone());

            let mut note = format!(
                "🔔 PROSPECTO TRANSFERIDO DESDE {}\n📱 Canal de origen: {}\n",
                origin_campus.to_uppercase(),
                channel_display,
            );
            if !profile.is_empty() {
                note.push_str(&format!("👤 Usuario/Perfil: {}\n", profile));
            }
            note.push_str(&format!(
                "⚠️ IMPORTANTE: El contacto fue originado por {}.\n   → Contactar por teléfono/email, o esperar que reinicie conversación.\n\n",
                channel_display,
            ));
            note.push_str("─────────────────────────\n");
            note.push_str(&summary);

            if let Err(e) = self.crm.add_note(&new_contact_id, &note, &target_location).await {
                tracing::warn!(error = %e, "Transfer note failed");
            }
            let mut fields = HashMap::new();
            fields.insert("notas".to_string(), note);
            let _ = self.crm.update_contact_fields(&new_contact_id, &fields, &target_location).await;
        }

        tracing::info!(new_contact = %new_contact_id, "Transfer completed");
        Some((new_contact_id, target_location))
    }

    // --- booking link resolution ---

    /// Resolve the `{BOOKING_LINK}` placeholder: a link already sent in this
    /// conversation wins, then the CRM-assigned advisor, then round robin for
    /// the resolved location, then the fixed fallback.
    async fn inject_booking_link(
        &self,
        text: &str,
        contact_id: &str,
        location_id: &str,
        detected_campus: &str,
        full_name: &str,
        history: &[Turn],
    ) -> String {
        let mut text = text.to_string();

        // The model sometimes forgets the link even with a complete intake
        if !text.contains("{BOOKING_LINK}") {
            let audit = audit_history(history, Some(full_name), &self.registry);
            if audit.complete {
                tracing::warn!("Complete intake without booking link, forcing completion message");
                text = format!(
                    "¡Gracias {}! 🦉 Para formar parte de la comunidad Monteverde, agenda tu cita con un asesor aquí: {{BOOKING_LINK}}",
                    display_name(full_name),
                );
            }
        }
        if !text.contains("{BOOKING_LINK}") {
            return text;
        }

        // Reuse a link already sent in this conversation
        for turn in history.iter().rev().filter(|t| t.is_assistant()) {
            if let Some(m) = BOOKING_URL_RE.find(&turn.content) {
                tracing::info!(link = m.as_str(), "Booking link reused from history");
                return text.replace("{BOOKING_LINK}", m.as_str());
            }
        }

        // CRM-assigned advisor first
        let mut advisor: Option<Advisor> = None;
        match self.crm.get_contact(contact_id, location_id).await {
            Ok(Some(contact)) => {
                if let Some(assigned) = contact.assigned_to {
                    tracing::info!(user = %assigned, "Lead has an assigned CRM seat");
                    advisor = self.advisors.advisor_by_crm_user(&assigned).await.unwrap_or_default();
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "assignedTo lookup failed"),
        }

        // Round robin for the campus the conversation resolved to
        if advisor.is_none() {
            let advisor_location = if detected_campus.is_empty() {
                location_id.to_string()
            } else {
                self.registry
                    .location_id_for(detected_campus)
                    .unwrap_or(location_id)
                    .to_string()
            };
            advisor = self.advisors.next_advisor(&advisor_location).await.unwrap_or_default();
        }

        match advisor {
            Some(advisor) => {
                tracing::info!(advisor = %advisor.name, link = %advisor.booking_link, "Advisor booking link resolved");
                let _ = self.advisors.increment_assigned(advisor.id).await;
                text.replace("{BOOKING_LINK}", &advisor.booking_link)
            }
            None => {
                let fallback = self.advisors.default_booking_link().to_string();
                tracing::warn!(link = %fallback, "No advisor available, using default link");
                text.replace("{BOOKING_LINK}", &fallback)
            }
        }
    }

    // --- helpers ---

    fn base_processed(&self, inbound: &InboundMessage) -> ProcessedData {
        ProcessedData {
            contact_id: inbound.contact_id.clone(),
            full_name: inbound.full_name.clone(),
            message: inbound.message.clone(),
            conversation_id: inbound.conversation_id.clone(),
            source: inbound.source.clone(),
            direction: inbound.direction.clone(),
            ai_response: None,
            safety_net: false,
            recovery: false,
        }
    }

    fn pre_captured_fields(&self, inbound: &InboundMessage) -> CapturedFields {
        let mut captured = CapturedFields::default();
        if inbound.channel.is_phone_based() {
            captured.phone = normalize_phone_last10(&inbound.phone);
        }
        if inbound.is_lead_form {
            if let Some(form) = &inbound.lead_form {
                if !form.campus.is_empty() {
                    captured.campus = Some(form.campus.clone());
                }
                if !form.full_name.is_empty() {
                    captured.guardian_name = Some(form.full_name.clone());
                }
                if !form.phone.is_empty() {
                    captured.phone = Some(form.phone.clone());
                }
                if !form.email.is_empty() {
                    captured.email = Some(form.email.clone());
                }
                if !form.level_interest.is_empty() {
                    captured.level = Some(form.level_interest.clone());
                }
            }
        }
        captured
    }

    /// Phone + email from the message itself, with the lead form as backup.
    fn complete_contact_data(&self, inbound: &InboundMessage) -> (Option<String>, Option<String>) {
        let mut phone = extract_phone(&inbound.message);
        let mut email = extract_email(&inbound.message);

        if let Some(form) = &inbound.lead_form {
            if phone.is_none() && !form.phone.is_empty() {
                phone = normalize_phone_last10(&form.phone).or_else(|| Some(form.phone.clone()));
            }
            if email.is_none() && !form.email.is_empty() {
                email = Some(form.email.clone());
            }
        }

        if phone.is_some() && email.is_some() {
            (phone, email)
        } else {
            (None, None)
        }
    }

    /// Booking state from the lead store, with a history scan fallback.
    async fn booking_state_with_history(
        &self,
        contact_id: &str,
        history: &[Turn],
    ) -> admissions_agent_core::BookingState {
        if let Ok(state) = self.lead_states.booking_state(contact_id).await {
            if state.sent {
                return state;
            }
        }
        let sent_in_history = history
            .iter()
            .any(|t| t.is_assistant() && t.content.contains(BOOKING_LINK_HOST));
        if sent_in_history {
            let _ = self.lead_states.mark_booking_sent(contact_id).await;
            return admissions_agent_core::BookingState { sent: true, post_booking_count: 0 };
        }
        admissions_agent_core::BookingState::default()
    }

    /// Convert persisted history to the fused model turn list and inject the
    /// channel/lead-form system notes.
    fn build_messages(&self, history: &[Turn], inbound: &InboundMessage) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 3);

        for turn in history {
            let role = match turn.role {
                admissions_agent_core::TurnRole::User => Role::User,
                admissions_agent_core::TurnRole::Assistant => Role::Assistant,
            };
            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&turn.content);
                }
                _ => messages.push(Message { role, content: turn.content.clone(), tool_calls: Vec::new(), tool_call_id: None }),
            }
        }

        // The inbound message was already persisted; fuse it only when the
        // stored history does not end with it
        let already_last = matches!(
            messages.last(),
            Some(last) if last.role == Role::User && last.content.ends_with(&inbound.message)
        );
        if !already_last {
            match messages.last_mut() {
                Some(last) if last.role == Role::User => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&inbound.message);
                }
                _ => messages.push(Message::user(&inbound.message)),
            }
        }

        if inbound.channel.is_phone_based() {
            if let Some(phone) = normalize_phone_last10(&inbound.phone) {
                messages.push(Message::system(format!(
                    "[SISTEMA - DATO PRE-CAPTURADO]: El WhatsApp del usuario ya está registrado: {}. NO pidas el número de WhatsApp. IMPORTANTE: Tu PRIMERA pregunta SIEMPRE debe ser confirmar el PLANTEL de interés. Después pide: nivel educativo, nombre completo, email. En ese orden.",
                    phone,
                )));
                tracing::info!(phone = %phone, "Channel phone injected");
            }
        }

        if inbound.is_lead_form {
            if let Some(form) = &inbound.lead_form {
                let mut parts = Vec::new();
                if !form.campus.is_empty() {
                    parts.push(format!("Plantel de interés: {}", form.campus));
                }
                if !form.level_interest.is_empty() {
                    parts.push(format!("Nivel educativo de interés: {}", form.level_interest));
                }
                if !form.full_name.is_empty() {
                    parts.push(format!("Nombre completo: {}", form.full_name));
                }
                if !form.phone.is_empty() {
                    parts.push(format!("Teléfono: {}", form.phone));
                }
                if !form.email.is_empty() {
                    parts.push(format!("Email: {}", form.email));
                }
                if !parts.is_empty() {
                    messages.push(Message::system(format!(
                        "[SISTEMA - DATOS PRE-CAPTURADOS DE FORMULARIO LEAD ADS]:\n{}\nIMPORTANTE: Estos datos YA fueron proporcionados por el prospecto. NO los pidas de nuevo. Usa esta información para avanzar directo a los datos faltantes o al link de cita si ya tienes todo.",
                        parts.join("\n"),
                    )));
                    tracing::info!(fields = parts.len(), "Lead form context injected");
                }
            }
        }

        messages
    }

    async fn next_advisor_link(&self, location_id: &str) -> String {
        match self.advisors.next_advisor(location_id).await {
            Ok(Some(advisor)) => {
                let _ = self.advisors.increment_assigned(advisor.id).await;
                advisor.booking_link
            }
            Ok(None) => {
                tracing::warn!(location_id = %location_id, "No active advisor for location");
                self.advisors.default_booking_link().to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Advisor lookup failed");
                self.advisors.default_booking_link().to_string()
            }
        }
    }

    /// Validate-and-clean, then send with the same-request fallback channel.
    /// Returns the sent text, or None when the message was blocked.
    async fn send_validated(
        &self,
        contact_id: &str,
        text: &str,
        channel: Channel,
        conversation_id: Option<&str>,
        location_id: &str,
        phone: &str,
        history: &[Turn],
    ) -> Option<String> {
        let last_assistant = history
            .iter()
            .rev()
            .find(|t| t.is_assistant())
            .map(|t| t.content.as_str());
        let cleaned = validate_and_clean(
            text,
            last_assistant,
            channel,
            self.advisors.default_booking_link(),
        )?;

        // Phone-based channels send by contact id (legacy mode)
        let conv_id = if channel.is_phone_based() && !phone.is_empty() {
            None
        } else {
            conversation_id
        };

        match self.crm.send_message(contact_id, &cleaned, channel, conv_id, location_id).await {
            Ok(()) => {
                tracing::info!(channel = channel.as_str(), "Message sent");
                Some(cleaned)
            }
            Err(e) if !phone.is_empty() => {
                tracing::warn!(error = %e, "Send failed, attempting WhatsApp fallback");
                if let Err(e) = self
                    .crm
                    .send_message(contact_id, &cleaned, Channel::WhatsApp, None, location_id)
                    .await
                {
                    tracing::error!(error = %e, "WhatsApp fallback failed");
                }
                Some(cleaned)
            }
            Err(e) => {
                tracing::error!(error = %e, "Send failed with no fallback available");
                None
            }
        }
    }

    async fn send_plain(
        &self,
        contact_id: &str,
        text: &str,
        channel: Channel,
        conversation_id: Option<&str>,
        location_id: &str,
    ) {
        if let Err(e) = self
            .crm
            .send_message(contact_id, text, channel, conversation_id, location_id)
            .await
        {
            tracing::error!(error = %e, channel = channel.as_str(), "Direct send failed");
        }
    }

    async fn add_tag(&self, contact_id: &str, tag: &str, location_id: &str) {
        if let Err(e) = self.crm.add_tag(contact_id, tag, location_id).await {
            tracing::warn!(error = %e, tag, "Tag add failed");
        }
    }

    async fn update_relevance_tags(&self, contact_id: &str, is_relevant: bool, location_id: &str) {
        if is_relevant {
            let _ = self.crm.remove_tag(contact_id, "No es Ventas", location_id).await;
            self.add_tag(contact_id, "Proceso de Ventas", location_id).await;
        } else {
            self.add_tag(contact_id, "No es Ventas", location_id).await;
            let _ = self.crm.remove_tag(contact_id, "Proceso de Ventas", location_id).await;
        }
    }

    /// Exactly one score tier tag stays active.
    async fn update_scoring_tags(&self, contact_id: &str, score: u32, location_id: &str) {
        let new_tag = score_tag(score);
        for old_tag in ALL_SCORE_TAGS {
            if old_tag != new_tag {
                let _ = self.crm.remove_tag(contact_id, old_tag, location_id).await;
            }
        }
        self.add_tag(contact_id, new_tag, location_id).await;
        tracing::info!(tag = new_tag, score, "Score tag updated");
    }

    async fn persist_assistant(
        &self,
        conv_db_id: Option<uuid::Uuid>,
        content: &str,
        turn_type: Option<&str>,
    ) {
        let Some(conv_id) = conv_db_id else { return };
        let mut turn = Turn::assistant(content);
        if let Some(turn_type) = turn_type {
            turn = turn.with_metadata(serde_json::json!({ "type": turn_type }));
        }
        if let Err(e) = self.conversations.append_turn(conv_id, &turn).await {
            tracing::error!(error = %e, "Failed to persist assistant turn");
        }
    }
}

fn display_name(full_name: &str) -> String {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        "amigo/a".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back() {
        assert_eq!(display_name("  "), "amigo/a");
        assert_eq!(display_name("Ana López"), "Ana López");
    }

    #[test]
    fn outcome_serialization_shape() {
        let outcome = PipelineOutcome::ignored("handoff_persistence");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "ignored");
        assert_eq!(json["reason"], "handoff_persistence");
    }

    #[test]
    fn booking_url_regex_matches_advisor_links() {
        let m = BOOKING_URL_RE
            .find("agenda aquí: https://agenda.leadlink.mx/widget/booking/abc123 🦉")
            .unwrap();
        assert_eq!(m.as_str(), "https://agenda.leadlink.mx/widget/booking/abc123");
    }
}
