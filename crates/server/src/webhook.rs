//! Webhook payload extraction and filtering
//!
//! Normalizes the raw CRM webhook body into an [`InboundMessage`], dropping
//! everything the agent must never react to: our own outbound echoes,
//! agent/system events, empty bodies, and FB/IG reactions. Lead-form
//! payloads are the exception to the echo filters; they arrive marked as
//! outbound/system yet carry fresh intake data.

use serde_json::Value;

use admissions_agent_agent::InboundMessage;
use admissions_agent_core::Channel;
use admissions_agent_extraction::lead_form::{looks_like_lead_form, parse_lead_form};
use admissions_agent_extraction::reaction::is_reaction_or_like;

/// Result of payload extraction.
#[derive(Debug)]
pub enum WebhookExtraction {
    Process(Box<InboundMessage>),
    Ignore(&'static str),
}

/// Walk a nested key path.
fn get_nested<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut current = data;
    for key in keys {
        current = current.get(key)?;
    }
    Some(current)
}

fn as_nonempty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Look a field up in the known payload spots, tolerating the CRM's
/// trailing-tab custom-data keys.
fn get_flexible<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    let tabbed = format!("{}\t", field);
    as_nonempty_str(data.get(field))
        .or_else(|| as_nonempty_str(get_nested(data, &["customData", field])))
        .or_else(|| as_nonempty_str(get_nested(data, &["customData", tabbed.as_str()])))
        .or_else(|| {
            if field == "location_id" {
                as_nonempty_str(get_nested(data, &["location", "id"]))
            } else {
                None
            }
        })
}

/// Extract and normalize all data from a webhook payload.
pub fn extract_webhook_data(raw: &Value) -> WebhookExtraction {
    let direction = get_flexible(raw, "direction").unwrap_or_default();
    let message_type = get_flexible(raw, "type").unwrap_or_default();

    // Early body extraction for the anti-echo checks
    let temp_message = get_flexible(raw, "message_body")
        .or_else(|| as_nonempty_str(raw.get("message")))
        .unwrap_or_default();

    // Our own outbound messages loop back through the webhook
    if direction == "outbound" {
        if looks_like_lead_form(temp_message) {
            tracing::info!("Outbound message is a lead form, anti-echo exception");
        } else {
            tracing::warn!("Outbound agent message, ignoring to avoid a loop");
            return WebhookExtraction::Ignore("outbound message");
        }
    }

    if matches!(message_type, "agent" | "system") {
        if looks_like_lead_form(temp_message) {
            tracing::info!(message_type, "Agent/system message is a lead form, exception");
        } else {
            tracing::warn!(message_type, "Agent/system message, ignoring");
            return WebhookExtraction::Ignore("agent message");
        }
    }

    let full_name = get_flexible(raw, "full_name")
        .or_else(|| as_nonempty_str(raw.get("contact_name")))
        .unwrap_or_default()
        .to_string();
    let contact_id = get_flexible(raw, "contact_id").unwrap_or_default().to_string();
    let phone = get_flexible(raw, "phone").unwrap_or_default().to_string();
    let location_id = get_flexible(raw, "location_id").unwrap_or_default().to_string();

    // Message body; a nested `{ body: ... }` object is tolerated
    let message = get_flexible(raw, "message_body")
        .or_else(|| as_nonempty_str(raw.get("message")))
        .or_else(|| as_nonempty_str(get_nested(raw, &["message", "body"])))
        .unwrap_or_default()
        .to_string();
    if message.is_empty() {
        tracing::warn!("Empty or unsupported message body, ignoring");
        return WebhookExtraction::Ignore("empty message");
    }

    // Reactions, likes, and story mentions must not trigger the agent
    let content_type = as_nonempty_str(raw.get("contentType"))
        .or_else(|| as_nonempty_str(raw.get("content_type")))
        .or_else(|| as_nonempty_str(get_nested(raw, &["customData", "contentType"])))
        .or_else(|| as_nonempty_str(raw.get("messageType")))
        .unwrap_or_default();
    if is_reaction_or_like(&message, content_type, message_type) {
        tracing::info!(preview = %message.chars().take(50).collect::<String>(), "Reaction/like detected, ignoring");
        return WebhookExtraction::Ignore("reaction_or_like");
    }

    let conversation_id = get_flexible(raw, "conversation_id").map(str::to_string);

    let mut source = get_flexible(raw, "source").unwrap_or("unknown").to_string();
    if source == "unknown" {
        source = as_nonempty_str(get_nested(raw, &["contact", "attributionSource", "medium"]))
            .or_else(|| as_nonempty_str(get_nested(raw, &["contact", "lastAttributionSource", "medium"])))
            .or_else(|| as_nonempty_str(raw.get("type")))
            .or_else(|| as_nonempty_str(raw.get("messageType")))
            .or_else(|| as_nonempty_str(get_nested(raw, &["customData", "type"])))
            .or_else(|| as_nonempty_str(get_nested(raw, &["customData", "messageType"])))
            .unwrap_or("unknown")
            .to_string();
    }

    let channel = Channel::from_source(&source);
    tracing::info!(channel = channel.as_str(), source = %source, "Channel normalized");

    let lead_form = parse_lead_form(&message);
    let is_lead_form = lead_form.is_some();

    let mut inbound = InboundMessage {
        contact_id,
        full_name,
        phone,
        location_id,
        message,
        conversation_id,
        source,
        channel,
        direction: direction.to_string(),
        is_lead_form,
        lead_form,
    };

    // The form often carries contact data the webhook envelope lacks
    if let Some(form) = &inbound.lead_form {
        if inbound.full_name.is_empty() && !form.full_name.is_empty() {
            inbound.full_name = form.full_name.clone();
        }
        if inbound.phone.is_empty() && !form.phone.is_empty() {
            inbound.phone = form.phone.clone();
        }
    }

    WebhookExtraction::Process(Box::new(inbound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_payload(message: &str) -> Value {
        json!({
            "contact_id": "contact-1",
            "full_name": "Ana López",
            "phone": "+52 222 123 4567",
            "location_id": "Lpb4QWcASxVmdPTJnZQ9",
            "message_body": message,
            "direction": "inbound",
            "source": "whatsapp",
            "conversation_id": "conv-9",
        })
    }

    fn expect_process(extraction: WebhookExtraction) -> InboundMessage {
        match extraction {
            WebhookExtraction::Process(inbound) => *inbound,
            WebhookExtraction::Ignore(reason) => panic!("unexpected ignore: {reason}"),
        }
    }

    fn expect_ignore(extraction: WebhookExtraction) -> &'static str {
        match extraction {
            WebhookExtraction::Ignore(reason) => reason,
            WebhookExtraction::Process(_) => panic!("unexpected process"),
        }
    }

    #[test]
    fn normal_inbound_message_processes() {
        let inbound = expect_process(extract_webhook_data(&base_payload("Hola, quiero informes")));
        assert_eq!(inbound.contact_id, "contact-1");
        assert_eq!(inbound.channel, Channel::WhatsApp);
        assert!(!inbound.is_lead_form);
    }

    #[test]
    fn outbound_messages_are_dropped_unless_lead_form() {
        let mut payload = base_payload("Hola desde el bot");
        payload["direction"] = json!("outbound");
        assert_eq!(expect_ignore(extract_webhook_data(&payload)), "outbound message");

        let mut payload = base_payload("first_name:: Ana\nlast_name:: López\nphone_number:: 2221234567");
        payload["direction"] = json!("outbound");
        let inbound = expect_process(extract_webhook_data(&payload));
        assert!(inbound.is_lead_form);
    }

    #[test]
    fn agent_and_system_types_are_dropped() {
        let mut payload = base_payload("evento interno");
        payload["type"] = json!("agent");
        assert_eq!(expect_ignore(extract_webhook_data(&payload)), "agent message");
    }

    #[test]
    fn empty_message_is_dropped() {
        let payload = json!({"contact_id": "c1", "direction": "inbound"});
        assert_eq!(expect_ignore(extract_webhook_data(&payload)), "empty message");
    }

    #[test]
    fn reactions_are_dropped() {
        assert_eq!(
            expect_ignore(extract_webhook_data(&base_payload("👍"))),
            "reaction_or_like"
        );
        let mut payload = base_payload("cualquier texto");
        payload["contentType"] = json!("ig_reaction");
        assert_eq!(expect_ignore(extract_webhook_data(&payload)), "reaction_or_like");
    }

    #[test]
    fn custom_data_keys_with_trailing_tab_resolve() {
        let payload = json!({
            "customData": {
                "contact_id\t": "contact-7",
                "message_body": "Hola",
            },
            "direction": "inbound",
            "source": "instagram",
        });
        let inbound = expect_process(extract_webhook_data(&payload));
        assert_eq!(inbound.contact_id, "contact-7");
        assert_eq!(inbound.channel, Channel::Instagram);
    }

    #[test]
    fn lead_form_backfills_contact_data() {
        let payload = json!({
            "contact_id": "c1",
            "direction": "inbound",
            "source": "facebook",
            "message_body": "Completé el formulario\nfirst_name:: Luis\nlast_name:: Mora\nphone_number:: 2229876543\nemail:: luis@example.com",
        });
        let inbound = expect_process(extract_webhook_data(&payload));
        assert!(inbound.is_lead_form);
        assert_eq!(inbound.full_name, "Luis Mora");
        assert_eq!(inbound.phone, "2229876543");
    }
}
