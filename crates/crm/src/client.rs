//! HTTP CRM client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use admissions_agent_config::{CrmSettings, LocationRegistry};
use admissions_agent_core::{
    Channel, CollaboratorError, CollaboratorResult, CrmApi, CrmContact, CrmMessage,
};

use crate::CrmError;

const API_VERSION: &str = "2021-04-15";

/// Multi-location CRM client. One instance serves all campuses; the bearer
/// token is resolved per request from the location's configured environment
/// variable.
pub struct HttpCrmClient {
    base_url: String,
    client: Client,
    registry: Arc<LocationRegistry>,
    default_token_env: String,
}

impl HttpCrmClient {
    pub fn new(settings: &CrmSettings, registry: Arc<LocationRegistry>) -> Result<Self, CrmError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| CrmError::Network(e.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            registry,
            default_token_env: settings.default_token_env.clone(),
        })
    }

    /// Token for a location, falling back to the default token env.
    fn token_for_location(&self, location_id: &str) -> Result<String, CrmError> {
        if let Some(location) = self.registry.by_location_id(location_id) {
            match std::env::var(&location.token_env) {
                Ok(token) if !token.is_empty() => {
                    tracing::debug!(campus = %location.name, "Using location credentials");
                    return Ok(token);
                }
                _ => {
                    tracing::warn!(campus = %location.name, "Location token missing, using default");
                }
            }
        } else if !location_id.is_empty() {
            tracing::warn!(location_id = %location_id, "Unknown location id, using default token");
        }

        std::env::var(&self.default_token_env).map_err(|_| {
            CrmError::Configuration(format!("{} not set in environment", self.default_token_env))
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        location_id: &str,
    ) -> Result<reqwest::RequestBuilder, CrmError> {
        let token = self.token_for_location(location_id)?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Version", API_VERSION)
            .header("Accept", "application/json"))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CrmError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(CrmError::Api { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl CrmApi for HttpCrmClient {
    async fn send_message(
        &self,
        contact_id: &str,
        text: &str,
        channel: Channel,
        conversation_id: Option<&str>,
        location_id: &str,
    ) -> CollaboratorResult<()> {
        let mut payload = json!({
            "type": channel.as_str(),
            "contactId": contact_id,
            "message": text,
        });
        if let Some(conv_id) = conversation_id {
            payload["conversationId"] = json!(conv_id);
        }

        let response = self
            .request(reqwest::Method::POST, "/conversations/messages", location_id)
            .map_err(CollaboratorError::from)?
            .json(&payload)
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;

        tracing::info!(contact_id = %contact_id, channel = channel.as_str(), "CRM message sent");
        Ok(())
    }

    async fn add_tag(
        &self,
        contact_id: &str,
        tag: &str,
        location_id: &str,
    ) -> CollaboratorResult<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/contacts/{}/tags", contact_id),
                location_id,
            )
            .map_err(CollaboratorError::from)?
            .json(&json!({ "tags": [tag] }))
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;
        tracing::debug!(contact_id = %contact_id, tag, "Tag added");
        Ok(())
    }

    async fn remove_tag(
        &self,
        contact_id: &str,
        tag: &str,
        location_id: &str,
    ) -> CollaboratorResult<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/contacts/{}/tags", contact_id),
                location_id,
            )
            .map_err(CollaboratorError::from)?
            .json(&json!({ "tags": [tag] }))
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;
        Ok(())
    }

    async fn update_contact_fields(
        &self,
        contact_id: &str,
        fields: &HashMap<String, String>,
        location_id: &str,
    ) -> CollaboratorResult<()> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/contacts/{}", contact_id), location_id)
            .map_err(CollaboratorError::from)?
            .json(&fields)
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;
        tracing::info!(contact_id = %contact_id, fields = fields.len(), "Contact fields updated");
        Ok(())
    }

    async fn get_contact(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<Option<CrmContact>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/contacts/{}", contact_id), location_id)
            .map_err(CollaboratorError::from)?
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = Self::check(response).await.map_err(CollaboratorError::from)?;
        let body: ContactEnvelope = response
            .json()
            .await
            .map_err(|e| CrmError::InvalidResponse(e.to_string()))
            .map_err(CollaboratorError::from)?;

        let c = body.contact;
        Ok(Some(CrmContact {
            id: c.id,
            name: c.name,
            phone: c.phone,
            email: c.email,
            assigned_to: c.assigned_to,
            profile_handle: c
                .instagram
                .or(c.instagram_url)
                .or(c.facebook)
                .or(c.facebook_url),
        }))
    }

    async fn create_contact(
        &self,
        location_id: &str,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> CollaboratorResult<String> {
        let mut payload = json!({ "locationId": location_id });
        if let Some(name) = name {
            payload["name"] = json!(name);
        }
        if let Some(phone) = phone {
            payload["phone"] = json!(phone);
        }
        if let Some(email) = email {
            payload["email"] = json!(email);
        }

        let response = self
            .request(reqwest::Method::POST, "/contacts", location_id)
            .map_err(CollaboratorError::from)?
            .json(&payload)
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        let response = Self::check(response).await.map_err(CollaboratorError::from)?;
        let body: ContactEnvelope = response
            .json()
            .await
            .map_err(|e| CrmError::InvalidResponse(e.to_string()))
            .map_err(CollaboratorError::from)?;

        tracing::info!(contact_id = %body.contact.id, location_id = %location_id, "Contact created");
        Ok(body.contact.id)
    }

    async fn delete_contact(&self, contact_id: &str, location_id: &str) -> CollaboratorResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/contacts/{}", contact_id), location_id)
            .map_err(CollaboratorError::from)?
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;
        tracing::info!(contact_id = %contact_id, "Contact deleted");
        Ok(())
    }

    async fn add_note(
        &self,
        contact_id: &str,
        body: &str,
        location_id: &str,
    ) -> CollaboratorResult<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/contacts/{}/notes", contact_id),
                location_id,
            )
            .map_err(CollaboratorError::from)?
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        Self::check(response).await.map_err(CollaboratorError::from)?;
        Ok(())
    }

    async fn find_conversation_id(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<Option<String>> {
        let response = self
            .request(reqwest::Method::GET, "/conversations/search", location_id)
            .map_err(CollaboratorError::from)?
            .query(&[("contactId", contact_id), ("limit", "1")])
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        let response = Self::check(response).await.map_err(CollaboratorError::from)?;
        let body: ConversationSearch = response
            .json()
            .await
            .map_err(|e| CrmError::InvalidResponse(e.to_string()))
            .map_err(CollaboratorError::from)?;

        Ok(body.conversations.into_iter().next().map(|c| c.id))
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        location_id: &str,
        limit: usize,
    ) -> CollaboratorResult<Vec<CrmMessage>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/conversations/{}/messages", conversation_id),
                location_id,
            )
            .map_err(CollaboratorError::from)?
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(CrmError::from)
            .map_err(CollaboratorError::from)?;
        let response = Self::check(response).await.map_err(CollaboratorError::from)?;
        let body: MessagesEnvelope = response
            .json()
            .await
            .map_err(|e| CrmError::InvalidResponse(e.to_string()))
            .map_err(CollaboratorError::from)?;

        Ok(body
            .messages
            .into_iter()
            .map(|m| CrmMessage {
                direction: m.direction.unwrap_or_default(),
                body: m.body.unwrap_or_default(),
                date_added: m
                    .date_added
                    .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

// --- API wire types ---

#[derive(Debug, Deserialize)]
struct ContactEnvelope {
    contact: ApiContact,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiContact {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    instagram: Option<String>,
    #[serde(default)]
    instagram_url: Option<String>,
    #[serde(default)]
    facebook: Option<String>,
    #[serde(default)]
    facebook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationSearch {
    #[serde(default)]
    conversations: Vec<ConversationRef>,
}

#[derive(Debug, Deserialize)]
struct ConversationRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_envelope_parses_crm_shapes() {
        let raw = r#"{
            "messages": [
                {"direction": "outbound", "body": "Hola", "dateAdded": "2026-08-07T10:00:00Z"},
                {"direction": "inbound", "body": "Buenas"}
            ]
        }"#;
        let parsed: MessagesEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].direction.as_deref(), Some("outbound"));
        assert!(parsed.messages[1].date_added.is_none());
    }

    #[test]
    fn contact_envelope_exposes_social_handles() {
        let raw = r#"{"contact": {"id": "abc", "name": "Ana", "assignedTo": "user-1", "instagramUrl": "@ana"}}"#;
        let parsed: ContactEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.contact.assigned_to.as_deref(), Some("user-1"));
        assert_eq!(parsed.contact.instagram_url.as_deref(), Some("@ana"));
    }
}
