//! End-to-end pipeline scenarios over in-memory collaborators
//!
//! A scripted model stands in for the real backend and a recording CRM
//! captures everything the pipeline dispatches, so every scenario asserts on
//! observable behavior: what was sent, what was tagged, what was persisted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use admissions_agent_agent::{
    ConversationOrchestrator, DialogueMachine, InboundMessage, PipelineOutcome,
};
use admissions_agent_config::{LocationRegistry, ObjectionCatalog};
use admissions_agent_core::{
    Advisor, Channel, CollaboratorResult, ConversationStore, CrmApi, CrmContact, CrmMessage,
    FinishReason, GenerationResult, LanguageModel, LeadStateStore, Message, ToolDefinition, Turn,
};
use admissions_agent_persistence::{
    InMemoryAdvisorDirectory, InMemoryConversationStore, InMemoryLeadStateStore,
};
use admissions_agent_tools::ToolRouter;

const PUEBLA_LOCATION: &str = "Lpb4QWcASxVmdPTJnZQ9";
const COATZA_LOCATION: &str = "XcWpa7VKe0QnB5dRjLu2";

// --- scripted model ---

struct ScriptedModel {
    script: Mutex<Vec<GenerationResult>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        let mut script: Vec<GenerationResult> = replies
            .into_iter()
            .map(|text| GenerationResult {
                text: text.to_string(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            })
            .collect();
        script.reverse();
        Arc::new(Self { script: Mutex::new(script), calls: AtomicUsize::new(0) })
    }

    fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> CollaboratorResult<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        script.pop().ok_or_else(|| {
            admissions_agent_core::CollaboratorError::Model("script exhausted".into())
        })
    }
}

// --- recording CRM ---

#[derive(Default)]
struct RecordingCrm {
    sent: Mutex<Vec<(String, String, &'static str)>>,
    tags: Mutex<Vec<String>>,
    field_updates: Mutex<Vec<HashMap<String, String>>>,
    created_contacts: Mutex<Vec<(String, String)>>,
    deleted_contacts: Mutex<Vec<String>>,
    notes: Mutex<Vec<String>>,
    native_messages: Mutex<Vec<CrmMessage>>,
}

impl RecordingCrm {
    fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text, _)| text.clone()).collect()
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.lock().iter().any(|t| t == tag)
    }
}

#[async_trait]
impl CrmApi for RecordingCrm {
    async fn send_message(
        &self,
        contact_id: &str,
        text: &str,
        channel: Channel,
        _conversation_id: Option<&str>,
        _location_id: &str,
    ) -> CollaboratorResult<()> {
        self.sent.lock().push((contact_id.to_string(), text.to_string(), channel.as_str()));
        Ok(())
    }

    async fn add_tag(&self, _c: &str, tag: &str, _l: &str) -> CollaboratorResult<()> {
        self.tags.lock().push(tag.to_string());
        Ok(())
    }

    async fn remove_tag(&self, _c: &str, _tag: &str, _l: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn update_contact_fields(
        &self,
        _c: &str,
        fields: &HashMap<String, String>,
        _l: &str,
    ) -> CollaboratorResult<()> {
        self.field_updates.lock().push(fields.clone());
        Ok(())
    }

    async fn get_contact(&self, contact_id: &str, _l: &str) -> CollaboratorResult<Option<CrmContact>> {
        Ok(Some(CrmContact {
            id: contact_id.to_string(),
            name: Some("Ana López".to_string()),
            phone: Some("2221234567".to_string()),
            email: None,
            assigned_to: None,
            profile_handle: None,
        }))
    }

    async fn create_contact(
        &self,
        location_id: &str,
        name: Option<&str>,
        _phone: Option<&str>,
        _email: Option<&str>,
    ) -> CollaboratorResult<String> {
        let id = format!("new-{}", self.created_contacts.lock().len() + 1);
        self.created_contacts
            .lock()
            .push((location_id.to_string(), name.unwrap_or_default().to_string()));
        Ok(id)
    }

    async fn delete_contact(&self, contact_id: &str, _l: &str) -> CollaboratorResult<()> {
        self.deleted_contacts.lock().push(contact_id.to_string());
        Ok(())
    }

    async fn add_note(&self, _c: &str, body: &str, _l: &str) -> CollaboratorResult<()> {
        self.notes.lock().push(body.to_string());
        Ok(())
    }

    async fn find_conversation_id(&self, _c: &str, _l: &str) -> CollaboratorResult<Option<String>> {
        Ok(Some("native-conv-1".to_string()))
    }

    async fn recent_messages(
        &self,
        _conversation_id: &str,
        _l: &str,
        _limit: usize,
    ) -> CollaboratorResult<Vec<CrmMessage>> {
        Ok(self.native_messages.lock().clone())
    }
}

// --- fixture ---

struct Fixture {
    orchestrator: ConversationOrchestrator,
    crm: Arc<RecordingCrm>,
    conversations: Arc<InMemoryConversationStore>,
    lead_states: Arc<InMemoryLeadStateStore>,
    model: Arc<ScriptedModel>,
}

fn advisor(name: &str, location: &str) -> Advisor {
    Advisor {
        id: Uuid::new_v4(),
        name: name.to_string(),
        location_id: location.to_string(),
        booking_link: format!("https://agenda.leadlink.mx/widget/booking/{}", name),
        assigned_count: 0,
        crm_user_id: None,
        is_active: true,
    }
}

fn fixture(model: Arc<ScriptedModel>) -> Fixture {
    let registry = Arc::new(LocationRegistry::default());
    let objections = Arc::new(ObjectionCatalog::default());
    let crm = Arc::new(RecordingCrm::default());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let lead_states = Arc::new(InMemoryLeadStateStore::new());
    let advisors = Arc::new(InMemoryAdvisorDirectory::new(vec![
        advisor("maria", PUEBLA_LOCATION),
        advisor("jorge", COATZA_LOCATION),
    ]));

    let tools = Arc::new(ToolRouter::new(registry.clone(), objections.clone()));
    let machine = DialogueMachine::new(model.clone(), tools, objections);

    let orchestrator = ConversationOrchestrator::new(
        crm.clone(),
        conversations.clone(),
        lead_states.clone(),
        advisors,
        registry,
        machine,
    );

    Fixture { orchestrator, crm, conversations, lead_states, model }
}

fn inbound(message: &str) -> InboundMessage {
    InboundMessage {
        contact_id: "contact-1".to_string(),
        full_name: "Ana López".to_string(),
        phone: "+52 1 222 123 4567".to_string(),
        location_id: PUEBLA_LOCATION.to_string(),
        message: message.to_string(),
        conversation_id: Some("conv-native".to_string()),
        source: "whatsapp".to_string(),
        channel: Channel::WhatsApp,
        direction: "inbound".to_string(),
        is_lead_form: false,
        lead_form: None,
    }
}

fn assert_success(outcome: &PipelineOutcome) -> String {
    match outcome {
        PipelineOutcome::Success { processed_data } => {
            processed_data.ai_response.clone().expect("ai_response present")
        }
        other => panic!("expected success, got {:?}", other),
    }
}

fn assert_ignored(outcome: &PipelineOutcome, expected_reason: &str) {
    match outcome {
        PipelineOutcome::Ignored { reason } => assert_eq!(reason, expected_reason),
        other => panic!("expected ignored({expected_reason}), got {:?}", other),
    }
}

// --- scenarios ---

/// First contact with no pre-known campus: the agent asks for one of the
/// three campuses and never stacks two questions in one reply.
#[tokio::test]
async fn first_turn_greeting_asks_for_one_campus() {
    let model = ScriptedModel::new(vec![
        "¡Hola Ana López! Soy Emma 🦉, la asistente de Colegio Monteverde. ¿En cuál de nuestros planteles te gustaría inscribir a tu hijo/a? (Puebla, Poza Rica, Coatzacoalcos)",
    ]);
    let fx = fixture(model.clone());

    let outcome = fx.orchestrator.process(inbound("Hola")).await;
    let response = assert_success(&outcome);

    assert_eq!(fx.model.invocations(), 1);
    assert!(response.contains("planteles"));
    assert!(response.contains("Puebla"));
    assert!(response.contains("Poza Rica"));
    assert!(response.contains("Coatzacoalcos"));
    assert_eq!(response.matches('?').count(), 1, "exactly one question per reply");

    let sent = fx.crm.sent_texts();
    assert_eq!(sent.len(), 1);
    assert!(fx.crm.has_tag("Proceso de Ventas"));
}

/// One message carrying a valid phone and email: the kill-path safety net
/// answers with the fixed completion message and a resolved booking link;
/// the model is never invoked.
#[tokio::test]
async fn complete_data_in_single_message_bypasses_model() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    let outcome = fx
        .orchestrator
        .process(inbound(
            "Claro, soy Ana López Ruiz, mi número es 222 123 4567 y mi correo ana@example.com",
        ))
        .await;
    let response = assert_success(&outcome);

    assert_eq!(fx.model.invocations(), 0, "safety net must bypass generation");
    assert!(response.contains("Ya tengo todos tus datos"));
    assert!(response.contains("https://agenda.leadlink.mx/widget/booking/maria"));

    // Fields written directly to the CRM
    let updates = fx.crm.field_updates.lock();
    assert!(updates
        .iter()
        .any(|f| f.get("phone").map(String::as_str) == Some("2221234567")
            && f.get("email").map(String::as_str) == Some("ana@example.com")));
}

/// Phone and email arriving in different, non-final turns still trip the
/// kill switch inside the machine: fixed completion message, no generation.
#[tokio::test]
async fn kill_switch_fires_across_turns() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("hola, mi teléfono es 2221234567"),
            Turn::assistant("¡Gracias! ¿Me compartes tu correo electrónico?"),
            Turn::user("es ana@example.com"),
            Turn::assistant("Perfecto, lo registro."),
        ],
    );

    let outcome = fx.orchestrator.process(inbound("¿Ahora qué sigue?")).await;
    let response = assert_success(&outcome);

    assert_eq!(fx.model.invocations(), 0);
    assert!(response.contains("Ya tengo todos tus datos"));
    assert!(response.contains("https://agenda.leadlink.mx/widget/booking/"));
    assert!(!response.contains("{BOOKING_LINK}"), "placeholder must be resolved");

    // Booking marker persisted
    let booking = fx.lead_states.booking_state("contact-1").await.unwrap();
    assert!(booking.sent);
}

/// Two near-identical persisted assistant turns: the pre-model loop guard
/// hands off to a human and the model is never consulted.
#[tokio::test]
async fn repeated_assistant_turns_force_handoff_without_generation() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("hola"),
            Turn::assistant("¿En qué plantel te gustaría inscribir a tu hijo/a?"),
            Turn::user("no entiendo"),
            Turn::assistant("¿En qué plantel te gustaría inscribir a tu hijo/a?"),
        ],
    );

    let outcome = fx.orchestrator.process(inbound("sigo sin entender")).await;
    assert_ignored(&outcome, "loop_detected_handoff");

    assert_eq!(fx.model.invocations(), 0);
    assert!(fx.crm.has_tag("Necesita Humano"));
    let sent = fx.crm.sent_texts();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("asesor"));
}

/// A freshly generated reply nearly identical to a recent turn is blocked
/// post-model and replaced by the handoff message; the duplicate never goes
/// out.
#[tokio::test]
async fn near_duplicate_candidate_is_replaced_by_handoff() {
    let repeated = "¿Me compartes tu número de WhatsApp de 10 dígitos?";
    let model = ScriptedModel::new(vec![repeated]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("hola"),
            Turn::assistant("¡Bienvenida! ¿Qué nivel educativo te interesa para tu hijo/a?"),
            Turn::user("mmm"),
            Turn::assistant(repeated),
        ],
    );

    let outcome = fx.orchestrator.process(inbound("ok")).await;
    assert_ignored(&outcome, "proactive_loop_prevention");

    assert_eq!(fx.model.invocations(), 1);
    assert!(fx.crm.has_tag("Necesita Humano"));
    let sent = fx.crm.sent_texts();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].contains("WhatsApp de 10 dígitos"), "duplicate must never be sent");
}

/// A stuck greeting recovers into a targeted clarifying question instead of
/// a handoff.
#[tokio::test]
async fn greeting_loop_recovers_with_level_question() {
    let repeated = "¿En qué plantel te gustaría inscribir a tu hijo/a? Tenemos opciones increíbles.";
    let model = ScriptedModel::new(vec![repeated]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("hola"),
            Turn::assistant("Con gusto, los costos se revisan en tu visita con el asesor."),
            Turn::user("hola?"),
            Turn::assistant(repeated),
        ],
    );

    let outcome = fx.orchestrator.process(inbound("hola de nuevo")).await;
    let response = assert_success(&outcome);
    assert!(response.contains("nivel educativo"));
    assert!(fx.crm.sent_texts().iter().any(|t| t.contains("nivel educativo")));
}

/// Administrative requests are redirected deterministically, tagged, and
/// never reach the model.
#[tokio::test]
async fn administrative_topic_is_redirected() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    let outcome = fx
        .orchestrator
        .process(inbound("Buenas tardes, necesito la boleta de calificaciones de mi hija"))
        .await;
    assert_ignored(&outcome, "admin_topic_handoff");

    assert_eq!(fx.model.invocations(), 0);
    assert!(fx.crm.has_tag("Tema Administrativo"));
    assert!(fx.crm.has_tag("Necesita Humano"));
    assert!(fx.crm.sent_texts()[0].contains("trámites escolares"));
}

/// Short explicit human requests bypass generation and answer with a booking
/// link directly.
#[tokio::test]
async fn human_request_returns_booking_link() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    let outcome = fx.orchestrator.process(inbound("quiero hablar con un asesor")).await;
    let response = assert_success(&outcome);

    assert_eq!(fx.model.invocations(), 0);
    assert!(response.contains("agenda tu cita"));
    assert!(response.contains("https://agenda.leadlink.mx/widget/booking/maria"));
}

/// A sticky handoff reply younger than its expiry keeps the bot silent.
#[tokio::test]
async fn recent_handoff_keeps_bot_silent() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("ya no me sirve"),
            Turn::assistant("Un asesor especializado atenderá tus dudas mejor. ¡Pronto te contactarán! 🦉"),
        ],
    );

    let outcome = fx.orchestrator.process(inbound("¿hola?")).await;
    assert_ignored(&outcome, "handoff_persistence");
    assert_eq!(fx.model.invocations(), 0);
    assert!(fx.crm.sent_texts().is_empty());
}

/// The persisted human-takeover flag silences the pipeline outright.
#[tokio::test]
async fn human_takeover_flag_silences_pipeline() {
    let model = ScriptedModel::new(vec![]);
    let fx = fixture(model.clone());

    fx.conversations.set_human_active("contact-1", true).await.unwrap();

    let outcome = fx.orchestrator.process(inbound("hola")).await;
    assert_ignored(&outcome, "human_agent_active");
    assert!(fx.crm.sent_texts().is_empty());
}

/// A reply naming a different campus triggers the transfer flow: new contact
/// at the target location, source contact deleted, conversation migrated,
/// transcript forwarded.
#[tokio::test]
async fn detected_campus_change_transfers_the_contact() {
    let model = ScriptedModel::new(vec![
        "¡Perfecto! Te esperamos en el plantel Coatzacoalcos. ¿Me compartes tu nombre completo?",
    ]);
    let fx = fixture(model.clone());

    let outcome = fx.orchestrator.process(inbound("Mejor me queda Coatzacoalcos")).await;
    let _response = assert_success(&outcome);

    let created = fx.crm.created_contacts.lock();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, COATZA_LOCATION);
    drop(created);
    let deleted = fx.crm.deleted_contacts.lock();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0], "contact-1");

    // Conversation now lives under the new contact
    let migrated_history = fx.conversations.history("new-1", 10).await.unwrap();
    assert!(!migrated_history.is_empty());

    // Transfer notice plus the forwarded transcript were sent
    let sent = fx.crm.sent_texts();
    assert!(sent.iter().any(|t| t.contains("transferido a otro plantel")));
    assert!(sent.iter().any(|t| t.contains("HISTORIAL DE CONVERSACIÓN TRANSFERIDO")));

    match outcome {
        PipelineOutcome::Success { processed_data } => {
            assert_eq!(processed_data.contact_id, "new-1");
        }
        _ => unreachable!(),
    }
}

/// Post-booking: the first reply after the link runs in restricted mode; the
/// second escalates to a permanent human handoff.
#[tokio::test]
async fn post_booking_replies_escalate_to_permanent_handoff() {
    let model = ScriptedModel::new(vec!["¡Con gusto, Ana López! Te esperamos en tu cita. 🦉"]);
    let fx = fixture(model.clone());

    fx.conversations.seed_history(
        "contact-1",
        PUEBLA_LOCATION,
        vec![
            Turn::user("listo, ahí están mis datos"),
            Turn::assistant(
                "¡Gracias! Agenda aquí: https://agenda.leadlink.mx/widget/booking/maria 🦉",
            ),
        ],
    );

    // First post-booking reply: restricted mode, model still answers
    let outcome = fx.orchestrator.process(inbound("gracias")).await;
    assert_success(&outcome);
    assert_eq!(fx.model.invocations(), 1);

    // Second reply: permanent handoff, bot silenced
    let outcome = fx.orchestrator.process(inbound("ok")).await;
    let response = assert_success(&outcome);
    assert!(response.contains("Un asesor te contactará pronto"));
    assert_eq!(fx.model.invocations(), 1, "no generation on the escalation turn");
    assert!(fx.crm.has_tag("Lead con cita pendiente"));
    assert!(fx.conversations.human_active("contact-1").await.unwrap());
}
