//! Per-turn dialogue state machine
//!
//! `Start → Enrich → KillSwitchGate → {Format | Agent}`;
//! `Agent → {ToolExec → Agent | Format}`; `Format → End`.
//!
//! Each state is a plain transition function over [`AgentState`] and routing
//! is one explicit `match` — no hidden graph registry. Tool round trips are
//! capped so a model that keeps requesting tools cannot spin forever.

use std::sync::Arc;

use admissions_agent_config::ObjectionCatalog;
use admissions_agent_core::{LanguageModel, Message, Role, StructuredReply};
use admissions_agent_extraction::{extract_email, extract_phone};
use admissions_agent_tools::{ToolKind, ToolRouter};

use crate::format::format_reply;
use crate::prompt::{build_post_booking_prompt, build_system_prompt, PromptContext};
use crate::state::AgentState;

/// Upper bound on Agent → ToolExec → Agent round trips per invocation.
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Reply used when model invocation fails outright.
const MODEL_FAILURE_REPLY: &str = "Necesito que continúes con la conversación";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MachineState {
    Enrich,
    KillSwitchGate,
    Agent,
    ToolExec,
    Format,
    End,
}

/// The five-state dialogue machine. One instance serves all requests; all
/// mutable state lives in the per-invocation [`AgentState`].
pub struct DialogueMachine {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRouter>,
    objections: Arc<ObjectionCatalog>,
}

impl DialogueMachine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRouter>,
        objections: Arc<ObjectionCatalog>,
    ) -> Self {
        Self { model, tools, objections }
    }

    pub fn tools(&self) -> &ToolRouter {
        &self.tools
    }

    /// Run the machine to completion and return the structured reply.
    pub async fn run(&self, state: &mut AgentState) -> StructuredReply {
        let mut current = MachineState::Enrich;
        let mut tool_rounds = 0usize;

        loop {
            current = match current {
                MachineState::Enrich => {
                    self.enrich(state);
                    MachineState::KillSwitchGate
                }
                MachineState::KillSwitchGate => {
                    if self.kill_switch(state) {
                        state.data_collected = true;
                        MachineState::Format
                    } else {
                        MachineState::Agent
                    }
                }
                MachineState::Agent => {
                    let wants_tools = self.agent(state).await;
                    if wants_tools && tool_rounds < MAX_TOOL_ROUNDS {
                        MachineState::ToolExec
                    } else {
                        if wants_tools {
                            tracing::warn!(
                                rounds = tool_rounds,
                                "Tool round cap reached, forcing format"
                            );
                        }
                        MachineState::Format
                    }
                }
                MachineState::ToolExec => {
                    tool_rounds += 1;
                    self.exec_tools(state);
                    MachineState::Agent
                }
                MachineState::Format => {
                    format_reply(state, &self.tools);
                    MachineState::End
                }
                MachineState::End => break,
            };
        }

        state
            .reply
            .clone()
            .unwrap_or_else(|| StructuredReply::relevant(MODEL_FAILURE_REPLY, ""))
    }

    /// Scan only the newest user message for phone/email; if found, inject an
    /// ephemeral note telling the model these values already exist. No
    /// persistent mutation.
    fn enrich(&self, state: &mut AgentState) {
        let Some(last_user) = state.latest_user_text().map(String::from) else {
            return;
        };

        let mut detected = Vec::new();
        if let Some(phone) = extract_phone(&last_user) {
            detected.push(format!("Teléfono detectado en input: {}", phone));
        }
        if let Some(email) = extract_email(&last_user) {
            detected.push(format!("Email detectado en input: {}", email));
        }

        if !detected.is_empty() {
            tracing::info!(values = %detected.join("; "), "Enrich note injected");
            state.messages.push(Message::system(format!(
                "[SISTEMA - DATOS YA EXISTENTES EN EL ÚLTIMO MENSAJE]:\n{}\n¡ÚSALOS PARA LLENAR LA FICHA! NO LOS PIDAS DE NUEVO.",
                detected.join("\n"),
            )));
        }
    }

    /// Intake-complete check. Post-booking mode passes through uncollected;
    /// a complete persisted lead state short-circuits straight to Format;
    /// otherwise phone AND email anywhere in the accumulated user text (or
    /// the latest message) trip the switch regardless of which turns they
    /// came from.
    fn kill_switch(&self, state: &AgentState) -> bool {
        if state.post_booking_mode {
            tracing::info!("Kill switch skipped: post-booking mode");
            return false;
        }

        if state.lead_state.as_ref().is_some_and(|l| l.is_complete) {
            tracing::info!("Kill switch: persisted lead state complete");
            return true;
        }

        let all_user = state.all_user_text();
        let latest = state.latest_user_text().unwrap_or_default();

        let phone = extract_phone(&all_user).or_else(|| extract_phone(latest));
        let email = extract_email(&all_user).or_else(|| extract_email(latest));

        tracing::debug!(phone = ?phone, email = ?email, "Kill switch check");
        phone.is_some() && email.is_some()
    }

    /// Invoke the model with both tool families bound. Returns whether the
    /// produced message requests tool calls. Invocation failure degrades to
    /// a generic continue reply.
    async fn agent(&self, state: &mut AgentState) -> bool {
        let human_ai_count = state
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .count();
        state.is_first_turn = human_ai_count <= 1;

        let system = if state.post_booking_mode {
            build_post_booking_prompt(&state.user_name, &state.campus_context)
        } else {
            build_system_prompt(&PromptContext {
                campus: &state.campus_context,
                user_name: &state.user_name,
                is_first_turn: state.is_first_turn,
                lead_state: state.lead_state.as_ref(),
                objection_categories: &self.objections.categories_summary(),
                registry: self.tools.registry(),
            })
        };

        match self
            .model
            .generate(&system, &state.messages, &ToolKind::all_definitions())
            .await
        {
            Ok(result) => {
                let wants_tools = result.wants_tools();
                let mut message = Message::assistant(result.text);
                message.tool_calls = result.tool_calls;
                state.messages.push(message);
                wants_tools
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model invocation failed, degrading");
                state.messages.push(Message::assistant(MODEL_FAILURE_REPLY));
                false
            }
        }
    }

    /// Execute every tool call requested by the last assistant message and
    /// append the results as turns. Unknown tools and bad arguments come
    /// back as error-text tool results, not failures.
    fn exec_tools(&self, state: &mut AgentState) {
        let calls = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            let content = match self.tools.execute(&call) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                    format!("Error: {}", e)
                }
            };
            state.messages.push(Message::tool_result(call.id.clone(), content));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admissions_agent_config::LocationRegistry;
    use admissions_agent_core::{
        CollaboratorError, CollaboratorResult, FinishReason, GenerationResult, ToolCall,
        ToolDefinition,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted model: pops queued results, counts invocations.
    struct ScriptedModel {
        script: Mutex<Vec<GenerationResult>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(script: Vec<GenerationResult>) -> Self {
            let mut script = script;
            script.reverse();
            Self { script: Mutex::new(script), calls: AtomicUsize::new(0) }
        }

        fn text(text: &str) -> GenerationResult {
            GenerationResult {
                text: text.to_string(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            }
        }

        fn tool_request(name: &str, arg_key: &str, arg: &str) -> GenerationResult {
            GenerationResult {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "tu_1".into(),
                    name: name.into(),
                    arguments: serde_json::json!({ arg_key: arg }),
                }],
                finish_reason: FinishReason::ToolUse,
            }
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
            let mut script = self.script.lock().unwrap();
            match script.pop() {
                Some(result) => Ok(result),
                None => Err(CollaboratorError::Model("script exhausted".into())),
            }
        }
    }

    fn machine(model: Arc<ScriptedModel>) -> DialogueMachine {
        let registry = Arc::new(LocationRegistry::default());
        let objections = Arc::new(admissions_agent_config::ObjectionCatalog::default());
        let router = Arc::new(ToolRouter::new(registry, objections.clone()));
        DialogueMachine::new(model, router, objections)
    }

    fn state_with(messages: Vec<Message>, campus: &str) -> AgentState {
        AgentState::new(messages, "contact-1", "Ana", campus, "loc-1", None, false)
    }

    #[tokio::test]
    async fn kill_switch_fires_across_non_final_turns() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let machine = machine(model.clone());

        let mut state = state_with(
            vec![
                Message::user("mi teléfono es 2221234567"),
                Message::assistant("¡Gracias! ¿Me compartes tu email?"),
                Message::user("claro: ana@example.com"),
                Message::assistant("Perfecto"),
                Message::user("¿algo más?"),
            ],
            "Puebla",
        );

        let reply = machine.run(&mut state).await;
        assert!(state.data_collected);
        assert_eq!(model.invocations(), 0, "kill switch must skip model generation");
        assert!(reply.message.contains("{BOOKING_LINK}"));
        assert!(reply.is_relevant);
    }

    #[tokio::test]
    async fn tool_round_trip_appends_results_and_loops_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_request("get_levels_by_campus", "campus_name", "Puebla"),
            ScriptedModel::text(
                "Tenemos Secundaria: https://monteverde.edu.mx/puebla/secundaria ¿Me das tu nombre?",
            ),
        ]));
        let machine = machine(model.clone());
        let mut state = state_with(vec![Message::user("¿qué niveles tienen?")], "Puebla");

        let reply = machine.run(&mut state).await;
        assert_eq!(model.invocations(), 2);
        assert!(state.messages.iter().any(|m| m.role == Role::Tool));
        assert!(reply.message.contains("https://monteverde.edu.mx/puebla/secundaria"));
    }

    #[tokio::test]
    async fn tool_round_cap_guarantees_termination() {
        let script: Vec<_> = (0..20)
            .map(|_| ScriptedModel::tool_request("get_campus_info", "campus_name", "Puebla"))
            .collect();
        let model = Arc::new(ScriptedModel::new(script));
        let machine = machine(model.clone());
        let mut state = state_with(vec![Message::user("hola")], "Puebla");

        let _reply = machine.run(&mut state).await;
        assert_eq!(model.invocations(), MAX_TOOL_ROUNDS + 1);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_continue_reply() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let machine = machine(model.clone());
        let mut state = state_with(vec![Message::user("hola")], "");

        let reply = machine.run(&mut state).await;
        assert_eq!(model.invocations(), 1);
        assert!(reply.message.contains("continúes"));
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_turn() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_request("made_up_tool", "x", "y"),
            ScriptedModel::text("Sigo aquí, ¿en qué plantel te interesa inscribir?"),
        ]));
        let machine = machine(model.clone());
        let mut state = state_with(vec![Message::user("hola")], "Puebla");

        let _reply = machine.run(&mut state).await;
        let tool_turn = state.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_turn.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn enrich_injects_system_note_for_detected_contact_data() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::text("ok")]));
        let machine = machine(model);
        let mut state = state_with(vec![Message::user("mi correo es ana@example.com")], "");

        let _ = machine.run(&mut state).await;
        assert!(state
            .messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("Email detectado")));
    }
}
