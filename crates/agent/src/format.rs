//! Deterministic Format stage (terminal, no model call)
//!
//! Turns whatever the Agent/ToolExec states produced into a safe, final
//! [`StructuredReply`]: kill-switch completion, code-leak recovery, artifact
//! cleanup, URL validation/injection, greeting-repetition filter, and the
//! deterministic relevance/campus overrides.

use once_cell::sync::Lazy;
use regex::Regex;

use admissions_agent_core::{CapturedFields, Message, Role, StructuredReply};
use admissions_agent_extraction::{
    detect_level_keyword, extract_email, extract_phone, reply_marks_not_a_prospect,
};
use admissions_agent_tools::ToolRouter;

use crate::sanitize::{clean_model_response, has_code_leak, preview, REPLY_MARKER};
use crate::state::AgentState;
use crate::url_guard::{has_tool_urls, inject_missing_level_urls, validate_urls};

const TECHNICAL_APOLOGY: &str =
    "¡Hola! Tuve un pequeño problema técnico. ¿Podrías repetir tu mensaje?";

const LEAK_RETRY_PROMPT: &str =
    "Tuve un pequeño problema al buscar esa información. ¿Podrías repetirme tu pregunta?";

/// Leaked tool-call argument: `get_levels_by_campus("Puebla")` written as text.
static LEAK_ARG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:get_levels_by_campus|get_campus_info)\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

static GREETING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^¡?hola[^.!?]{0,60}[.!?]\s*").unwrap());

static INTRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^soy emma[^.!?]{0,80}[.!?]\s*").unwrap());

/// Run the Format stage over the machine state.
pub(crate) fn format_reply(state: &mut AgentState, tools: &ToolRouter) {
    // Kill-switch completion: replace the reply entirely, skip everything else
    if state.data_collected {
        tracing::info!("Deterministic close: intake complete");
        let message = format!(
            "¡Gracias {}! Ya tengo todos tus datos. Un asesor te dará toda la información personalizada en tu cita, agenda aquí: {{BOOKING_LINK}} 🦉",
            state.user_name,
        );
        let campus = state.campus_context.clone();
        finish(state, message, true, campus, CapturedFields::default());
        return;
    }

    // Latest non-empty assistant message, or a fixed apology
    let Some(raw) = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
        .map(|m| m.content.clone())
    else {
        finish(state, TECHNICAL_APOLOGY.to_string(), true, String::new(), CapturedFields::default());
        return;
    };

    let mut text = raw.trim_start_matches(REPLY_MARKER).to_string();

    // Leaked code-style tool invocation: try direct execution recovery
    if has_code_leak(&text) {
        tracing::warn!(preview = %preview(&text, 120), "Code leak detected in model reply");
        text = match recover_from_code_leak(&text, &state.campus_context, tools) {
            Some(recovered) => {
                tracing::info!("Code leak recovered via direct tool execution");
                recovered
            }
            None => LEAK_RETRY_PROMPT.to_string(),
        };
    }

    text = clean_model_response(&text);

    // With no tool URL this turn, proactively fetch the catalogue so reply
    // URLs can be repaired instead of just deleted
    let recovery_data = if !has_tool_urls(&state.messages) && !state.campus_context.is_empty() {
        let fetched = tools.levels_by_campus(&state.campus_context);
        if fetched.is_some() {
            tracing::info!(campus = %state.campus_context, "URL recovery: catalogue fetched");
        }
        fetched
    } else {
        None
    };

    text = validate_urls(&text, &state.messages, recovery_data.as_deref());
    text = inject_missing_level_urls(&text, &state.messages, recovery_data.as_deref());

    // Never re-greet after the first turn
    if !state.is_first_turn {
        text = GREETING_RE.replace(&text, "").to_string();
        text = INTRO_RE.replace(&text, "").to_string();
    }

    if text.trim().is_empty() {
        let names = tools.registry().all_names();
        text = format!(
            "¿En cuál de nuestros planteles te gustaría inscribir a tu hijo/a? Tenemos {}.",
            join_with_y(&names),
        );
    }

    // Deterministic overrides: never trust the model's own claims
    let detected_campus = tools
        .registry()
        .detect_in_text(&text)
        .map(|loc| loc.normalized.clone())
        .unwrap_or_else(|| state.campus_context.clone());
    let is_relevant = !reply_marks_not_a_prospect(&text);
    let captured = captured_this_turn(state);

    tracing::info!(
        relevant = is_relevant,
        campus = %detected_campus,
        len = text.len(),
        "Format stage complete"
    );

    finish(state, text, is_relevant, detected_campus, captured);
}

/// Deterministic per-turn capture from the newest user message.
fn captured_this_turn(state: &AgentState) -> CapturedFields {
    let Some(latest) = state.latest_user_text() else {
        return CapturedFields::default();
    };
    CapturedFields {
        campus: None,
        level: detect_level_keyword(latest).map(capitalize),
        guardian_name: None,
        phone: extract_phone(latest),
        email: extract_email(latest),
    }
}

/// Parse the intended tool name/argument out of leaked text, execute the
/// matching lookup directly, and build a clean reply from the result.
fn recover_from_code_leak(text: &str, campus_context: &str, tools: &ToolRouter) -> Option<String> {
    let campus_arg = LEAK_ARG_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| campus_context.to_string());

    if campus_arg.is_empty() {
        return None;
    }

    // Levels first: the most common leak
    if text.contains("get_levels_by_campus") || !text.contains("get_campus_info") {
        if let Some(result) = tools.levels_by_campus(&campus_arg) {
            return Some(format!(
                "Estos son los niveles educativos disponibles en plantel {}:\n\n{}\n\n¿Cuál te interesa? 🦉",
                campus_arg, result,
            ));
        }
    }

    if text.contains("get_campus_info") {
        if let Some(result) = tools.campus_info(&campus_arg) {
            return Some(result);
        }
    }

    None
}

fn finish(
    state: &mut AgentState,
    message: String,
    is_relevant: bool,
    detected_campus: String,
    captured: CapturedFields,
) {
    state
        .messages
        .push(Message::assistant(format!("{}{}", REPLY_MARKER, message)));
    state.reply = Some(StructuredReply {
        is_relevant,
        message,
        detected_campus,
        captured,
    });
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn join_with_y(names: &[&str]) -> String {
    match names.len() {
        0 => String::new(),
        1 => names[0].to_string(),
        n => format!("{} y {}", names[..n - 1].join(", "), names[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admissions_agent_config::{LocationRegistry, ObjectionCatalog};
    use std::sync::Arc;

    fn router() -> ToolRouter {
        ToolRouter::new(
            Arc::new(LocationRegistry::default()),
            Arc::new(ObjectionCatalog::default()),
        )
    }

    fn state_with_assistant(raw: &str, campus: &str, first_turn: bool) -> AgentState {
        let mut state = AgentState::new(
            vec![Message::user("hola"), Message::assistant(raw)],
            "c1",
            "Ana",
            campus,
            "loc-1",
            None,
            false,
        );
        state.is_first_turn = first_turn;
        state
    }

    #[test]
    fn missing_assistant_reply_substitutes_apology() {
        let tools = router();
        let mut state = AgentState::new(
            vec![Message::user("hola")],
            "c1",
            "Ana",
            "",
            "loc-1",
            None,
            false,
        );
        format_reply(&mut state, &tools);
        assert_eq!(state.reply.as_ref().unwrap().message, TECHNICAL_APOLOGY);
    }

    #[test]
    fn code_leak_recovers_via_direct_execution() {
        let tools = router();
        let mut state =
            state_with_assistant("print(get_levels_by_campus(\"Puebla\"))", "Puebla", false);
        format_reply(&mut state, &tools);
        let reply = state.reply.unwrap();
        assert!(reply.message.contains("Estos son los niveles educativos"));
        assert!(reply.message.contains("https://monteverde.edu.mx/puebla/secundaria"));
    }

    #[test]
    fn code_leak_without_recoverable_campus_uses_retry_prompt() {
        let tools = router();
        let mut state = state_with_assistant("default_api.lookup(\"x\")", "", false);
        format_reply(&mut state, &tools);
        assert_eq!(state.reply.unwrap().message, LEAK_RETRY_PROMPT);
    }

    #[test]
    fn recovery_fetch_injects_level_url_without_tool_calls() {
        let tools = router();
        let mut state = state_with_assistant(
            "¡Claro! Te comparto la información de Secundaria:\n¿Me compartes tu nombre?",
            "Puebla",
            false,
        );
        format_reply(&mut state, &tools);
        let reply = state.reply.unwrap();
        assert!(reply.message.contains("https://monteverde.edu.mx/puebla/secundaria"));
    }

    #[test]
    fn greeting_stripped_on_later_turns_only() {
        let tools = router();
        let raw = "¡Hola Ana! Soy Emma 🦉, tu asistente. ¿Me compartes tu correo?";
        let mut state = state_with_assistant(raw, "Puebla", false);
        format_reply(&mut state, &tools);
        let message = state.reply.unwrap().message;
        assert!(!message.starts_with("¡Hola"));
        assert!(message.contains("¿Me compartes tu correo?"));

        let mut state = state_with_assistant(raw, "Puebla", true);
        format_reply(&mut state, &tools);
        assert!(state.reply.unwrap().message.starts_with("¡Hola"));
    }

    #[test]
    fn relevance_forced_false_on_not_a_prospect_phrases() {
        let tools = router();
        let mut state = state_with_assistant(
            "Gracias, pero este canal es exclusivo para admisiones de nuevos alumnos.",
            "",
            false,
        );
        format_reply(&mut state, &tools);
        assert!(!state.reply.unwrap().is_relevant);
    }

    #[test]
    fn campus_recomputed_from_final_text() {
        let tools = router();
        let mut state =
            state_with_assistant("¡Perfecto! Te esperamos en el plantel Coatzacoalcos.", "Puebla", false);
        format_reply(&mut state, &tools);
        assert_eq!(state.reply.unwrap().detected_campus, "coatzacoalcos");
    }

    #[test]
    fn emitted_turn_carries_dedup_marker() {
        let tools = router();
        let mut state = state_with_assistant("Mensaje normal de seguimiento, ¿tu correo?", "", false);
        format_reply(&mut state, &tools);
        let last = state.messages.last().unwrap();
        assert!(last.content.starts_with(REPLY_MARKER));
        assert!(!state.reply.unwrap().message.starts_with(REPLY_MARKER));
    }

    #[test]
    fn empty_cleanup_result_falls_back_to_campus_question() {
        let tools = router();
        let mut state = state_with_assistant("```\nsolo codigo\n```", "", false);
        format_reply(&mut state, &tools);
        let message = state.reply.unwrap().message;
        assert!(message.contains("¿En cuál de nuestros planteles"));
        assert!(message.contains("Puebla, Poza Rica y Coatzacoalcos"));
    }

    #[test]
    fn captured_fields_extracted_from_latest_user_message() {
        let tools = router();
        let mut state = AgentState::new(
            vec![
                Message::user("me interesa secundaria, tel 2221234567, correo ana@example.com"),
                Message::assistant("¡Excelente! ¿Me confirmas tu plantel?"),
            ],
            "c1",
            "Ana",
            "Puebla",
            "loc-1",
            None,
            false,
        );
        format_reply(&mut state, &tools);
        let captured = state.reply.unwrap().captured;
        assert_eq!(captured.level.as_deref(), Some("Secundaria"));
        assert_eq!(captured.phone.as_deref(), Some("2221234567"));
        assert_eq!(captured.email.as_deref(), Some("ana@example.com"));
    }
}
