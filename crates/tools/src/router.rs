//! Tool execution against the domain data

use std::sync::Arc;

use admissions_agent_config::{LocationConfig, LocationRegistry, ObjectionCatalog};
use admissions_agent_core::ToolCall;

use crate::{ToolError, ToolKind};

/// Fallback answer when an objection topic has no playbook entry.
const OBJECTION_FALLBACK: &str = "Esa es una excelente pregunta. En la cita con tu asesor podrás resolver todas tus dudas. ¿Te gustaría agendar?";

const LEVEL_TYPE_ORDER: [&str; 4] = ["preescolar", "primaria", "secundaria", "bachillerato"];

/// Executes model tool calls against the campus registry and the objection
/// playbook. Stateless; one router serves all requests.
pub struct ToolRouter {
    registry: Arc<LocationRegistry>,
    objections: Arc<ObjectionCatalog>,
}

impl ToolRouter {
    pub fn new(registry: Arc<LocationRegistry>, objections: Arc<ObjectionCatalog>) -> Self {
        Self { registry, objections }
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    /// Execute one requested tool call. The returned string is the tool
    /// result text fed back to the model; lookup misses produce sentinel
    /// "not found" text rather than errors.
    pub fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let kind = ToolKind::from_name(&call.name)?;
        let arg = call
            .arguments
            .get(kind.arg_key())
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: kind.name(),
                reason: format!("missing string argument '{}'", kind.arg_key()),
            })?;

        tracing::debug!(tool = kind.name(), arg = %arg, "Executing tool call");

        Ok(match kind {
            ToolKind::CampusInfo => self.campus_info_text(arg),
            ToolKind::LevelsByCampus => self.levels_text(arg),
            ToolKind::ObjectionLookup => self.objection_text(arg),
        })
    }

    /// Campus info, or None when the campus is unknown. Used directly by the
    /// code-leak recovery path.
    pub fn campus_info(&self, campus_name: &str) -> Option<String> {
        self.registry.find_campus(campus_name).map(render_campus_info)
    }

    /// Level catalogue with URLs, or None when the campus is unknown or has
    /// no programs. Used by the URL-recovery fetch and code-leak recovery.
    pub fn levels_by_campus(&self, campus_name: &str) -> Option<String> {
        let campus = self.registry.find_campus(campus_name)?;
        if campus.programs.is_empty() {
            return None;
        }
        Some(render_levels(campus))
    }

    fn campus_info_text(&self, campus_name: &str) -> String {
        self.campus_info(campus_name).unwrap_or_else(|| {
            format!("No se encontró información para el plantel: {}", campus_name)
        })
    }

    fn levels_text(&self, campus_name: &str) -> String {
        self.levels_by_campus(campus_name).unwrap_or_else(|| {
            format!("No se encontraron niveles educativos para el plantel: {}", campus_name)
        })
    }

    fn objection_text(&self, topic: &str) -> String {
        match self.objections.match_topic(topic) {
            Some(entry) => {
                let mut response = entry.response_template.clone();
                if entry.redirect_to_booking {
                    response.push_str(" ¿Te gustaría agendar tu cita para conocer todos los detalles?");
                }
                response
            }
            None => OBJECTION_FALLBACK.to_string(),
        }
    }
}

fn render_campus_info(campus: &LocationConfig) -> String {
    format!(
        "Plantel: {}\nDirección: {}\nTeléfono: {}\nSitio web: {}",
        campus.name, campus.address, campus.phone, campus.website
    )
}

fn render_levels(campus: &LocationConfig) -> String {
    let mut out = format!("Niveles educativos disponibles en plantel {}:\n\n", campus.name);

    let mut rendered: Vec<&str> = Vec::new();
    for level_type in LEVEL_TYPE_ORDER {
        let group: Vec<_> = campus
            .programs
            .iter()
            .filter(|p| p.level_type == level_type)
            .collect();
        if group.is_empty() {
            continue;
        }
        rendered.push(level_type);
        out.push_str(&format!("{}:\n", level_type.to_uppercase()));
        for program in group {
            out.push_str(&format!("- {} → {}\n", program.name, program.url));
        }
        out.push('\n');
    }

    // Level types outside the canonical order still render
    for program in &campus.programs {
        if !rendered.contains(&program.level_type.as_str()) {
            out.push_str(&format!(
                "{}:\n- {} → {}\n\n",
                program.level_type.to_uppercase(),
                program.name,
                program.url
            ));
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> ToolRouter {
        ToolRouter::new(
            Arc::new(LocationRegistry::default()),
            Arc::new(ObjectionCatalog::default()),
        )
    }

    fn call(name: &str, key: &str, value: &str) -> ToolCall {
        ToolCall {
            id: "tu_1".into(),
            name: name.into(),
            arguments: json!({ key: value }),
        }
    }

    #[test]
    fn levels_render_grouped_with_urls() {
        let text = router()
            .execute(&call("get_levels_by_campus", "campus_name", "Puebla"))
            .unwrap();
        assert!(text.starts_with("Niveles educativos disponibles en plantel Puebla:"));
        assert!(text.contains("SECUNDARIA:"));
        assert!(text.contains("- Secundaria Puebla → https://monteverde.edu.mx/puebla/secundaria"));
        let preescolar_pos = text.find("PREESCOLAR:").unwrap();
        let bachillerato_pos = text.find("BACHILLERATO:").unwrap();
        assert!(preescolar_pos < bachillerato_pos);
    }

    #[test]
    fn unknown_campus_yields_sentinel_text() {
        let text = router()
            .execute(&call("get_levels_by_campus", "campus_name", "Monterrey"))
            .unwrap();
        assert!(text.contains("No se encontraron niveles educativos"));
        assert!(router().levels_by_campus("Monterrey").is_none());
    }

    #[test]
    fn campus_info_includes_website() {
        let text = router()
            .execute(&call("get_campus_info", "campus_name", "coatza"))
            .unwrap();
        assert!(text.contains("Plantel: Coatzacoalcos"));
        assert!(text.contains("Sitio web: https://monteverde.edu.mx/coatzacoalcos"));
    }

    #[test]
    fn objection_lookup_appends_booking_redirect() {
        let text = router()
            .execute(&call("get_objection_response", "topic", "colegiaturas"))
            .unwrap();
        assert!(text.contains("becas y planes de pago"));
        assert!(text.ends_with("¿Te gustaría agendar tu cita para conocer todos los detalles?"));
    }

    #[test]
    fn unmatched_objection_uses_fallback() {
        let text = router()
            .execute(&call("get_objection_response", "topic", "astronomía"))
            .unwrap();
        assert_eq!(text, OBJECTION_FALLBACK);
    }

    #[test]
    fn unknown_tool_and_bad_args_error() {
        assert!(matches!(
            router().execute(&call("self_destruct", "x", "y")),
            Err(ToolError::UnknownTool(_))
        ));
        let missing = ToolCall {
            id: "tu_2".into(),
            name: "get_campus_info".into(),
            arguments: json!({}),
        };
        assert!(matches!(
            router().execute(&missing),
            Err(ToolError::InvalidArguments { .. })
        ));
    }
}
