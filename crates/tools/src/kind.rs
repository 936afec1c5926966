//! Closed tool taxonomy

use serde_json::json;

use admissions_agent_core::ToolDefinition;

use crate::ToolError;

/// The tools the model can request, as a closed tagged set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Address/phone/website for one campus
    CampusInfo,
    /// Educational levels offered at one campus, with canonical URLs
    LevelsByCampus,
    /// Scripted rebuttal for a prospect objection topic
    ObjectionLookup,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] =
        [Self::CampusInfo, Self::LevelsByCampus, Self::ObjectionLookup];

    /// Wire name the model sees.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CampusInfo => "get_campus_info",
            Self::LevelsByCampus => "get_levels_by_campus",
            Self::ObjectionLookup => "get_objection_response",
        }
    }

    /// Resolve a requested tool name; unknown names are an explicit error.
    pub fn from_name(name: &str) -> Result<Self, ToolError> {
        match name {
            "get_campus_info" => Ok(Self::CampusInfo),
            "get_levels_by_campus" => Ok(Self::LevelsByCampus),
            "get_objection_response" => Ok(Self::ObjectionLookup),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Argument key for this tool.
    pub fn arg_key(&self) -> &'static str {
        match self {
            Self::CampusInfo | Self::LevelsByCampus => "campus_name",
            Self::ObjectionLookup => "topic",
        }
    }

    /// Schema definition bound to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, arg_description) = match self {
            Self::CampusInfo => (
                "Obtiene dirección, teléfono y sitio web de un plantel (Puebla, Poza Rica, Coatzacoalcos).",
                "Nombre del plantel",
            ),
            Self::LevelsByCampus => (
                "Obtiene los niveles educativos disponibles en un plantel, con el link oficial de cada nivel.",
                "Nombre del plantel",
            ),
            Self::ObjectionLookup => (
                "Busca una respuesta estandarizada para una objeción o duda del prospecto (colegiaturas, becas, horarios, transporte, modelo educativo, instalaciones, inscripción, uniformes).",
                "Tema de la objeción o duda",
            ),
        };

        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    (self.arg_key()): { "type": "string", "description": arg_description }
                },
                "required": [self.arg_key()],
            }),
        }
    }

    /// All definitions, for binding both tool families.
    pub fn all_definitions() -> Vec<ToolDefinition> {
        Self::ALL.iter().map(|k| k.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = ToolKind::from_name("drop_all_tables").unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "drop_all_tables"));
    }

    #[test]
    fn definitions_declare_required_arg() {
        let defs = ToolKind::all_definitions();
        assert_eq!(defs.len(), 3);
        for (kind, def) in ToolKind::ALL.iter().zip(defs) {
            assert_eq!(def.input_schema["required"][0].as_str().unwrap(), kind.arg_key());
            assert_eq!(def.name, kind.name());
        }
    }
}
