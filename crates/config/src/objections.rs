//! Objection playbook
//!
//! Keyword-matched scripted rebuttals for common prospect objections
//! (tuition, scholarships, schedules, ...). The agent exposes the catalogue
//! to the model through a lookup tool and injects a category summary into the
//! system instruction.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// One playbook entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectionEntry {
    pub category: String,
    pub trigger_keywords: Vec<String>,
    pub response_template: String,
    /// Append the booking redirect question after the template
    #[serde(default = "default_true")]
    pub redirect_to_booking: bool,
    /// Higher priority entries match first
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectionsFile {
    objections: Vec<ObjectionEntry>,
}

/// In-memory objection catalogue, sorted by priority.
#[derive(Debug, Clone)]
pub struct ObjectionCatalog {
    entries: Vec<ObjectionEntry>,
}

impl ObjectionCatalog {
    pub fn new(mut entries: Vec<ObjectionEntry>) -> Self {
        entries.sort_by_key(|e| std::cmp::Reverse(e.priority));
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::DomainFile {
            path: path.display().to_string(),
            source,
        })?;
        let file: ObjectionsFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::DomainParse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(file.objections))
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                tracing::info!(path = %path.display(), count = catalog.entries.len(), "Objection playbook loaded");
                catalog
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Objection playbook file unavailable, using built-in default");
                Self::default()
            }
        }
    }

    pub fn entries(&self) -> &[ObjectionEntry] {
        &self.entries
    }

    /// Highest-priority entry whose keywords appear in the text.
    pub fn match_topic(&self, text: &str) -> Option<&ObjectionEntry> {
        let lower = text.to_lowercase();
        self.entries.iter().find(|entry| {
            entry
                .trigger_keywords
                .iter()
                .any(|kw| lower.contains(&kw.to_lowercase()))
        })
    }

    /// Category list with sample keywords, for the system instruction.
    pub fn categories_summary(&self) -> String {
        let mut seen = Vec::new();
        let mut lines = Vec::new();
        for entry in &self.entries {
            if seen.contains(&entry.category) {
                continue;
            }
            seen.push(entry.category.clone());
            let sample = entry
                .trigger_keywords
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("- {}: ({})", entry.category, sample));
        }
        lines.join("\n")
    }
}

impl Default for ObjectionCatalog {
    fn default() -> Self {
        Self::new(default_playbook())
    }
}

fn default_true() -> bool {
    true
}

fn entry(
    category: &str,
    keywords: &[&str],
    template: &str,
    redirect: bool,
    priority: i32,
) -> ObjectionEntry {
    ObjectionEntry {
        category: category.to_string(),
        trigger_keywords: keywords.iter().map(|k| k.to_string()).collect(),
        response_template: template.to_string(),
        redirect_to_booking: redirect,
        priority,
    }
}

fn default_playbook() -> Vec<ObjectionEntry> {
    vec![
        entry(
            "colegiaturas",
            &["colegiatura", "costo", "precio", "mensualidad", "cuánto cuesta", "cuanto cuesta"],
            "Las colegiaturas varían por nivel y plantel, y contamos con becas y planes de pago a la medida. Tu asesor te presentará la opción ideal para tu familia.",
            true,
            10,
        ),
        entry(
            "becas",
            &["beca", "becas", "descuento", "apoyo económico", "apoyo economico"],
            "Sí tenemos programa de becas académicas y deportivas. El porcentaje depende de una evaluación sencilla que tu asesor te explicará.",
            true,
            9,
        ),
        entry(
            "inscripcion",
            &["inscripción", "inscripcion", "requisitos", "proceso de admisión", "proceso de admision"],
            "El proceso de inscripción es muy sencillo: una visita al plantel, una evaluación diagnóstica y la entrega de documentos.",
            true,
            8,
        ),
        entry(
            "horarios",
            &["horario", "horarios", "hora de entrada", "hora de salida"],
            "Nuestros horarios varían por nivel; todos incluyen actividades extracurriculares por la tarde.",
            true,
            5,
        ),
        entry(
            "transporte",
            &["transporte", "ruta", "camión", "camion"],
            "Contamos con rutas de transporte escolar en las principales zonas de la ciudad.",
            true,
            5,
        ),
        entry(
            "modelo educativo",
            &["modelo educativo", "método", "metodo", "plan de estudios", "bilingüe", "bilingue"],
            "Nuestro modelo es bilingüe y constructivista, con certificaciones internacionales de inglés y formación en valores.",
            true,
            5,
        ),
        entry(
            "instalaciones",
            &["instalaciones", "canchas", "laboratorio", "biblioteca"],
            "Nuestros planteles cuentan con canchas deportivas, laboratorios de ciencias y cómputo, y biblioteca. En tu visita podrás recorrerlos.",
            true,
            4,
        ),
        entry(
            "uniformes",
            &["uniforme", "uniformes", "útiles", "utiles", "materiales", "lista de útiles"],
            "El paquete de uniformes y la lista de materiales se entregan al completar la inscripción; tu asesor te dará el detalle por nivel.",
            false,
            3,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_keyword_and_priority() {
        let catalog = ObjectionCatalog::default();
        let hit = catalog.match_topic("¿Cuánto cuesta la colegiatura de primaria?").unwrap();
        assert_eq!(hit.category, "colegiaturas");

        // "beca" also appears but tuition has higher priority
        let hit = catalog.match_topic("el costo y si hay beca").unwrap();
        assert_eq!(hit.category, "colegiaturas");
    }

    #[test]
    fn no_match_returns_none() {
        let catalog = ObjectionCatalog::default();
        assert!(catalog.match_topic("hola buenos días").is_none());
    }

    #[test]
    fn summary_lists_each_category_once() {
        let catalog = ObjectionCatalog::default();
        let summary = catalog.categories_summary();
        assert!(summary.contains("- colegiaturas:"));
        assert!(summary.contains("- becas:"));
        assert_eq!(
            summary.matches("- colegiaturas:").count(),
            1,
        );
    }
}
