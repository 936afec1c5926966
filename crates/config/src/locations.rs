//! Campus registry
//!
//! Single source of truth for campus ↔ CRM-location mappings, keyword
//! detection tables, and the per-campus program catalogue with canonical
//! URLs. Loadable from YAML; ships with the three-campus default so the
//! agent runs without a data file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// One educational program offered at a campus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    /// Grouping key: preescolar | primaria | secundaria | bachillerato
    pub level_type: String,
    pub url: String,
}

/// Static configuration for one campus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// CRM sub-account id
    pub location_id: String,
    /// Human-readable campus name ("Poza Rica")
    pub name: String,
    /// Normalized id used in detection results ("pozarica")
    pub normalized: String,
    /// Keywords that identify this campus in free text
    pub keywords: Vec<String>,
    /// Environment variable holding this location's CRM token
    pub token_env: String,
    pub address: String,
    pub phone: String,
    pub website: String,
    #[serde(default)]
    pub programs: Vec<Program>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocationsFile {
    locations: Vec<LocationConfig>,
}

/// Campus registry with compiled keyword matchers.
#[derive(Debug)]
pub struct LocationRegistry {
    locations: Vec<LocationConfig>,
    /// One word-boundary regex per campus, same order as `locations`
    matchers: Vec<Regex>,
}

impl LocationRegistry {
    pub fn new(locations: Vec<LocationConfig>) -> Self {
        let matchers = locations
            .iter()
            .map(|loc| {
                let alternatives = loc
                    .keywords
                    .iter()
                    .map(|kw| regex::escape(&kw.to_lowercase()))
                    .collect::<Vec<_>>()
                    .join("|");
                // keywords are validated non-empty below; an empty pattern
                // would match everywhere
                Regex::new(&format!(r"\b(?:{})\b", alternatives))
                    .unwrap_or_else(|_| Regex::new(r"\b\z").unwrap())
            })
            .collect();
        Self { locations, matchers }
    }

    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::DomainFile {
            path: path.display().to_string(),
            source,
        })?;
        let file: LocationsFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::DomainParse {
                path: path.display().to_string(),
                source,
            })?;
        if file.locations.is_empty() {
            return Err(ConfigError::Invalid("locations file has no entries".into()));
        }
        for loc in &file.locations {
            if loc.keywords.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "location {} has no keywords",
                    loc.name
                )));
            }
        }
        Ok(Self::new(file.locations))
    }

    /// Load from a path, falling back to the compiled-in default.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => {
                tracing::info!(path = %path.display(), count = registry.locations.len(), "Campus registry loaded");
                registry
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Campus registry file unavailable, using built-in default");
                Self::default()
            }
        }
    }

    pub fn all(&self) -> &[LocationConfig] {
        &self.locations
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.locations.iter().map(|l| l.name.as_str()).collect()
    }

    /// Lookup by CRM location id.
    pub fn by_location_id(&self, location_id: &str) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.location_id == location_id)
    }

    /// Campus name for a location id; the first configured campus is the
    /// default for unknown ids (mirrors CRM-token fallback behavior).
    pub fn campus_name(&self, location_id: &str) -> &str {
        self.by_location_id(location_id)
            .map(|l| l.name.as_str())
            .unwrap_or_else(|| self.locations[0].name.as_str())
    }

    /// Resolve a campus by name, normalized id, or keyword. Space- and
    /// case-insensitive so "pozarica" finds "Poza Rica".
    pub fn find_campus(&self, query: &str) -> Option<&LocationConfig> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return None;
        }
        let q_compact: String = q.chars().filter(|c| !c.is_whitespace()).collect();
        self.locations.iter().find(|loc| {
            loc.normalized == q
                || loc.name.to_lowercase() == q
                || loc.name.to_lowercase().replace(' ', "") == q_compact
                || loc.keywords.iter().any(|kw| kw.to_lowercase() == q)
        })
    }

    /// Resolve a campus name/keyword to its CRM location id.
    pub fn location_id_for(&self, query: &str) -> Option<&str> {
        self.find_campus(query).map(|l| l.location_id.as_str())
    }

    /// Detect the first campus whose keywords appear (word-bounded) in free
    /// text. Returns the normalized campus id.
    pub fn detect_in_text(&self, text: &str) -> Option<&LocationConfig> {
        let lower = text.to_lowercase();
        self.matchers
            .iter()
            .position(|m| m.is_match(&lower))
            .map(|i| &self.locations[i])
    }
}

impl Default for LocationRegistry {
    fn default() -> Self {
        Self::new(default_locations())
    }
}

fn program(name: &str, level_type: &str, url: &str) -> Program {
    Program {
        name: name.to_string(),
        level_type: level_type.to_string(),
        url: url.to_string(),
    }
}

fn default_locations() -> Vec<LocationConfig> {
    vec![
        LocationConfig {
            location_id: "Lpb4QWcASxVmdPTJnZQ9".to_string(),
            name: "Puebla".to_string(),
            normalized: "puebla".to_string(),
            keywords: vec!["puebla".into(), "pue".into()],
            token_env: "CRM_TOKEN_PUEBLA".to_string(),
            address: "Av. Orión Sur 1549, Reserva Territorial Atlixcáyotl, C.P. 72590".to_string(),
            phone: "222-169-1699".to_string(),
            website: "https://monteverde.edu.mx/puebla".to_string(),
            programs: vec![
                program("Preescolar Puebla", "preescolar", "https://monteverde.edu.mx/puebla/preescolar"),
                program("Primaria Puebla", "primaria", "https://monteverde.edu.mx/puebla/primaria"),
                program("Secundaria Puebla", "secundaria", "https://monteverde.edu.mx/puebla/secundaria"),
                program("Bachillerato Puebla", "bachillerato", "https://monteverde.edu.mx/puebla/bachillerato"),
            ],
        },
        LocationConfig {
            location_id: "tkM3qS0HbyDfa2LWuEXR".to_string(),
            name: "Poza Rica".to_string(),
            normalized: "pozarica".to_string(),
            keywords: vec!["poza rica".into(), "pozarica".into(), "poza".into()],
            token_env: "CRM_TOKEN_POZARICA".to_string(),
            address: "Carr. Poza Rica - Cazones, Col. La Rueda, C.P. 93306".to_string(),
            phone: "782-111-5970".to_string(),
            website: "https://monteverde.edu.mx/poza-rica".to_string(),
            programs: vec![
                program("Primaria Poza Rica", "primaria", "https://monteverde.edu.mx/poza-rica/primaria"),
                program("Secundaria Poza Rica", "secundaria", "https://monteverde.edu.mx/poza-rica/secundaria"),
                program("Bachillerato Poza Rica", "bachillerato", "https://monteverde.edu.mx/poza-rica/bachillerato"),
            ],
        },
        LocationConfig {
            location_id: "XcWpa7VKe0QnB5dRjLu2".to_string(),
            name: "Coatzacoalcos".to_string(),
            normalized: "coatzacoalcos".to_string(),
            keywords: vec!["coatzacoalcos".into(), "coatza".into()],
            token_env: "CRM_TOKEN_COATZACOALCOS".to_string(),
            address: "Av. Universidad Veracruzana 2920, Fovissste, C.P. 96536".to_string(),
            phone: "921-210-6827".to_string(),
            website: "https://monteverde.edu.mx/coatzacoalcos".to_string(),
            programs: vec![
                program("Preescolar Coatzacoalcos", "preescolar", "https://monteverde.edu.mx/coatzacoalcos/preescolar"),
                program("Primaria Coatzacoalcos", "primaria", "https://monteverde.edu.mx/coatzacoalcos/primaria"),
                program("Secundaria Coatzacoalcos", "secundaria", "https://monteverde.edu.mx/coatzacoalcos/secundaria"),
                program("Bachillerato Coatzacoalcos", "bachillerato", "https://monteverde.edu.mx/coatzacoalcos/bachillerato"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_campus_by_name_keyword_and_compact_form() {
        let registry = LocationRegistry::default();
        assert_eq!(registry.find_campus("Puebla").unwrap().normalized, "puebla");
        assert_eq!(registry.find_campus("coatza").unwrap().normalized, "coatzacoalcos");
        assert_eq!(registry.find_campus("pozarica").unwrap().name, "Poza Rica");
        assert!(registry.find_campus("monterrey").is_none());
    }

    #[test]
    fn detects_campus_with_word_boundaries() {
        let registry = LocationRegistry::default();
        let hit = registry.detect_in_text("Me interesa el plantel de Poza Rica");
        assert_eq!(hit.unwrap().normalized, "pozarica");

        // "pue" must not fire inside another word
        assert!(registry.detect_in_text("respuesta").is_none());
        assert_eq!(
            registry.detect_in_text("plantel pue por favor").unwrap().normalized,
            "puebla"
        );
    }

    #[test]
    fn unknown_location_id_falls_back_to_first_campus() {
        let registry = LocationRegistry::default();
        assert_eq!(registry.campus_name("nope"), "Puebla");
    }

    #[test]
    fn programs_carry_canonical_urls() {
        let registry = LocationRegistry::default();
        let poza = registry.find_campus("poza rica").unwrap();
        assert!(poza.programs.iter().all(|p| p.url.starts_with("https://monteverde.edu.mx/")));
        // Poza Rica has no preschool
        assert!(!poza.programs.iter().any(|p| p.level_type == "preescolar"));
    }
}
