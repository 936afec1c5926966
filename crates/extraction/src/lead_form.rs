//! Lead-form message parsing
//!
//! Lead ads submissions arrive through the message channel as a block of
//! `field:: value` (or `field: value`) lines. They carry pre-captured intake
//! data and must survive the outbound/agent-type webhook filters.

use std::collections::HashMap;

/// Markers that identify a lead-form payload.
pub const LEAD_FORM_INDICATORS: &[&str] = &[
    "Source URL:",
    "Completé el formulario",
    "elige_tu_campus",
    "first_name:",
    "last_name:",
    "Headline:",
];

const CAMPUS_FIELD_KEYS: &[&str] = &[
    "elige_tu_campus_más_cercano",
    "elige_tu_campus_mas_cercano",
    "campus",
];

/// Parsed lead-form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFormData {
    pub campus: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub level_interest: String,
    pub source_url: String,
    pub raw_fields: HashMap<String, String>,
}

impl LeadFormData {
    /// How many of the four core fields (name, phone, email, campus) are set.
    pub fn core_fields_filled(&self) -> usize {
        [&self.full_name, &self.phone, &self.email, &self.campus]
            .iter()
            .filter(|v| !v.is_empty())
            .count()
    }
}

/// True when the raw message carries lead-form markers.
pub fn looks_like_lead_form(message: &str) -> bool {
    LEAD_FORM_INDICATORS.iter().any(|ind| message.contains(ind))
}

/// Parse a lead-form message. Returns None for ordinary messages.
pub fn parse_lead_form(message: &str) -> Option<LeadFormData> {
    if message.is_empty() || !looks_like_lead_form(message) {
        return None;
    }

    let mut fields: HashMap<String, String> = HashMap::new();
    for line in message.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts = if let Some((k, v)) = line.split_once("::") {
            Some((k, v))
        } else if !line.starts_with("http") {
            line.split_once(':')
        } else {
            None
        };

        if let Some((key, value)) = parts {
            let key = key.trim().to_lowercase().replace(' ', "_");
            let value = value.trim();
            if !value.is_empty() {
                fields.insert(key, value.to_string());
            }
        }
    }

    if fields.is_empty() {
        return None;
    }

    let get = |key: &str| fields.get(key).cloned().unwrap_or_default();

    let campus = CAMPUS_FIELD_KEYS
        .iter()
        .find_map(|k| fields.get(*k))
        .cloned()
        .unwrap_or_default();

    // Any interest-like field that is not the campus selector
    let level_interest = fields
        .iter()
        .find(|(key, _)| {
            !CAMPUS_FIELD_KEYS.contains(&key.as_str())
                && ["interés", "interes", "carrera", "nivel", "grado", "programa"]
                    .iter()
                    .any(|kw| key.contains(kw))
        })
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let first_name = get("first_name");
    let last_name = get("last_name");
    let full_name = format!("{} {}", first_name, last_name).trim().to_string();

    let phone = fields
        .get("phone_number")
        .or_else(|| fields.get("phone"))
        .or_else(|| fields.get("telefono"))
        .cloned()
        .unwrap_or_default();

    let email = fields
        .get("email")
        .or_else(|| fields.get("correo"))
        .cloned()
        .unwrap_or_default();

    let data = LeadFormData {
        campus,
        first_name,
        last_name,
        full_name,
        phone,
        email,
        level_interest,
        source_url: get("source_url"),
        raw_fields: fields,
    };

    tracing::info!(
        campus = %data.campus,
        name = %data.full_name,
        phone = %data.phone,
        email = %data.email,
        "Lead form parsed"
    );

    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = "Completé el formulario\n\
        first_name:: Ana\n\
        last_name:: López\n\
        phone_number:: +52 222 123 4567\n\
        email:: ana@example.com\n\
        elige_tu_campus_más_cercano:: Puebla\n\
        nivel_de_interés:: Secundaria\n\
        Source URL:: https://fb.com/ads/123";

    #[test]
    fn parses_full_form() {
        let data = parse_lead_form(FORM).unwrap();
        assert_eq!(data.full_name, "Ana López");
        assert_eq!(data.campus, "Puebla");
        assert_eq!(data.level_interest, "Secundaria");
        assert_eq!(data.email, "ana@example.com");
        assert_eq!(data.core_fields_filled(), 4);
    }

    #[test]
    fn ordinary_messages_are_not_forms() {
        assert!(parse_lead_form("Hola: quiero informes").is_none());
        assert!(parse_lead_form("").is_none());
    }

    #[test]
    fn single_colon_lines_parse_but_urls_do_not() {
        let data = parse_lead_form("first_name: Luis\nhttps://x.com/a:b\nHeadline: Promo").unwrap();
        assert_eq!(data.first_name, "Luis");
        assert!(!data.raw_fields.contains_key("https"));
    }
}
