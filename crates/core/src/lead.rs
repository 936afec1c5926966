//! Lead intake state
//!
//! One [`LeadState`] record exists per contact, created on the first inbound
//! message and never deleted. Capture is monotonic: a field that has been
//! filled is never cleared by a later empty value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five required intake fields, in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Campus,
    Level,
    GuardianName,
    Phone,
    Email,
}

/// Fixed capture order used for `current_step` and prompt assembly.
pub const SLOT_ORDER: [SlotField; 5] = [
    SlotField::Campus,
    SlotField::Level,
    SlotField::GuardianName,
    SlotField::Phone,
    SlotField::Email,
];

impl SlotField {
    /// Human label used in the confirmed/pending prompt block.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Campus => "Plantel",
            Self::Level => "Nivel Educativo",
            Self::GuardianName => "Nombre del padre/madre/tutor",
            Self::Phone => "WhatsApp/Teléfono",
            Self::Email => "Email",
        }
    }
}

/// Fields captured during a single turn (a subset of the five slots).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFields {
    pub campus: Option<String>,
    pub level: Option<String>,
    pub guardian_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CapturedFields {
    pub fn is_empty(&self) -> bool {
        self.campus.is_none()
            && self.level.is_none()
            && self.guardian_name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }

    /// Build from loosely named key/value pairs. Accepts the alias keys the
    /// model and the lead-form parser produce.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut captured = Self::default();
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "campus" | "detected_campus" | "plantel" => {
                    captured.campus = Some(value.to_string())
                }
                "level" | "programa" | "program_interest" | "nivel" => {
                    captured.level = Some(value.to_string())
                }
                "guardian_name" | "nombre_completo" | "full_name" => {
                    captured.guardian_name = Some(value.to_string())
                }
                "phone" | "telefono" => captured.phone = Some(value.to_string()),
                "email" | "correo" => captured.email = Some(value.to_string()),
                _ => {}
            }
        }
        captured
    }
}

/// Booking-link bookkeeping for post-booking logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingState {
    pub sent: bool,
    pub post_booking_count: u32,
}

/// Persisted intake record for one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadState {
    pub contact_id: String,
    pub location_id: String,
    pub campus: Option<String>,
    pub level: Option<String>,
    pub guardian_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// 1 + count of contiguously filled fields in `SLOT_ORDER`, capped at 5.
    pub current_step: u8,
    pub is_complete: bool,
    pub booking_sent_at: Option<DateTime<Utc>>,
    pub post_booking_count: u32,
    pub score: u32,
}

impl LeadState {
    pub fn new(contact_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            location_id: location_id.into(),
            campus: None,
            level: None,
            guardian_name: None,
            phone: None,
            email: None,
            current_step: 1,
            is_complete: false,
            booking_sent_at: None,
            post_booking_count: 0,
            score: 0,
        }
    }

    pub fn slot(&self, field: SlotField) -> Option<&str> {
        match field {
            SlotField::Campus => self.campus.as_deref(),
            SlotField::Level => self.level.as_deref(),
            SlotField::GuardianName => self.guardian_name.as_deref(),
            SlotField::Phone => self.phone.as_deref(),
            SlotField::Email => self.email.as_deref(),
        }
    }

    /// Merge captured fields. Monotonic: `None`/empty never clears an existing
    /// value. Returns true when anything changed.
    pub fn merge(&mut self, captured: &CapturedFields) -> bool {
        let mut changed = false;
        changed |= merge_slot(&mut self.campus, &captured.campus);
        changed |= merge_slot(&mut self.level, &captured.level);
        changed |= merge_slot(&mut self.guardian_name, &captured.guardian_name);
        changed |= merge_slot(&mut self.phone, &captured.phone);
        changed |= merge_slot(&mut self.email, &captured.email);
        if changed {
            self.recompute_progress();
        }
        changed
    }

    /// Recompute `current_step` and `is_complete` from the slot values.
    pub fn recompute_progress(&mut self) {
        let mut step: u8 = 1;
        for field in SLOT_ORDER {
            if self.slot(field).is_some() {
                step += 1;
            } else {
                break;
            }
        }
        self.current_step = step.min(5);
        self.is_complete = SLOT_ORDER.iter().all(|f| self.slot(*f).is_some());
    }
}

fn merge_slot(existing: &mut Option<String>, incoming: &Option<String>) -> bool {
    match incoming.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => {
            if existing.as_deref() != Some(value) {
                *existing = Some(value.to_string());
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(
        campus: Option<&str>,
        level: Option<&str>,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> CapturedFields {
        CapturedFields {
            campus: campus.map(String::from),
            level: level.map(String::from),
            guardian_name: name.map(String::from),
            phone: phone.map(String::from),
            email: email.map(String::from),
        }
    }

    #[test]
    fn step_counts_contiguous_prefix_only() {
        let mut lead = LeadState::new("c1", "loc1");
        assert_eq!(lead.current_step, 1);

        // Phone filled out of order does not advance the step past the gap.
        lead.merge(&captured(None, None, None, Some("2221234567"), None));
        assert_eq!(lead.current_step, 1);
        assert!(!lead.is_complete);

        lead.merge(&captured(Some("puebla"), None, None, None, None));
        assert_eq!(lead.current_step, 2);

        lead.merge(&captured(None, Some("Secundaria"), Some("Ana López Ruiz"), None, None));
        // campus, level, name, phone contiguous now
        assert_eq!(lead.current_step, 5);
        assert!(!lead.is_complete);
    }

    #[test]
    fn complete_iff_all_five_filled() {
        let mut lead = LeadState::new("c1", "loc1");
        lead.merge(&captured(
            Some("puebla"),
            Some("Primaria"),
            Some("Ana López"),
            Some("2221234567"),
            None,
        ));
        assert!(!lead.is_complete);

        lead.merge(&captured(None, None, None, None, Some("ana@example.com")));
        assert!(lead.is_complete);
        assert_eq!(lead.current_step, 5);
    }

    #[test]
    fn merge_is_monotonic() {
        let mut lead = LeadState::new("c1", "loc1");
        lead.merge(&captured(Some("puebla"), None, None, None, None));

        let changed = lead.merge(&CapturedFields {
            campus: Some("  ".to_string()),
            ..Default::default()
        });
        assert!(!changed);
        assert_eq!(lead.campus.as_deref(), Some("puebla"));
    }

    #[test]
    fn merge_reports_unchanged_value() {
        let mut lead = LeadState::new("c1", "loc1");
        assert!(lead.merge(&captured(Some("puebla"), None, None, None, None)));
        assert!(!lead.merge(&captured(Some("puebla"), None, None, None, None)));
    }

    #[test]
    fn captured_fields_alias_keys() {
        let captured = CapturedFields::from_pairs([
            ("detected_campus", "pozarica"),
            ("program_interest", "Bachillerato"),
            ("full_name", "Luis Hernández"),
            ("telefono", "7821115970"),
            ("unrelated", "x"),
        ]);
        assert_eq!(captured.campus.as_deref(), Some("pozarica"));
        assert_eq!(captured.level.as_deref(), Some("Bachillerato"));
        assert_eq!(captured.guardian_name.as_deref(), Some("Luis Hernández"));
        assert_eq!(captured.phone.as_deref(), Some("7821115970"));
        assert!(captured.email.is_none());
    }
}
