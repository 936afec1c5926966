//! Keyword classifiers over immutable pattern tables

/// Administrative topics that belong to the school office, not admissions.
const ADMIN_KEYWORDS: &[&str] = &[
    "boleta",
    "kardex",
    "servicio social",
    "baja temporal",
    "baja definitiva",
    "reinscripción",
    "reinscripcion",
    "certificado",
    "constancia",
    "credencial",
    "cambio de escuela",
    "equivalencia",
    "revalidación",
    "revalidacion",
    "historial académico",
    "historial academico",
    "pago de colegiatura",
    "factura",
    "estado de cuenta",
    "plataforma",
    "moodle",
    "contraseña",
    "password",
];

/// Short messages asking for a person instead of the bot.
const HUMAN_KEYWORDS: &[&str] = &["asesor", "humano", "persona", "alguien", "agendar", "cita"];

/// Educational level vocabulary (Spanish + the English variants seen on
/// social channels).
const LEVEL_KEYWORDS: &[&str] = &[
    "preescolar",
    "kinder",
    "kínder",
    "kindergarten",
    "primaria",
    "elementary",
    "secundaria",
    "middle",
    "bachillerato",
    "preparatoria",
    "prepa",
    "high school",
];

/// Enrollment-intent vocabulary used by the lead scorer.
const INSCRIPTION_KEYWORDS: &[&str] = &[
    "inscribirme",
    "inscripción",
    "inscripcion",
    "inscribir a mi hijo",
    "inscribir a mi hija",
    "me quiero inscribir",
    "inicio de clases",
    "cuando empiezan",
    "cuándo empiezan",
    "próximo ciclo",
    "proximo ciclo",
    "periodo escolar",
    "ciclo escolar",
    "registrarme",
    "registrar a mi hijo",
    "quiero inscribir",
    "nuevo ingreso",
];

/// Phrases in a FINAL reply that mark the exchange as not-a-prospect.
/// Presence of any forces relevance to false regardless of the model's claim.
const NOT_A_PROSPECT_PHRASES: &[&str] = &[
    "este canal es exclusivo",
    "no tengo acceso a funciones de sistema",
    "no es ventas",
    "bolsa de trabajo",
    "recursos humanos",
    "asistente de admisiones para nuevos alumnos",
    "área correspondiente",
    "asesor especializado te contactará para atender",
];

/// Phrases indicating the inbound came through the public website.
const WEBSITE_SOURCE_KEYWORDS: &[&str] = &[
    "sitio web",
    "página web",
    "pagina web",
    "tu web",
    "su web",
    "tu sitio",
    "su sitio",
];

/// Matched administrative keyword, if the message is an administrative
/// request (report cards, transcripts, tuition payments, ...).
pub fn detect_admin_topic(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    ADMIN_KEYWORDS.iter().copied().find(|kw| lower.contains(kw))
}

/// True when the user explicitly asks for a human. Long messages are not
/// treated as a request even when a keyword appears, to avoid false
/// positives on full sentences that merely mention an advisor.
pub fn is_human_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.chars().count() < 50 && HUMAN_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// First educational-level keyword present in the text.
pub fn detect_level_keyword(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    LEVEL_KEYWORDS.iter().copied().find(|kw| lower.contains(kw))
}

pub fn mentions_inscription_intent(message: &str) -> bool {
    let lower = message.to_lowercase();
    INSCRIPTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Deterministic relevance override on the final reply text.
pub fn reply_marks_not_a_prospect(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    NOT_A_PROSPECT_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn is_website_source(message: &str) -> bool {
    let lower = message.to_lowercase();
    WEBSITE_SOURCE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// A reply stuck re-introducing the assistant or re-asking the opening
/// enrollment question.
pub fn is_greeting_loop(reply: &str) -> bool {
    reply.contains("Soy Emma") || reply.contains("inscribir")
}
