//! Conversation orchestration and guardrail engine
//!
//! The only crate with real control-flow design:
//! - `machine`: the five-state per-turn dialogue state machine
//! - `format`: the deterministic post-model formatting/guardrail stage
//! - `loop_detector`: similarity-based repetition detection
//! - `sanitize`: model-output integrity scanners and outbound validation
//! - `url_guard`: anti-hallucination URL validation, repair, and injection
//! - `scoring`: deterministic lead scoring
//! - `orchestrator`: the per-message pipeline composing all of the above
//!   against the persisted lead state and the external collaborators

pub mod format;
pub mod loop_detector;
pub mod machine;
pub mod orchestrator;
pub mod prompt;
pub mod sanitize;
pub mod scoring;
pub mod state;
pub mod url_guard;

pub use loop_detector::{detect_history_loop, detect_loop, similarity_ratio};
pub use machine::{DialogueMachine, MAX_TOOL_ROUNDS};
pub use orchestrator::{ConversationOrchestrator, InboundMessage, PipelineOutcome, ProcessedData};
pub use sanitize::REPLY_MARKER;
pub use scoring::{calculate_score, score_tag, ScoreContext, ALL_SCORE_TAGS};
pub use state::AgentState;
