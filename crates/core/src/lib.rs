//! Core traits and types for the admissions agent
//!
//! This crate provides the foundational types used across all other crates:
//! - Lead intake state (the five-field capture record)
//! - Conversation turn types
//! - Channel taxonomy and normalization helpers
//! - LLM message/tool wire types
//! - Collaborator traits (model, stores, advisor directory, CRM)
//! - Error types

pub mod channel;
pub mod conversation;
pub mod error;
pub mod lead;
pub mod llm_types;
pub mod reply;
pub mod traits;

// Re-exports from modules
pub use channel::Channel;
pub use conversation::{Turn, TurnRole};
pub use error::{CollaboratorError, CollaboratorResult};
pub use lead::{BookingState, CapturedFields, LeadState, SlotField, SLOT_ORDER};
pub use llm_types::{
    FinishReason, GenerationResult, Message, Role, ToolCall, ToolDefinition,
};
pub use reply::StructuredReply;

// Trait re-exports
pub use traits::{
    Advisor, AdvisorDirectory, ConversationStore, CrmApi, CrmContact, CrmMessage,
    LanguageModel, LeadStateStore,
};
