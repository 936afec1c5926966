//! Language model trait

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::llm_types::{GenerationResult, Message, ToolDefinition};

/// A language model capable of tool use over an ordered turn list.
///
/// Implementations must never panic on malformed provider output; map it to
/// `CollaboratorError::Model` and let the caller degrade.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the next assistant message (final text or tool-call request).
    async fn generate(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> CollaboratorResult<GenerationResult>;
}
