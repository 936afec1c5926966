//! Collaborator traits
//!
//! Every external dependency of the pipeline sits behind one of these traits
//! so the orchestration logic can be exercised with in-memory fakes. Handles
//! are constructed once at process start and passed in explicitly; there is
//! no ambient service lookup.

mod crm;
mod llm;
mod stores;

pub use crm::{CrmApi, CrmContact, CrmMessage};
pub use llm::LanguageModel;
pub use stores::{Advisor, AdvisorDirectory, ConversationStore, LeadStateStore};
