//! Conversation core module
//!
//! Owns the branching message-tree model:
//! - message arena with parent links and guarded walks
//! - branch lifecycle (create/activate/merge/abandon)
//! - context building under message and token budgets
//! - response regeneration via forked branches
//! - the façade that serializes per-conversation mutations

mod branching;
mod context_builder;
mod regeneration;
pub mod service;
mod token_counter;
mod tree;
pub mod types;

pub use branching::{BranchManager, MergePolicy};
pub use context_builder::ContextBuilder;
pub use regeneration::RegenerationService;
pub use service::ConversationService;
pub use token_counter::TokenCounter;
pub use tree::MessageTree;
pub use types::{BuiltContext, ConversationDetail};
