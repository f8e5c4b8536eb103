pub mod cache;
pub mod conversation;
pub mod llm_service;
pub mod profile_service;

pub use cache::CacheLayer;
pub use conversation::ConversationService;
pub use llm_service::{CompletionProvider, LlmService};
pub use profile_service::ProfileService;
