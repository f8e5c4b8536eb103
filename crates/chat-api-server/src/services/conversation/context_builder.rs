use tracing::debug;
use uuid::Uuid;

use super::token_counter::TokenCounter;
use super::tree::MessageTree;
use super::types::BuiltContext;
use crate::config::settings::{ContextConfig, LimitsConfig};
use crate::store::models::{ConversationRecord, Message, Role};
use crate::utils::error::ApiError;

/// Turns a branch path into a bounded prompt. The scan runs backward from
/// the leaf so the most recent turns survive truncation, but the returned
/// sequence is chronological.
pub struct ContextBuilder {
    defaults: ContextConfig,
    tree: MessageTree,
}

impl ContextBuilder {
    pub fn new(defaults: ContextConfig, limits: &LimitsConfig) -> Self {
        Self {
            defaults,
            tree: MessageTree::new(limits),
        }
    }

    /// Builds the context for `branch_id`, defaulting to the conversation's
    /// active branch. Retention rules, in priority order: the leaf is always
    /// kept, a leading system message is always kept, then older messages
    /// are kept while they fit both `max_messages` and `token_budget`.
    pub fn build(
        &self,
        record: &ConversationRecord,
        branch_id: Option<Uuid>,
        max_messages: Option<usize>,
        token_budget: Option<usize>,
    ) -> Result<BuiltContext, ApiError> {
        let branch_id = branch_id.unwrap_or(record.conversation.active_branch_id);
        let max_messages = max_messages.unwrap_or(self.defaults.max_messages);
        let token_budget = token_budget.unwrap_or(self.defaults.token_budget);

        let path = self.tree.get_path(record, branch_id, None)?;
        if path.is_empty() {
            return Ok(BuiltContext {
                branch_id,
                messages: Vec::new(),
                token_count: 0,
                truncated: false,
            });
        }

        let leading_system = if path[0].role == Role::System {
            Some(path[0].clone())
        } else {
            None
        };
        let body = &path[if leading_system.is_some() { 1 } else { 0 }..];

        let mut total = leading_system
            .as_ref()
            .map(|m| Self::cost(m))
            .unwrap_or(0);
        let count_budget = match (max_messages, &leading_system) {
            (0, _) => usize::MAX,
            (n, Some(_)) => n.saturating_sub(1),
            (n, None) => n,
        };

        let mut kept: Vec<Message> = Vec::new();
        let mut truncated = false;
        for message in body.iter().rev() {
            let cost = Self::cost(message);
            if kept.is_empty() {
                // The most recent message is never excluded, even when it
                // alone blows the budget.
                total += cost;
                kept.push(message.clone());
                if total > token_budget {
                    truncated = true;
                }
                continue;
            }
            if kept.len() + 1 > count_budget || total + cost > token_budget {
                truncated = true;
                break;
            }
            total += cost;
            kept.push(message.clone());
        }
        kept.reverse();

        let mut messages = Vec::with_capacity(kept.len() + 1);
        if let Some(system) = leading_system {
            messages.push(system);
        }
        messages.extend(kept);

        debug!(
            conversation_id = %record.id(),
            %branch_id,
            kept = messages.len(),
            token_count = total,
            truncated,
            "built context"
        );
        Ok(BuiltContext {
            branch_id,
            messages,
            token_count: total,
            truncated,
        })
    }

    fn cost(message: &Message) -> usize {
        if message.token_count > 0 {
            message.token_count as usize
        } else {
            TokenCounter::count_text(&message.content)
        }
    }
}
