use tracing::info;
use uuid::Uuid;

use super::branching::BranchManager;
use crate::config::settings::LimitsConfig;
use crate::store::models::{Branch, ConversationRecord, Role};
use crate::utils::error::ApiError;

/// Produces the branch an alternate assistant reply should land in. The LLM
/// call itself stays with the caller; this only reshapes the tree.
pub struct RegenerationService {
    branches: BranchManager,
}

impl RegenerationService {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            branches: BranchManager::new(limits),
        }
    }

    /// Forks a new active branch at the user message preceding `message_id`.
    pub fn regenerate(
        &self,
        record: &mut ConversationRecord,
        message_id: Uuid,
        branch_name: Option<String>,
    ) -> Result<Branch, ApiError> {
        let message = record
            .messages
            .get(&message_id)
            .ok_or_else(|| ApiError::NotFound(format!("message {}", message_id)))?;
        if message.role != Role::Assistant {
            return Err(ApiError::InvalidTarget(format!(
                "message {} is {:?}; only assistant messages can be regenerated",
                message_id, message.role
            )));
        }
        let parent_id = message.parent_id.ok_or_else(|| {
            ApiError::InvalidTarget(format!(
                "message {} has no parent; a root cannot be regenerated",
                message_id
            ))
        })?;

        let name = branch_name
            .unwrap_or_else(|| format!("Regenerate {}", record.branches.len() + 1));
        let branch = self.branches.create_branch(record, parent_id, Some(name))?;
        self.branches.activate_branch(record, branch.id)?;

        info!(
            conversation_id = %record.id(),
            regenerated_message_id = %message_id,
            branch_id = %branch.id,
            "regeneration branch created"
        );
        Ok(branch)
    }
}
