/// service.rs
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::settings::Settings;
use crate::models::common::Paginated;
use crate::services::cache::{CacheLayer, NS_CONVERSATIONS};
use crate::store::{
    Branch, Conversation, ConversationRecord, ConversationStatus, ConversationStore, Message, Role,
};
use crate::utils::error::ApiError;

use super::branching::BranchManager;
use super::context_builder::ContextBuilder;
use super::regeneration::RegenerationService;
use super::tree::MessageTree;
use super::types::{BuiltContext, ConversationDetail};

#[derive(Serialize, Deserialize)]
struct CachedPage {
    items: Vec<Conversation>,
    total: usize,
}

/// Top-level conversation façade. External callers go through this type
/// only; it serializes mutations per conversation, keeps the store the
/// single source of truth and invalidates cached views in the same
/// operation as every write.
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<CacheLayer>,
    tree: MessageTree,
    branches: BranchManager,
    context: ContextBuilder,
    regeneration: RegenerationService,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    max_conversations_per_user: usize,
    default_model: String,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<CacheLayer>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            cache,
            tree: MessageTree::new(&settings.limits),
            branches: BranchManager::new(&settings.limits),
            context: ContextBuilder::new(settings.context.clone(), &settings.limits),
            regeneration: RegenerationService::new(&settings.limits),
            locks: DashMap::new(),
            max_conversations_per_user: settings.limits.max_conversations_per_user,
            default_model: settings.llm.default_model.clone(),
        }
    }

    /// One guard per conversation; mutations hold it across load and commit.
    fn lock_for(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn owned(record: &ConversationRecord, user_id: Uuid) -> Result<(), ApiError> {
        if record.conversation.user_id != user_id {
            return Err(ApiError::NotFound(format!("conversation {}", record.id())));
        }
        Ok(())
    }

    async fn invalidate_conversations(&self) {
        self.cache.invalidate_namespace(NS_CONVERSATIONS).await;
    }

    // ===== CONVERSATIONS =====

    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
        model: Option<String>,
    ) -> Result<Conversation, ApiError> {
        if self.max_conversations_per_user > 0 {
            let count = self.store.count_for_user(user_id).await?;
            if count >= self.max_conversations_per_user {
                return Err(ApiError::LimitExceeded(format!(
                    "user {} already holds {} conversations",
                    user_id, count
                )));
            }
        }

        let model = model.unwrap_or_else(|| self.default_model.clone());
        let record = ConversationRecord::create(user_id, title, model);
        let conversation = record.conversation.clone();
        self.store.commit(record).await?;
        self.invalidate_conversations().await;

        info!(conversation_id = %conversation.id, %user_id, "created conversation");
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<Paginated<Conversation>, ApiError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let cache_key = format!("{}:{}:{}", user_id, page, limit);

        if let Some(cached) = self
            .cache
            .get::<CachedPage>(NS_CONVERSATIONS, &cache_key)
            .await
        {
            return Ok(Paginated::new(cached.items, page, limit, cached.total));
        }

        let (items, total) = self.store.list_for_user(user_id, page, limit).await?;
        self.cache
            .set(
                NS_CONVERSATIONS,
                &cache_key,
                &CachedPage {
                    items: items.clone(),
                    total,
                },
                None,
            )
            .await;
        Ok(Paginated::new(items, page, limit, total))
    }

    pub async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationDetail, ApiError> {
        let record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        Ok(ConversationDetail {
            branches: record.branches_sorted().into_iter().cloned().collect(),
            messages: record.messages_sorted().into_iter().cloned().collect(),
            conversation: record.conversation,
        })
    }

    pub async fn update_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        title: Option<String>,
        model: Option<String>,
        status: Option<ConversationStatus>,
    ) -> Result<Conversation, ApiError> {
        if status == Some(ConversationStatus::Deleted) {
            return Err(ApiError::InvalidTarget(
                "status can only be set to active or archived".to_string(),
            ));
        }

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        if let Some(title) = title {
            record.conversation.title = Some(title);
        }
        if let Some(model) = model {
            record.conversation.model = model;
        }
        if let Some(status) = status {
            record.conversation.status = status;
        }
        record.touch();
        let conversation = record.conversation.clone();
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(conversation)
    }

    /// Removes the conversation with everything it owns.
    pub async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ApiError> {
        let lock = self.lock_for(conversation_id);
        {
            let _guard = lock.lock().await;
            let record = self.store.load(conversation_id).await?;
            Self::owned(&record, user_id)?;
            self.store.remove(conversation_id).await?;
            self.invalidate_conversations().await;
        }
        self.locks.remove(&conversation_id);
        info!(%conversation_id, %user_id, "deleted conversation");
        Ok(())
    }

    // ===== MESSAGES =====

    /// Records a user (or system) turn. Without a conversation id a new
    /// conversation is created; without a parent the message continues the
    /// active branch at its tail.
    pub async fn add_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        parent_id: Option<Uuid>,
        role: Role,
        content: String,
        model: Option<String>,
    ) -> Result<Message, ApiError> {
        if role == Role::Assistant {
            return Err(ApiError::InvalidRole(
                "assistant messages are persisted by the completion flow".to_string(),
            ));
        }

        let Some(conversation_id) = conversation_id else {
            return self
                .start_conversation_with(user_id, parent_id, role, content, model)
                .await;
        };

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;

        let branch_id = record.conversation.active_branch_id;
        let parent_id = match parent_id {
            Some(parent) => Some(parent),
            None => self
                .tree
                .get_path(&record, branch_id, None)?
                .last()
                .map(|m| m.id),
        };
        let message =
            self.tree
                .add_message(&mut record, parent_id, branch_id, role, content, model, None)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(message)
    }

    async fn start_conversation_with(
        &self,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        role: Role,
        content: String,
        model: Option<String>,
    ) -> Result<Message, ApiError> {
        if parent_id.is_some() {
            return Err(ApiError::InvalidParent(
                "a new conversation starts at the root".to_string(),
            ));
        }
        if self.max_conversations_per_user > 0 {
            let count = self.store.count_for_user(user_id).await?;
            if count >= self.max_conversations_per_user {
                return Err(ApiError::LimitExceeded(format!(
                    "user {} already holds {} conversations",
                    user_id, count
                )));
            }
        }

        let conversation_model = model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut record = ConversationRecord::create(user_id, None, conversation_model);
        let branch_id = record.conversation.active_branch_id;
        let message =
            self.tree
                .add_message(&mut record, None, branch_id, role, content, model, None)?;
        info!(conversation_id = %record.id(), %user_id, "created conversation from first turn");
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(message)
    }

    /// Persists a completed assistant reply into an existing branch.
    pub async fn save_assistant_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Option<Uuid>,
        parent_id: Option<Uuid>,
        content: String,
        model: Option<String>,
        token_count: Option<u32>,
    ) -> Result<Message, ApiError> {
        let Some(parent_id) = parent_id else {
            return Err(ApiError::InvalidParent(
                "an assistant message always answers a parent message".to_string(),
            ));
        };

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;

        let branch_id = branch_id.unwrap_or(record.conversation.active_branch_id);
        let model = model.or_else(|| Some(record.conversation.model.clone()));
        let message = self.tree.add_message(
            &mut record,
            Some(parent_id),
            branch_id,
            Role::Assistant,
            content,
            model,
            token_count,
        )?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(message)
    }

    pub async fn get_message(&self, user_id: Uuid, message_id: Uuid) -> Result<Message, ApiError> {
        let record = self.store.conversation_of_message(message_id).await?;
        Self::owned(&record, user_id)?;
        Ok(self.tree.get_message(&record, message_id)?.clone())
    }

    pub async fn edit_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        content: String,
    ) -> Result<Message, ApiError> {
        let conversation_id = {
            let record = self.store.conversation_of_message(message_id).await?;
            Self::owned(&record, user_id)?;
            record.id()
        };

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let message = self.tree.edit_message(&mut record, message_id, content)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(message)
    }

    pub async fn get_thread(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        let record = self.store.conversation_of_message(message_id).await?;
        Self::owned(&record, user_id)?;
        self.tree.get_thread(&record, message_id)
    }

    pub async fn children(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        let record = self.store.conversation_of_message(message_id).await?;
        Self::owned(&record, user_id)?;
        self.tree.children(&record, message_id)
    }

    pub async fn siblings(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        let record = self.store.conversation_of_message(message_id).await?;
        Self::owned(&record, user_id)?;
        self.tree.siblings(&record, message_id)
    }

    // ===== BRANCHES =====

    pub async fn create_branch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        parent_message_id: Uuid,
        name: Option<String>,
    ) -> Result<Branch, ApiError> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let branch = self
            .branches
            .create_branch(&mut record, parent_message_id, name)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(branch)
    }

    pub async fn activate_branch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Conversation, ApiError> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let conversation = self.branches.activate_branch(&mut record, branch_id)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(conversation)
    }

    pub async fn merge_branches(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        source_branch_id: Uuid,
        target_branch_id: Uuid,
    ) -> Result<Branch, ApiError> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let branch =
            self.branches
                .merge_branches(&mut record, source_branch_id, target_branch_id)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(branch)
    }

    pub async fn list_branches(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Branch>, ApiError> {
        let record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        Ok(self.branches.list_branches(&record))
    }

    /// The visible message sequence of one branch, root first.
    pub async fn branch_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ApiError> {
        let record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        self.tree.get_path(&record, branch_id, limit)
    }

    pub async fn rename_branch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Uuid,
        name: String,
    ) -> Result<Branch, ApiError> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let branch = self.branches.rename_branch(&mut record, branch_id, name)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(branch)
    }

    pub async fn abandon_branch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Branch, ApiError> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let branch = self.branches.abandon_branch(&mut record, branch_id)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(branch)
    }

    // ===== CONTEXT & REGENERATION =====

    pub async fn build_context(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        branch_id: Option<Uuid>,
        max_messages: Option<usize>,
        token_budget: Option<usize>,
    ) -> Result<BuiltContext, ApiError> {
        let record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let context = self
            .context
            .build(&record, branch_id, max_messages, token_budget)?;
        debug!(
            %conversation_id,
            branch_id = %context.branch_id,
            token_count = context.token_count,
            truncated = context.truncated,
            "built context"
        );
        Ok(context)
    }

    /// Forks an alternate continuation for an assistant reply and makes the
    /// fork active. The caller appends the replacement reply afterwards.
    pub async fn regenerate(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        branch_name: Option<String>,
    ) -> Result<Branch, ApiError> {
        let conversation_id = {
            let record = self.store.conversation_of_message(message_id).await?;
            Self::owned(&record, user_id)?;
            record.id()
        };

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(conversation_id).await?;
        Self::owned(&record, user_id)?;
        let branch = self
            .regeneration
            .regenerate(&mut record, message_id, branch_name)?;
        self.store.commit(record).await?;
        self.invalidate_conversations().await;
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{
        CacheConfig, ContextConfig, LimitsConfig, LlmConfig, ServerConfig,
    };
    use crate::store::MemoryStore;

    fn settings(limits: LimitsConfig) -> Settings {
        Settings {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            llm: LlmConfig {
                base_url: "http://localhost:4000".to_string(),
                api_key: None,
                default_model: "gpt-4o-mini".to_string(),
                timeout_seconds: 5,
                retry_attempts: 0,
            },
            cache: CacheConfig {
                backend: "memory".to_string(),
                redis_url: String::new(),
                ttl_models: 300,
                ttl_user_profile: 600,
                ttl_conversations: 120,
                ttl_default: 3600,
            },
            limits,
            context: ContextConfig {
                max_messages: 50,
                token_budget: 4096,
            },
        }
    }

    fn service_with(limits: LimitsConfig) -> ConversationService {
        let settings = settings(limits);
        let cache = Arc::new(CacheLayer::with_primary(None, settings.cache.clone()));
        ConversationService::new(Arc::new(MemoryStore::new()), cache, &settings)
    }

    fn service() -> ConversationService {
        service_with(LimitsConfig {
            max_conversations_per_user: 0,
            max_messages_per_conversation: 0,
            max_branches_per_conversation: 0,
        })
    }

    #[tokio::test]
    async fn first_turn_creates_a_conversation() {
        let service = service();
        let user = Uuid::new_v4();

        let message = service
            .add_user_message(user, None, None, Role::User, "hello".into(), None)
            .await
            .unwrap();

        let detail = service
            .get_conversation(user, message.conversation_id)
            .await
            .unwrap();
        assert_eq!(detail.conversation.model, "gpt-4o-mini");
        assert_eq!(detail.messages.len(), 1);
        assert_eq!(detail.branches.len(), 1);
        assert_eq!(detail.conversation.active_branch_id, message.branch_id);
    }

    #[tokio::test]
    async fn later_turns_continue_the_active_tail() {
        let service = service();
        let user = Uuid::new_v4();

        let u1 = service
            .add_user_message(user, None, None, Role::User, "u1".into(), None)
            .await
            .unwrap();
        let a1 = service
            .save_assistant_message(
                user,
                u1.conversation_id,
                None,
                Some(u1.id),
                "a1".into(),
                None,
                Some(12),
            )
            .await
            .unwrap();

        let u2 = service
            .add_user_message(
                user,
                Some(u1.conversation_id),
                None,
                Role::User,
                "u2".into(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(u2.parent_id, Some(a1.id));
        assert_eq!(a1.token_count, 12);
    }

    #[tokio::test]
    async fn concurrent_writers_under_one_parent_both_land() {
        let service = Arc::new(service());
        let user = Uuid::new_v4();
        let u1 = service
            .add_user_message(user, None, None, Role::User, "u1".into(), None)
            .await
            .unwrap();
        let conversation_id = u1.conversation_id;

        let left = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .add_user_message(
                        user,
                        Some(conversation_id),
                        Some(u1.id),
                        Role::User,
                        "left".into(),
                        None,
                    )
                    .await
            })
        };
        let right = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .add_user_message(
                        user,
                        Some(conversation_id),
                        Some(u1.id),
                        Role::User,
                        "right".into(),
                        None,
                    )
                    .await
            })
        };
        let left = left.await.unwrap().unwrap();
        let right = right.await.unwrap().unwrap();

        // Both writers win with distinct messages; siblings are legal.
        assert_ne!(left.id, right.id);
        let children = service.children(user, u1.id).await.unwrap();
        let ids: Vec<Uuid> = children.iter().map(|m| m.id).collect();
        assert!(ids.contains(&left.id));
        assert!(ids.contains(&right.id));
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn assistant_turns_are_rejected_on_the_user_path() {
        let service = service();
        let err = service
            .add_user_message(
                Uuid::new_v4(),
                None,
                None,
                Role::Assistant,
                "nope".into(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRole(_)));
    }

    #[tokio::test]
    async fn assistant_message_requires_a_parent() {
        let service = service();
        let user = Uuid::new_v4();
        let u1 = service
            .add_user_message(user, None, None, Role::User, "u1".into(), None)
            .await
            .unwrap();

        let err = service
            .save_assistant_message(user, u1.conversation_id, None, None, "a1".into(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParent(_)));
    }

    #[tokio::test]
    async fn foreign_conversations_stay_invisible() {
        let service = service();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let message = service
            .add_user_message(owner, None, None, Role::User, "hi".into(), None)
            .await
            .unwrap();

        let err = service
            .get_conversation(stranger, message.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = service
            .edit_message(stranger, message.id, "hacked".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn conversation_limit_blocks_creation() {
        let service = service_with(LimitsConfig {
            max_conversations_per_user: 1,
            max_messages_per_conversation: 0,
            max_branches_per_conversation: 0,
        });
        let user = Uuid::new_v4();
        service
            .create_conversation(user, None, None)
            .await
            .unwrap();

        let err = service
            .create_conversation(user, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::LimitExceeded(_)));

        let err = service
            .add_user_message(user, None, None, Role::User, "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn regenerate_forks_at_the_preceding_user_turn() {
        let service = service();
        let user = Uuid::new_v4();

        let u1 = service
            .add_user_message(user, None, None, Role::User, "u1".into(), None)
            .await
            .unwrap();
        let a1 = service
            .save_assistant_message(
                user,
                u1.conversation_id,
                None,
                Some(u1.id),
                "a1".into(),
                None,
                None,
            )
            .await
            .unwrap();

        let branch = service.regenerate(user, a1.id, None).await.unwrap();
        assert_eq!(branch.parent_message_id, Some(u1.id));

        let a2 = service
            .save_assistant_message(
                user,
                u1.conversation_id,
                Some(branch.id),
                Some(u1.id),
                "a2".into(),
                None,
                None,
            )
            .await
            .unwrap();

        let detail = service
            .get_conversation(user, u1.conversation_id)
            .await
            .unwrap();
        assert_eq!(detail.conversation.active_branch_id, branch.id);
        assert_eq!(detail.branches.len(), 2);

        let context = service
            .build_context(user, u1.conversation_id, None, None, None)
            .await
            .unwrap();
        let ids: Vec<Uuid> = context.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![u1.id, a2.id]);
    }

    #[tokio::test]
    async fn update_conversation_cannot_mark_deleted() {
        let service = service();
        let user = Uuid::new_v4();
        let conversation = service
            .create_conversation(user, None, None)
            .await
            .unwrap();

        let err = service
            .update_conversation(
                user,
                conversation.id,
                None,
                None,
                Some(ConversationStatus::Deleted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTarget(_)));

        let updated = service
            .update_conversation(
                user,
                conversation.id,
                Some("Renamed".into()),
                None,
                Some(ConversationStatus::Archived),
            )
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Renamed"));
        assert_eq!(updated.status, ConversationStatus::Archived);
    }

    #[tokio::test]
    async fn delete_removes_the_whole_record() {
        let service = service();
        let user = Uuid::new_v4();
        let message = service
            .add_user_message(user, None, None, Role::User, "hi".into(), None)
            .await
            .unwrap();

        service
            .delete_conversation(user, message.conversation_id)
            .await
            .unwrap();

        let err = service
            .get_conversation(user, message.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err = service.get_message(user, message.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_pages_by_recency_and_sees_new_writes() {
        let service = service();
        let user = Uuid::new_v4();
        for i in 0..3 {
            service
                .create_conversation(user, Some(format!("c{}", i)), None)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let first_page = service.list_conversations(user, 1, 2).await.unwrap();
        assert_eq!(first_page.items.len(), 2);
        assert_eq!(first_page.items[0].title.as_deref(), Some("c2"));
        assert_eq!(first_page.pagination.total, 3);
        assert_eq!(first_page.pagination.pages, 2);
        assert!(first_page.pagination.has_next);
        assert!(!first_page.pagination.has_prev);

        // A write after the cached read must show up immediately.
        service
            .create_conversation(user, Some("c3".into()), None)
            .await
            .unwrap();
        let refreshed = service.list_conversations(user, 1, 2).await.unwrap();
        assert_eq!(refreshed.items[0].title.as_deref(), Some("c3"));
        assert_eq!(refreshed.pagination.total, 4);
    }

    #[tokio::test]
    async fn branch_lifecycle_through_the_facade() {
        let service = service();
        let user = Uuid::new_v4();
        let u1 = service
            .add_user_message(user, None, None, Role::User, "u1".into(), None)
            .await
            .unwrap();
        let conversation_id = u1.conversation_id;

        let branch = service
            .create_branch(user, conversation_id, u1.id, Some("alt".into()))
            .await
            .unwrap();
        let renamed = service
            .rename_branch(user, conversation_id, branch.id, "alt-2".into())
            .await
            .unwrap();
        assert_eq!(renamed.name, "alt-2");

        let listed = service.list_branches(user, conversation_id).await.unwrap();
        assert_eq!(listed.len(), 2);

        let abandoned = service
            .abandon_branch(user, conversation_id, branch.id)
            .await
            .unwrap();
        assert_eq!(abandoned.status, crate::store::BranchStatus::Abandoned);

        let err = service
            .activate_branch(user, conversation_id, branch.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTarget(_)));
    }
}
