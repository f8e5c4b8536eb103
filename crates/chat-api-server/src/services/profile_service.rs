use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::services::cache::{CacheLayer, NS_USER_PROFILE};
use crate::store::{ConversationStore, UserProfile};
use crate::utils::error::ApiError;

/// User profile lookups and the balance gate for chat turns.
#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<CacheLayer>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ConversationStore>, cache: Arc<CacheLayer>) -> Self {
        Self { store, cache }
    }

    /// Reads through the profile cache; first sight of a user creates a
    /// default profile with no budget cap.
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, ApiError> {
        let cache_key = user_id.to_string();
        if let Some(profile) = self
            .cache
            .get::<UserProfile>(NS_USER_PROFILE, &cache_key)
            .await
        {
            return Ok(profile);
        }

        let profile = match self.store.profile(user_id).await? {
            Some(profile) => profile,
            None => {
                let profile = UserProfile::new(user_id);
                self.store.upsert_profile(profile.clone()).await?;
                info!(%user_id, "created default user profile");
                profile
            }
        };

        self.cache
            .set(NS_USER_PROFILE, &cache_key, &profile, None)
            .await;
        Ok(profile)
    }

    /// Gate applied before a chat turn. A profile without a budget never fails.
    pub async fn check_balance(&self, user_id: Uuid) -> Result<(), ApiError> {
        let profile = self.get_profile(user_id).await?;
        if let Some(max_budget) = profile.max_budget {
            if profile.spend >= max_budget {
                return Err(ApiError::BalanceInsufficient(format!(
                    "spend {:.4} has reached the budget {:.4}",
                    profile.spend, max_budget
                )));
            }
        }
        Ok(())
    }

    /// Adds to a user's spend and refreshes the cached profile in the same
    /// operation, so the gate never sees a stale balance.
    pub async fn record_spend(&self, user_id: Uuid, amount: f64) -> Result<UserProfile, ApiError> {
        let mut profile = match self.store.profile(user_id).await? {
            Some(profile) => profile,
            None => UserProfile::new(user_id),
        };
        profile.spend += amount;
        self.store.upsert_profile(profile.clone()).await?;
        self.cache
            .set(NS_USER_PROFILE, &user_id.to_string(), &profile, None)
            .await;
        debug!(%user_id, spend = profile.spend, "recorded spend");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::CacheConfig;
    use crate::store::MemoryStore;

    fn service() -> ProfileService {
        let cache_config = CacheConfig {
            backend: "memory".to_string(),
            redis_url: String::new(),
            ttl_models: 300,
            ttl_user_profile: 600,
            ttl_conversations: 120,
            ttl_default: 3600,
        };
        ProfileService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CacheLayer::with_primary(None, cache_config)),
        )
    }

    #[tokio::test]
    async fn first_lookup_creates_a_default_profile() {
        let service = service();
        let user_id = Uuid::new_v4();

        let profile = service.get_profile(user_id).await.unwrap();

        assert_eq!(profile.user_id, user_id);
        assert_eq!(profile.spend, 0.0);
        assert!(profile.max_budget.is_none());
    }

    #[tokio::test]
    async fn unlimited_budget_always_passes_the_gate() {
        let service = service();
        let user_id = Uuid::new_v4();
        service.record_spend(user_id, 1000.0).await.unwrap();

        assert!(service.check_balance(user_id).await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_budget_is_rejected() {
        let service = service();
        let user_id = Uuid::new_v4();
        let mut profile = UserProfile::new(user_id);
        profile.max_budget = Some(5.0);
        service.store.upsert_profile(profile).await.unwrap();

        service.record_spend(user_id, 5.0).await.unwrap();

        let err = service.check_balance(user_id).await.unwrap_err();
        assert!(matches!(err, ApiError::BalanceInsufficient(_)));
    }

    #[tokio::test]
    async fn recorded_spend_is_visible_through_the_cache() {
        let service = service();
        let user_id = Uuid::new_v4();
        // Prime the cache with the zero-spend profile.
        service.get_profile(user_id).await.unwrap();

        service.record_spend(user_id, 2.5).await.unwrap();

        let profile = service.get_profile(user_id).await.unwrap();
        assert_eq!(profile.spend, 2.5);
    }
}
