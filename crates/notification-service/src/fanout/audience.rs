//! 受众解析

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::models::Audience;
use crate::repository::SubscriptionRepositoryTrait;

/// 受众解析器
///
/// 读取 actor 当前的订阅者集合。存储错误原样返回，是否重试由调用方决定。
pub struct AudienceResolver<S: SubscriptionRepositoryTrait> {
    subscriptions: Arc<S>,
}

impl<S: SubscriptionRepositoryTrait> AudienceResolver<S> {
    pub fn new(subscriptions: Arc<S>) -> Self {
        Self { subscriptions }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, actor_id: Uuid) -> Result<Audience> {
        let subscribers = self.subscriptions.list_subscribers_of(actor_id).await?;
        debug!(%actor_id, count = subscribers.len(), "受众解析完成");
        Ok(Audience::new(actor_id, subscribers))
    }
}
