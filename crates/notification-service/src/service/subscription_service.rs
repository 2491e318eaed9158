//! 订阅服务
//!
//! 负责订阅、取消订阅与订阅者分页。自订阅在访问存储之前就被拒绝。

use std::sync::Arc;

use tracing::{info, instrument};

use super::dto::{SubscriberPage, clamp_page_limit};
use super::parse_user_id;
use crate::error::{NotificationError, Result};
use crate::models::{Subscription, SubscriptionCursor};
use crate::repository::SubscriptionRepositoryTrait;

/// 订阅服务
pub struct SubscriptionService<S: SubscriptionRepositoryTrait> {
    repo: Arc<S>,
}

impl<S: SubscriptionRepositoryTrait> SubscriptionService<S> {
    pub fn new(repo: Arc<S>) -> Self {
        Self { repo }
    }

    /// 订阅目标用户
    ///
    /// - 任一 ID 非法或订阅自己：`InvalidActor`
    /// - 已订阅：`AlreadySubscribed`
    #[instrument(skip(self))]
    pub async fn subscribe(&self, subscriber_id: &str, target_id: &str) -> Result<Subscription> {
        let subscriber = parse_user_id("subscriber_id", subscriber_id)?;
        let target = parse_user_id("target_id", target_id)?;

        if subscriber == target {
            return Err(NotificationError::InvalidActor("不能订阅自己".to_string()));
        }

        if self.repo.get(subscriber, target).await?.is_some() {
            return Err(NotificationError::AlreadySubscribed {
                subscriber_id: subscriber,
                target_id: target,
            });
        }

        // 并发订阅时由唯一约束兜底，同样返回 AlreadySubscribed
        let subscription = self.repo.create(subscriber, target).await?;

        info!(%subscriber, %target, "订阅成功");
        Ok(subscription)
    }

    /// 取消订阅，不存在时返回 `NotFound`
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, subscriber_id: &str, target_id: &str) -> Result<()> {
        let subscriber = parse_user_id("subscriber_id", subscriber_id)?;
        let target = parse_user_id("target_id", target_id)?;

        if !self.repo.delete(subscriber, target).await? {
            return Err(NotificationError::not_found(
                "subscription",
                format!("{subscriber}->{target}"),
            ));
        }

        info!(%subscriber, %target, "已取消订阅");
        Ok(())
    }

    /// 分页列出订阅了 target 的用户
    ///
    /// 多取一条用于判断是否还有下一页。
    #[instrument(skip(self))]
    pub async fn list_subscribers(
        &self,
        target_id: &str,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<SubscriberPage> {
        let target = parse_user_id("target_id", target_id)?;
        let after = cursor
            .filter(|c| !c.is_empty())
            .map(SubscriptionCursor::decode)
            .transpose()?;
        let limit = clamp_page_limit(limit) as usize;

        let mut subscriptions = self
            .repo
            .list_subscribers_page(target, after, limit as i64 + 1)
            .await?;

        let next_cursor = if subscriptions.len() > limit {
            subscriptions.truncate(limit);
            subscriptions
                .last()
                .map(|s| s.cursor().encode())
                .transpose()?
        } else {
            None
        };

        Ok(SubscriberPage {
            subscriptions,
            next_cursor,
        })
    }
}
