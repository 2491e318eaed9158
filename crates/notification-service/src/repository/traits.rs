//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层与扇出管道依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Audience, Notification, Subscription, SubscriptionCursor};

/// 订阅关系仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepositoryTrait: Send + Sync {
    /// 创建订阅；唯一约束冲突返回 `AlreadySubscribed`
    async fn create(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Subscription>;

    /// 删除订阅，返回是否有记录被删除
    async fn delete(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<bool>;

    async fn get(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Option<Subscription>>;

    /// 列出订阅了 target 的全部用户
    async fn list_subscribers_of(&self, target_id: Uuid) -> Result<Vec<Uuid>>;

    /// 按 (created_at, id) 升序分页列出 target 的订阅关系，`after` 之后的记录
    async fn list_subscribers_page(
        &self,
        target_id: Uuid,
        after: Option<SubscriptionCursor>,
        limit: i64,
    ) -> Result<Vec<Subscription>>;
}

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    /// 为受众中的每个用户写入一条通知，全部成功或全部不写
    async fn insert_batch(
        &self,
        audience: &Audience,
        notification_type: &str,
    ) -> Result<Vec<Notification>>;

    /// 未读在前，同一读状态内按创建时间倒序
    async fn list_by_recipient(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>>;

    async fn get_by_id(&self, notification_id: Uuid) -> Result<Option<Notification>>;

    /// 标记单条通知已读，返回是否命中记录
    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<bool>;

    /// 标记接收者全部未读通知为已读，返回实际翻转的条数
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64>;
}
