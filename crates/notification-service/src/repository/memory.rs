//! 内存仓储实现
//!
//! 用于本地运行和测试，语义与 PostgreSQL 实现保持一致：唯一约束、
//! 排序规则、批量写入的全有或全无。同时提供故障注入开关。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::traits::{NotificationRepositoryTrait, SubscriptionRepositoryTrait};
use crate::error::{NotificationError, Result};
use crate::models::{Audience, Notification, Subscription, SubscriptionCursor};

fn simulated_failure(what: &str) -> NotificationError {
    NotificationError::Database(sqlx::Error::Protocol(format!("模拟故障: {what}")))
}

// ---------------------------------------------------------------------------
// InMemorySubscriptionRepository
// ---------------------------------------------------------------------------

/// 内存订阅仓储
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<Vec<Subscription>>,
    fail_reads: AtomicBool,
    resolve_calls: AtomicUsize,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启后 `list_subscribers_of` 返回数据库错误，用于模拟受众解析失败
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// `list_subscribers_of` 被调用的次数
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl SubscriptionRepositoryTrait for InMemorySubscriptionRepository {
    async fn create(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Subscription> {
        if subscriber_id == target_id {
            return Err(NotificationError::InvalidActor("不能订阅自己".to_string()));
        }

        let mut rows = self.rows.write();
        if rows
            .iter()
            .any(|s| s.subscriber_id == subscriber_id && s.target_id == target_id)
        {
            return Err(NotificationError::AlreadySubscribed {
                subscriber_id,
                target_id,
            });
        }

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::now_v7(),
            subscriber_id,
            target_id,
            created_at: now,
            updated_at: now,
        };
        rows.push(subscription.clone());

        Ok(subscription)
    }

    async fn delete(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|s| !(s.subscriber_id == subscriber_id && s.target_id == target_id));
        Ok(rows.len() < before)
    }

    async fn get(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|s| s.subscriber_id == subscriber_id && s.target_id == target_id)
            .cloned())
    }

    async fn list_subscribers_of(&self, target_id: Uuid) -> Result<Vec<Uuid>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(simulated_failure("读取订阅者"));
        }

        Ok(self
            .rows
            .read()
            .iter()
            .filter(|s| s.target_id == target_id)
            .map(|s| s.subscriber_id)
            .collect())
    }

    async fn list_subscribers_page(
        &self,
        target_id: Uuid,
        after: Option<SubscriptionCursor>,
        limit: i64,
    ) -> Result<Vec<Subscription>> {
        let mut matching: Vec<Subscription> = self
            .rows
            .read()
            .iter()
            .filter(|s| s.target_id == target_id)
            .filter(|s| after.is_none_or(|c| (s.created_at, s.id) > (c.created_at, c.id)))
            .cloned()
            .collect();

        matching.sort_by_key(|s| (s.created_at, s.id));
        matching.truncate(limit.max(0) as usize);

        Ok(matching)
    }
}

// ---------------------------------------------------------------------------
// InMemoryNotificationRepository
// ---------------------------------------------------------------------------

/// 内存通知仓储
///
/// `insert_batch` 先在暂存区构造整批记录，全部成功后才并入存储，
/// 以此模拟事务的全有或全无。
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    rows: RwLock<Vec<Notification>>,
    fail_on_recipient: Mutex<Option<Uuid>>,
    batch_calls: AtomicUsize,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量写入遇到该接收者时失败，整批回滚
    pub fn fail_on_recipient(&self, recipient_id: Option<Uuid>) {
        *self.fail_on_recipient.lock() = recipient_id;
    }

    /// `insert_batch` 被调用的次数（包括失败的调用）
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// 当前存储的全部通知
    pub fn all(&self) -> Vec<Notification> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl NotificationRepositoryTrait for InMemoryNotificationRepository {
    async fn insert_batch(
        &self,
        audience: &Audience,
        notification_type: &str,
    ) -> Result<Vec<Notification>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if audience.is_empty() {
            return Ok(Vec::new());
        }

        let fail_on = *self.fail_on_recipient.lock();
        let mut staged = Vec::with_capacity(audience.len());

        for recipient_id in &audience.subscribers {
            if fail_on == Some(*recipient_id) {
                return Err(simulated_failure(&format!("写入 recipient_id={recipient_id}")));
            }
            staged.push(Notification {
                notification_id: Uuid::now_v7(),
                recipient_id: *recipient_id,
                sender_id: Some(audience.actor_id),
                notification_type: notification_type.to_string(),
                read: false,
                created_at: Utc::now(),
            });
        }

        self.rows.write().extend(staged.iter().cloned());
        Ok(staged)
    }

    async fn list_by_recipient(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .rows
            .read()
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();

        // 未读在前；同状态内新的在前（v7 id 作为同一时刻的次序）
        notifications.sort_by(|a, b| {
            a.read
                .cmp(&b.read)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.notification_id.cmp(&a.notification_id))
        });
        notifications.truncate(limit.max(0) as usize);

        Ok(notifications)
    }

    async fn get_by_id(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|n| n.notification_id == notification_id)
            .cloned())
    }

    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.write();
        match rows
            .iter_mut()
            .find(|n| n.notification_id == notification_id && n.recipient_id == recipient_id)
        {
            Some(n) => {
                n.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let mut flipped = 0;
        for n in self
            .rows
            .write()
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
        {
            n.read = true;
            flipped += 1;
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_unique_pair() {
        let repo = InMemorySubscriptionRepository::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        repo.create(a, b).await.unwrap();
        let err = repo.create(a, b).await.unwrap_err();

        assert!(matches!(err, NotificationError::AlreadySubscribed { .. }));
        assert_eq!(repo.len(), 1);
        // 反方向是另一条订阅
        repo.create(b, a).await.unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_page_is_keyset_ordered() {
        let repo = InMemorySubscriptionRepository::new();
        let target = Uuid::new_v4();
        for _ in 0..5 {
            repo.create(Uuid::new_v4(), target).await.unwrap();
        }
        repo.create(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();

        let first = repo.list_subscribers_page(target, None, 3).await.unwrap();
        assert_eq!(first.len(), 3);

        let after = first.last().map(Subscription::cursor);
        let second = repo.list_subscribers_page(target, after, 3).await.unwrap();
        assert_eq!(second.len(), 2);

        let mut ids: Vec<Uuid> = first.iter().chain(&second).map(|s| s.id).collect();
        let total = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[tokio::test]
    async fn test_batch_failure_leaves_nothing() {
        let repo = InMemoryNotificationRepository::new();
        let recipients: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        repo.fail_on_recipient(Some(recipients[2]));

        let audience = Audience::new(Uuid::new_v4(), recipients);
        assert!(repo.insert_batch(&audience, "like").await.is_err());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_unread_first() {
        let repo = InMemoryNotificationRepository::new();
        let recipient = Uuid::new_v4();
        let audience = Audience::new(Uuid::new_v4(), vec![recipient]);

        let first = repo.insert_batch(&audience, "follow").await.unwrap();
        repo.insert_batch(&audience, "like").await.unwrap();
        repo.mark_read(recipient, first[0].notification_id).await.unwrap();
        repo.insert_batch(&audience, "comment").await.unwrap();

        let listed = repo.list_by_recipient(recipient, 30).await.unwrap();
        let types: Vec<&str> = listed.iter().map(|n| n.notification_type.as_str()).collect();
        assert_eq!(types, vec!["comment", "like", "follow"]);
        assert!(listed[2].read);

        assert_eq!(repo.list_by_recipient(recipient, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_all_read_counts_only_unread() {
        let repo = InMemoryNotificationRepository::new();
        let recipient = Uuid::new_v4();
        let audience = Audience::new(Uuid::new_v4(), vec![recipient]);
        repo.insert_batch(&audience, "a").await.unwrap();
        repo.insert_batch(&audience, "b").await.unwrap();

        assert_eq!(repo.mark_all_read(recipient).await.unwrap(), 2);
        assert_eq!(repo.mark_all_read(recipient).await.unwrap(), 0);
    }
}
