//! 通知仓储
//!
//! 通知只能通过受众批量写入，没有单条插入的入口

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::error::Result;
use crate::models::{Audience, Notification};

/// 通知仓储
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn list_by_recipient(
        &self,
        recipient_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT notification_id, recipient_id, sender_id, notification_type, read, created_at
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY read ASC, created_at DESC
            LIMIT $2
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    pub async fn get_by_id(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            SELECT notification_id, recipient_id, sender_id, notification_type, read, created_at
            FROM notifications
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    // ==================== 写入操作 ====================

    /// 在单个事务内为受众逐条写入通知
    ///
    /// 任一行失败时提前返回，事务随 drop 回滚，不会留下部分写入。
    #[instrument(skip(self, audience), fields(actor_id = %audience.actor_id, recipients = audience.len()))]
    pub async fn insert_batch(
        &self,
        audience: &Audience,
        notification_type: &str,
    ) -> Result<Vec<Notification>> {
        if audience.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(audience.len());

        for recipient_id in &audience.subscribers {
            let notification =
                Self::insert_one(&mut tx, *recipient_id, Some(audience.actor_id), notification_type)
                    .await?;
            created.push(notification);
        }

        tx.commit().await?;
        debug!(count = created.len(), "通知批量写入完成");

        Ok(created)
    }

    async fn insert_one(
        conn: &mut PgConnection,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        notification_type: &str,
    ) -> Result<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (notification_id, recipient_id, sender_id, notification_type, read, created_at)
            VALUES ($1, $2, $3, $4, FALSE, NOW())
            RETURNING notification_id, recipient_id, sender_id, notification_type, read, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(recipient_id)
        .bind(sender_id)
        .bind(notification_type)
        .fetch_one(conn)
        .await?;

        Ok(notification)
    }

    #[instrument(skip(self))]
    pub async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE notification_id = $1 AND recipient_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 只翻转未读记录，重复调用结果不变
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE recipient_id = $1 AND read = FALSE
            "#,
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    async fn insert_batch(
        &self,
        audience: &Audience,
        notification_type: &str,
    ) -> Result<Vec<Notification>> {
        self.insert_batch(audience, notification_type).await
    }

    async fn list_by_recipient(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        self.list_by_recipient(recipient_id, limit).await
    }

    async fn get_by_id(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        self.get_by_id(notification_id).await
    }

    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<bool> {
        self.mark_read(recipient_id, notification_id).await
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        self.mark_all_read(recipient_id).await
    }
}
