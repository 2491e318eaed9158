//! 订阅关系仓储
//!
//! 提供订阅关系的数据访问，唯一约束与自订阅 CHECK 约束映射为业务错误

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::traits::SubscriptionRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::models::{Subscription, SubscriptionCursor};

/// 订阅关系仓储
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn get(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, subscriber_id, target_id, created_at, updated_at
            FROM subscriptions
            WHERE subscriber_id = $1 AND target_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn list_subscribers_of(&self, target_id: Uuid) -> Result<Vec<Uuid>> {
        let subscribers = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT subscriber_id
            FROM subscriptions
            WHERE target_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscribers)
    }

    /// 键集分页：(created_at, id) 严格大于游标位置
    pub async fn list_subscribers_page(
        &self,
        target_id: Uuid,
        after: Option<SubscriptionCursor>,
        limit: i64,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, subscriber_id, target_id, created_at, updated_at
            FROM subscriptions
            WHERE target_id = $1
              AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3))
            ORDER BY created_at, id
            LIMIT $4
            "#,
        )
        .bind(target_id)
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    // ==================== 写入操作 ====================

    #[instrument(skip(self))]
    pub async fn create(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Subscription> {
        let result = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (id, subscriber_id, target_id, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, subscriber_id, target_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(subscriber_id)
        .bind(target_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(subscription) => Ok(subscription),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(NotificationError::AlreadySubscribed {
                    subscriber_id,
                    target_id,
                })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_check_violation() => Err(
                NotificationError::InvalidActor("不能订阅自己".to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscriptions
            WHERE subscriber_id = $1 AND target_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubscriptionRepositoryTrait for SubscriptionRepository {
    async fn create(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Subscription> {
        self.create(subscriber_id, target_id).await
    }

    async fn delete(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<bool> {
        self.delete(subscriber_id, target_id).await
    }

    async fn get(&self, subscriber_id: Uuid, target_id: Uuid) -> Result<Option<Subscription>> {
        self.get(subscriber_id, target_id).await
    }

    async fn list_subscribers_of(&self, target_id: Uuid) -> Result<Vec<Uuid>> {
        self.list_subscribers_of(target_id).await
    }

    async fn list_subscribers_page(
        &self,
        target_id: Uuid,
        after: Option<SubscriptionCursor>,
        limit: i64,
    ) -> Result<Vec<Subscription>> {
        self.list_subscribers_page(target_id, after, limit).await
    }
}
