//! 通知服务
//!
//! 通知列表走读穿透缓存；标记已读等修改操作完成后删除接收者的缓存页。
//!
//! ## 缓存策略
//!
//! - 命中：直接返回
//! - 未命中、Redis 故障或反序列化失败：回源数据库，再尽力回填（回填失败只记日志）
//! - 修改后失效：失效失败作为基础设施错误返回给调用方，避免调用方读到旧数据而不自知
//! - 并发读者可能在删除之前读库、删除之后回填，把旧页写回缓存；
//!   配置了 `cache_reinvalidate_ms` 时，修改方在延迟后再删一次，旧页最多存活这段延迟

use std::sync::Arc;
use std::time::Duration;

use herald_shared::config::FanoutConfig;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::parse_user_id;
use crate::cache::{NotificationCache, cache_ttl, schedule_reinvalidation};
use crate::error::{NotificationError, Result};
use crate::models::Notification;
use crate::repository::NotificationRepositoryTrait;

/// 通知列表默认单页条数
pub const DEFAULT_NOTIFICATION_PAGE_SIZE: i64 = 30;

/// 通知服务
pub struct NotificationService<N, C>
where
    N: NotificationRepositoryTrait,
    C: NotificationCache,
{
    repo: Arc<N>,
    cache: Arc<C>,
    page_size: i64,
    cache_ttl: Duration,
    reinvalidate_after: Option<Duration>,
}

impl<N, C> NotificationService<N, C>
where
    N: NotificationRepositoryTrait,
    C: NotificationCache + 'static,
{
    pub fn new(repo: Arc<N>, cache: Arc<C>) -> Self {
        Self {
            repo,
            cache,
            page_size: DEFAULT_NOTIFICATION_PAGE_SIZE,
            cache_ttl: Duration::from_secs(cache_ttl::NOTIFICATION_PAGE),
            reinvalidate_after: None,
        }
    }

    /// 使用配置中的单页条数、缓存 TTL 与二次失效延迟
    pub fn from_config(repo: Arc<N>, cache: Arc<C>, config: &FanoutConfig) -> Self {
        Self {
            repo,
            cache,
            page_size: config.notification_page_size.max(1),
            cache_ttl: Duration::from_secs(config.cache_ttl_seconds),
            reinvalidate_after: config.cache_reinvalidate_delay(),
        }
    }

    pub fn with_cache_reinvalidation(mut self, delay: Duration) -> Self {
        self.reinvalidate_after = Some(delay);
        self
    }

    /// 立即删除缓存页，并按需安排延迟二次删除
    async fn invalidate_page(&self, recipient: Uuid) -> Result<()> {
        self.cache.invalidate(recipient).await?;
        if let Some(delay) = self.reinvalidate_after {
            schedule_reinvalidation(self.cache.clone(), vec![recipient], delay);
        }
        Ok(())
    }

    /// 获取接收者的通知页
    ///
    /// 缓存键: notification:{recipient_id}, TTL: 1h
    #[instrument(skip(self))]
    pub async fn list_notifications(&self, recipient_id: &str) -> Result<Vec<Notification>> {
        let recipient = parse_user_id("recipient_id", recipient_id)?;

        match self.cache.get_page(recipient).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => {
                warn!(%recipient, error = %e, "Cache get failed, falling back to database");
            }
        }

        let page = self.repo.list_by_recipient(recipient, self.page_size).await?;

        if let Err(e) = self.cache.set_page(recipient, &page, self.cache_ttl).await {
            warn!(%recipient, error = %e, "Cache set failed");
        }

        Ok(page)
    }

    /// 标记单条通知已读
    ///
    /// - 通知不存在：`NotFound`
    /// - 通知属于其他用户：`PermissionDenied`
    #[instrument(skip(self))]
    pub async fn mark_read(&self, recipient_id: &str, notification_id: &str) -> Result<()> {
        let recipient = parse_user_id("recipient_id", recipient_id)?;
        let notification_id = Uuid::parse_str(notification_id.trim()).map_err(|_| {
            NotificationError::InvalidArgument(format!(
                "notification_id 不是合法的 UUID: {notification_id}"
            ))
        })?;

        let notification = self
            .repo
            .get_by_id(notification_id)
            .await?
            .ok_or_else(|| NotificationError::not_found("notification", notification_id))?;

        if !notification.is_owned_by(recipient) {
            return Err(NotificationError::PermissionDenied { notification_id });
        }

        if !self.repo.mark_read(recipient, notification_id).await? {
            return Err(NotificationError::not_found("notification", notification_id));
        }

        self.invalidate_page(recipient).await?;

        info!(%recipient, %notification_id, "通知已标记为已读");
        Ok(())
    }

    /// 标记接收者全部通知已读，返回本次翻转的条数
    ///
    /// 没有未读通知也不是错误，缓存同样会被失效。
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64> {
        let recipient = parse_user_id("recipient_id", recipient_id)?;

        let updated = self.repo.mark_all_read(recipient).await?;
        self.invalidate_page(recipient).await?;

        info!(%recipient, updated, "全部通知已标记为已读");
        Ok(updated)
    }
}
