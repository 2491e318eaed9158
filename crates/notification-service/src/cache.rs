//! 通知页缓存
//!
//! 每个接收者缓存一页通知列表（读穿透），键为 `notification:{recipient_id}`。
//! 任何修改都只删除缓存，不就地修补缓存内容。
//!
//! 读穿透存在一个窗口：读者在删除之前查完数据库、在删除之后才回填，
//! 旧页会一直留到 TTL。修改方可以用 [`schedule_reinvalidation`] 在短暂延迟后再删一次。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use herald_shared::cache::Cache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::Notification;

/// 缓存键生成
pub mod cache_keys {
    use uuid::Uuid;

    pub fn notification_page(recipient_id: Uuid) -> String {
        format!("notification:{}", recipient_id)
    }
}

/// 缓存 TTL（秒）
pub mod cache_ttl {
    pub const NOTIFICATION_PAGE: u64 = 3600; // 1 h
}

/// 通知页缓存接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationCache: Send + Sync {
    async fn get_page(&self, recipient_id: Uuid) -> Result<Option<Vec<Notification>>>;

    async fn set_page(
        &self,
        recipient_id: Uuid,
        page: &[Notification],
        ttl: Duration,
    ) -> Result<()>;

    async fn invalidate(&self, recipient_id: Uuid) -> Result<()>;

    /// 一次往返删除多个接收者的缓存
    async fn invalidate_many(&self, recipient_ids: &[Uuid]) -> Result<()>;
}

/// 延迟 `delay` 后再次删除这些接收者的缓存页
///
/// 后台执行，失败只记日志。
pub fn schedule_reinvalidation<C>(cache: Arc<C>, recipient_ids: Vec<Uuid>, delay: Duration)
where
    C: NotificationCache + 'static,
{
    if recipient_ids.is_empty() {
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = cache.invalidate_many(&recipient_ids).await {
            warn!(recipients = recipient_ids.len(), error = %e, "延迟二次失效失败");
        }
    });
}

// ---------------------------------------------------------------------------
// RedisNotificationCache
// ---------------------------------------------------------------------------

/// 基于共享 Redis 客户端的通知页缓存
#[derive(Clone)]
pub struct RedisNotificationCache {
    cache: Arc<Cache>,
}

impl RedisNotificationCache {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

fn cache_error(e: impl std::fmt::Display) -> NotificationError {
    NotificationError::Cache(e.to_string())
}

#[async_trait]
impl NotificationCache for RedisNotificationCache {
    async fn get_page(&self, recipient_id: Uuid) -> Result<Option<Vec<Notification>>> {
        self.cache
            .get::<Vec<Notification>>(&cache_keys::notification_page(recipient_id))
            .await
            .map_err(cache_error)
    }

    async fn set_page(
        &self,
        recipient_id: Uuid,
        page: &[Notification],
        ttl: Duration,
    ) -> Result<()> {
        self.cache
            .set(&cache_keys::notification_page(recipient_id), page, ttl)
            .await
            .map_err(cache_error)
    }

    async fn invalidate(&self, recipient_id: Uuid) -> Result<()> {
        self.cache
            .delete(&cache_keys::notification_page(recipient_id))
            .await
            .map_err(cache_error)
    }

    #[instrument(skip(self, recipient_ids), fields(count = recipient_ids.len()))]
    async fn invalidate_many(&self, recipient_ids: &[Uuid]) -> Result<()> {
        let keys: Vec<String> = recipient_ids
            .iter()
            .map(|id| cache_keys::notification_page(*id))
            .collect();

        let removed = self.cache.delete_many(&keys).await.map_err(cache_error)?;
        debug!(removed, "通知页缓存已失效");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryNotificationCache
// ---------------------------------------------------------------------------

/// 内存通知页缓存
///
/// 记录每次失效调用，并可切换为故障模式，便于验证缓存一致性。
#[derive(Default)]
pub struct InMemoryNotificationCache {
    entries: RwLock<HashMap<Uuid, (Vec<Notification>, Instant)>>,
    invalidated: Mutex<Vec<Uuid>>,
    invalidate_calls: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryNotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启后所有操作都返回缓存错误
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 是否存在未过期的缓存页
    pub fn contains(&self, recipient_id: Uuid) -> bool {
        self.entries
            .read()
            .get(&recipient_id)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    /// 直接写入一页，用于构造“陈旧缓存”场景
    pub fn prime(&self, recipient_id: Uuid, page: Vec<Notification>) {
        let expires_at = Instant::now() + Duration::from_secs(cache_ttl::NOTIFICATION_PAGE);
        self.entries.write().insert(recipient_id, (page, expires_at));
    }

    /// 被失效过的接收者（按调用顺序）
    pub fn invalidated(&self) -> Vec<Uuid> {
        self.invalidated.lock().clone()
    }

    /// `invalidate` 与 `invalidate_many` 的总调用次数
    pub fn invalidate_calls(&self) -> usize {
        self.invalidate_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Cache("模拟缓存不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationCache for InMemoryNotificationCache {
    async fn get_page(&self, recipient_id: Uuid) -> Result<Option<Vec<Notification>>> {
        self.check_available()?;
        let entries = self.entries.read();
        Ok(entries
            .get(&recipient_id)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(page, _)| page.clone()))
    }

    async fn set_page(
        &self,
        recipient_id: Uuid,
        page: &[Notification],
        ttl: Duration,
    ) -> Result<()> {
        self.check_available()?;
        self.entries
            .write()
            .insert(recipient_id, (page.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate(&self, recipient_id: Uuid) -> Result<()> {
        self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.entries.write().remove(&recipient_id);
        self.invalidated.lock().push(recipient_id);
        Ok(())
    }

    async fn invalidate_many(&self, recipient_ids: &[Uuid]) -> Result<()> {
        self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut entries = self.entries.write();
        for id in recipient_ids {
            entries.remove(id);
        }
        self.invalidated.lock().extend_from_slice(recipient_ids);
        Ok(())
    }
}
