//! 扇出管道
//!
//! 固定数量的 worker 共享一个事件源，每个 worker 一次处理一条消息直到确认或拒绝：
//!
//! 1. 解码为 `ActivityEvent`，失败则永久拒绝
//! 2. 解析受众，失败则永久拒绝（可配置有限次重试）；受众为空直接确认
//! 3. 单事务批量写入通知，失败则永久拒绝且不留下任何记录
//! 4. 失效所有接收者的缓存页，失败只告警，不影响确认；可选延迟后再失效一次
//! 5. 持久化成功后确认
//!
//! worker 之间互不影响，不保证跨 worker 的处理顺序。

use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_shared::events::ActivityEvent;
use herald_shared::kafka::ConsumerMessage;
use herald_shared::observability::metrics::{
    outcome, record_cache_invalidation_failure, record_fanout_event, record_fanout_failure,
    record_notifications_created,
};
use herald_shared::observability::tracing::link_span_to_headers;
use herald_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::audience::AudienceResolver;
use super::source::EventSource;
use crate::cache::{NotificationCache, schedule_reinvalidation};
use crate::error::{FanoutError, NotificationError};
use crate::repository::{NotificationRepositoryTrait, SubscriptionRepositoryTrait};

/// 默认 worker 数量
pub const DEFAULT_WORKERS: usize = 5;

/// 拉取消息出错后的等待时间，避免 broker 不可用时空转
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// 单条事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub actor_id: Uuid,
    pub activity_type: String,
    /// 写入的通知条数，等于受众人数
    pub notifications_created: usize,
    /// 缓存失效是否成功（受众为空时视为成功）
    pub cache_invalidated: bool,
}

/// 扇出管道
pub struct FanoutPipeline<S, N, C>
where
    S: SubscriptionRepositoryTrait,
    N: NotificationRepositoryTrait,
    C: NotificationCache,
{
    resolver: AudienceResolver<S>,
    notifications: Arc<N>,
    cache: Arc<C>,
    resolve_retry: RetryPolicy,
    workers: usize,
    /// 写入后二次失效的延迟，None 表示只失效一次
    reinvalidate_after: Option<Duration>,
}

impl<S, N, C> FanoutPipeline<S, N, C>
where
    S: SubscriptionRepositoryTrait + 'static,
    N: NotificationRepositoryTrait + 'static,
    C: NotificationCache + 'static,
{
    /// 默认 5 个 worker，受众解析失败不重试
    pub fn new(resolver: AudienceResolver<S>, notifications: Arc<N>, cache: Arc<C>) -> Self {
        Self {
            resolver,
            notifications,
            cache,
            resolve_retry: RetryPolicy::no_retry(),
            workers: DEFAULT_WORKERS,
            reinvalidate_after: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 受众解析遇到基础设施错误时的重试策略
    pub fn with_resolve_retry(mut self, policy: RetryPolicy) -> Self {
        self.resolve_retry = policy;
        self
    }

    /// 写入后经过 `delay` 再失效一次接收者缓存，清掉并发读者回填的旧页
    pub fn with_cache_reinvalidation(mut self, delay: Duration) -> Self {
        self.reinvalidate_after = Some(delay);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 启动 worker 池，直到关闭信号或事件源关闭
    ///
    /// 关闭信号置为 true（或发送端被 drop）后，worker 不再拉取新消息，
    /// 正在处理的消息会先完成确认或拒绝。所有 worker 退出后返回。
    pub async fn run<E>(self: Arc<Self>, source: Arc<E>, shutdown: watch::Receiver<bool>)
    where
        E: EventSource + 'static,
    {
        info!(workers = self.workers, "扇出管道已启动");

        let handles: Vec<_> = (0..self.workers)
            .map(|worker_id| {
                let pipeline = self.clone();
                let source = source.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pipeline.worker_loop(worker_id, source, shutdown).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "扇出 worker 异常退出");
            }
        }

        info!("扇出管道已停止");
    }

    async fn worker_loop<E>(
        &self,
        worker_id: usize,
        source: Arc<E>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        E: EventSource + 'static,
    {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                // 偏向关闭信号，保证收到关闭时不再拉取新消息
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }

                next = source.recv() => next,
            };

            match next {
                None => {
                    info!(worker_id, "事件源已关闭，worker 退出");
                    break;
                }
                Some(Err(e)) => {
                    if e.is_retryable() {
                        warn!(worker_id, error = %e, "拉取消息失败");
                    } else {
                        error!(worker_id, error = %e, code = e.code(), "拉取消息失败，非瞬时错误");
                    }
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
                Some(Ok(msg)) => match self.process_message(source.as_ref(), msg).await {
                    Ok(_) => {}
                    // 已在 process_message 中记录并拒绝
                    Err(e) => debug!(worker_id, stage = e.stage(), "消息已拒绝，继续拉取"),
                },
            }
        }

        info!(worker_id, "扇出 worker 已退出");
    }

    /// 处理一条消息并确认或拒绝
    ///
    /// 确认/拒绝本身失败只记录日志，不影响 worker 继续运行。
    pub async fn process_message<E>(
        &self,
        source: &E,
        msg: ConsumerMessage,
    ) -> Result<FanoutReport, FanoutError>
    where
        E: EventSource + ?Sized,
    {
        let span = info_span!(
            "fanout_event",
            message_id = %msg.message_id(),
        );
        link_span_to_headers(&span, &msg.headers);

        async {
            let started = Instant::now();
            let result = self.handle_payload(&msg.payload).await;

            match &result {
                Ok(report) => {
                    if let Err(e) = source.ack(&msg).await {
                        error!(error = %e, "确认消息失败");
                    }
                    record_fanout_event(outcome::ACKED, started.elapsed().as_secs_f64());
                    info!(
                        actor_id = %report.actor_id,
                        activity_type = %report.activity_type,
                        notifications = report.notifications_created,
                        cache_invalidated = report.cache_invalidated,
                        "活动事件扇出完成"
                    );
                }
                Err(err) => {
                    warn!(stage = err.stage(), error = %err, "活动事件处理失败，永久拒绝");
                    record_fanout_failure(err.stage());
                    if let Err(e) = source.reject(&msg, &err.to_string()).await {
                        error!(error = %e, "拒绝消息失败");
                    }
                    record_fanout_event(outcome::REJECTED, started.elapsed().as_secs_f64());
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    /// 解码、解析受众、写入并失效缓存；不涉及确认/拒绝
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<FanoutReport, FanoutError> {
        let event = ActivityEvent::decode(payload)?;
        let actor_id = event.actor_id;

        let audience = retry_with_policy(
            &self.resolve_retry,
            "resolve_audience",
            NotificationError::is_infrastructure,
            || self.resolver.resolve(actor_id),
        )
        .await
        .map_err(|source| FanoutError::Resolve { actor_id, source })?;

        if audience.is_empty() {
            return Ok(FanoutReport {
                actor_id,
                activity_type: event.activity_type,
                notifications_created: 0,
                cache_invalidated: true,
            });
        }

        let created = self
            .notifications
            .insert_batch(&audience, &event.activity_type)
            .await
            .map_err(|source| FanoutError::Persist { actor_id, source })?;
        record_notifications_created(created.len());

        let cache_invalidated = match self.cache.invalidate_many(&audience.subscribers).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    %actor_id,
                    recipients = audience.len(),
                    error = %e,
                    "缓存失效失败，接收者可能在 TTL 内读到旧数据"
                );
                record_cache_invalidation_failure();
                false
            }
        };
        if let Some(delay) = self.reinvalidate_after {
            schedule_reinvalidation(self.cache.clone(), audience.subscribers.clone(), delay);
        }

        Ok(FanoutReport {
            actor_id,
            activity_type: event.activity_type,
            notifications_created: created.len(),
            cache_invalidated,
        })
    }
}
