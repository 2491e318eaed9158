//! 事件源
//!
//! 扇出管道只依赖 `EventSource`：拉取下一条消息、确认、永久拒绝。
//! 生产环境使用 Kafka，测试与本地运行使用内存通道。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use herald_shared::dlq::DlqProducer;
use herald_shared::error::HeraldError;
use herald_shared::events::ActivityEvent;
use herald_shared::kafka::{ConsumerMessage, KafkaConsumer};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error};

/// 事件源
///
/// 多个 worker 共享同一个事件源并发调用 `recv`。
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 拉取下一条消息，`None` 表示事件源已关闭
    ///
    /// 必须是取消安全的：future 被丢弃时不能丢失消息。
    async fn recv(&self) -> Option<Result<ConsumerMessage, HeraldError>>;

    /// 确认消息已处理，之后不会再投递
    async fn ack(&self, msg: &ConsumerMessage) -> Result<(), HeraldError>;

    /// 永久拒绝消息，不再重新投递
    async fn reject(&self, msg: &ConsumerMessage, reason: &str) -> Result<(), HeraldError>;
}

// ---------------------------------------------------------------------------
// KafkaEventSource
// ---------------------------------------------------------------------------

/// Kafka 事件源
///
/// - 确认：交给消费者的位点跟踪，同分区更早的消息都结束后位置才推进
/// - 拒绝：先把消息连同原因写入死信 topic，再按确认同样的方式结束；
///   死信写入失败只记录日志，消息仍视为已拒绝
pub struct KafkaEventSource {
    consumer: KafkaConsumer,
    dlq: DlqProducer,
}

impl KafkaEventSource {
    pub fn new(consumer: KafkaConsumer, dlq: DlqProducer) -> Self {
        Self { consumer, dlq }
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn recv(&self) -> Option<Result<ConsumerMessage, HeraldError>> {
        Some(self.consumer.recv().await)
    }

    async fn ack(&self, msg: &ConsumerMessage) -> Result<(), HeraldError> {
        self.consumer.settle(msg)
    }

    async fn reject(&self, msg: &ConsumerMessage, reason: &str) -> Result<(), HeraldError> {
        if let Err(e) = self.dlq.send_to_dlq(msg, reason).await {
            error!(
                message_id = %msg.message_id(),
                error = %e,
                "写入死信队列失败，消息内容仅保留在日志中"
            );
        }
        self.consumer.settle(msg)
    }
}

// ---------------------------------------------------------------------------
// 内存事件源
// ---------------------------------------------------------------------------

/// 创建一对内存发布者 / 事件源
///
/// 所有发布者被 drop 后，事件源在排空剩余消息后关闭。
pub fn memory_channel(topic: &str) -> (MemoryEventPublisher, MemoryEventSource) {
    let (sender, receiver) = mpsc::unbounded_channel();

    let publisher = MemoryEventPublisher {
        topic: topic.to_string(),
        sender,
        next_offset: Arc::new(AtomicI64::new(0)),
    };

    let source = MemoryEventSource {
        receiver: tokio::sync::Mutex::new(receiver),
        acked: Mutex::new(Vec::new()),
        rejected: Mutex::new(Vec::new()),
        settled: Notify::new(),
    };

    (publisher, source)
}

/// 内存事件发布者，offset 从 0 开始递增
#[derive(Clone)]
pub struct MemoryEventPublisher {
    topic: String,
    sender: mpsc::UnboundedSender<ConsumerMessage>,
    next_offset: Arc<AtomicI64>,
}

impl MemoryEventPublisher {
    /// 发布原始负载，返回分配的 offset
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let msg = ConsumerMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
            headers: Default::default(),
        };

        if self.sender.send(msg).is_err() {
            debug!(offset, "内存事件源已关闭，消息被丢弃");
        }
        offset
    }

    pub fn publish_event(&self, event: &ActivityEvent) -> i64 {
        self.publish(event.to_payload())
    }
}

/// 内存事件源
///
/// 记录被确认和被拒绝的 offset，供测试断言。
pub struct MemoryEventSource {
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConsumerMessage>>,
    acked: Mutex<Vec<i64>>,
    rejected: Mutex<Vec<(i64, String)>>,
    settled: Notify,
}

impl MemoryEventSource {
    pub fn acked(&self) -> Vec<i64> {
        let mut offsets = self.acked.lock().clone();
        offsets.sort_unstable();
        offsets
    }

    /// 被拒绝的 (offset, 原因)，按 offset 排序
    pub fn rejected(&self) -> Vec<(i64, String)> {
        let mut rejected = self.rejected.lock().clone();
        rejected.sort_by_key(|(offset, _)| *offset);
        rejected
    }

    /// 已确认或已拒绝的消息数
    pub fn settled_count(&self) -> usize {
        self.acked.lock().len() + self.rejected.lock().len()
    }

    /// 等待至少 `count` 条消息被确认或拒绝，超时返回 false
    pub async fn wait_until_settled(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.settled.notified();
                if self.settled_count() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn recv(&self) -> Option<Result<ConsumerMessage, HeraldError>> {
        self.receiver.lock().await.recv().await.map(Ok)
    }

    async fn ack(&self, msg: &ConsumerMessage) -> Result<(), HeraldError> {
        self.acked.lock().push(msg.offset);
        self.settled.notify_waiters();
        Ok(())
    }

    async fn reject(&self, msg: &ConsumerMessage, reason: &str) -> Result<(), HeraldError> {
        self.rejected.lock().push((msg.offset, reason.to_string()));
        self.settled.notify_waiters();
        Ok(())
    }
}
