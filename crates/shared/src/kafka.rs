//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和手动提交位点语义，避免各服务重复编写样板代码。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use parking_lot::Mutex;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::HeraldError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理默认 topic 名称，防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    pub const ACTIVITY_EVENTS: &str = "herald.activity.events";
    pub const DEAD_LETTER_QUEUE: &str = "herald.dlq";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 消息在日志和死信中的标识：topic/partition/offset
    pub fn message_id(&self) -> String {
        format!("{}/{}/{}", self.topic, self.partition, self.offset)
    }

    /// 将负载视为 UTF-8 字符串返回，非法字节按替换字符处理
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// 5 秒内仍无法投递即视为失败，由上层决定记录或丢弃，而非无限等待。
    pub fn new(config: &KafkaConfig) -> Result<Self, HeraldError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| HeraldError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), HeraldError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| HeraldError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), HeraldError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| HeraldError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// OffsetTracker
// ---------------------------------------------------------------------------

/// 按分区跟踪已拉取但尚未确认的位点
///
/// Kafka 提交的是分区内的一个位置而不是单条消息。多个 worker 并发处理同一分区时，
/// 只有当某个位点之前的消息全部确认后，才能把位置推进到它之后。
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_settled: Option<i64>,
    /// 最近一次存储的位置
    stored: Option<i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条刚拉取的消息
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();

        // 分区重新分配后从更早的位置重新投递，旧进度作废
        if state.in_flight.is_empty() && state.stored.is_some_and(|stored| offset < stored) {
            *state = PartitionOffsets::default();
        }
        // 第一条消息之前的位置视为已提交
        state.stored.get_or_insert(offset);
        state.in_flight.insert(offset);
    }

    /// 标记消息已确认或已拒绝
    ///
    /// 返回可以存储的新位置（下一条待消费的 offset）；位置没有前进时返回 `None`。
    /// 未经 `track` 的消息不会推进位置。
    pub fn settle(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.in_flight.remove(&offset) {
            return None;
        }
        let highest = state.highest_settled.map_or(offset, |h| h.max(offset));
        state.highest_settled = Some(highest);

        let position = match state.in_flight.first() {
            Some(&lowest_pending) => lowest_pending,
            None => highest + 1,
        };
        if state.stored.is_some_and(|stored| position <= stored) {
            return None;
        }
        state.stored = Some(position);
        Some(position)
    }

    /// 分区内尚未确认的消息数
    pub fn pending(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |state| state.in_flight.len())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 关闭自动存储位点（`enable.auto.offset.store=false`），只有经 `settle` 推进的
/// 位置才会进入下一次自动提交，从而实现“持久化成功后才确认”。
/// 内部 `StreamConsumer` 以 Arc 共享，多个 worker 可以并发调用 `recv`；
/// `OffsetTracker` 保证乱序确认不会越过仍在处理的消息，也不会让位置后退。
#[derive(Clone)]
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    offsets: Arc<Mutex<OffsetTracker>>,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组，
    /// 例如 "herald-notifications.activity"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, HeraldError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| HeraldError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer: Arc::new(consumer),
            offsets: Arc::new(Mutex::new(OffsetTracker::new())),
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), HeraldError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| HeraldError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 拉取下一条消息
    ///
    /// 取消安全：future 被丢弃时不会丢失已拉取但未返回的消息。
    pub async fn recv(&self) -> Result<ConsumerMessage, HeraldError> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| HeraldError::Kafka(format!("接收消息失败: {e}")))?;

        let msg = ConsumerMessage::from_borrowed(&borrowed);
        self.offsets.lock().track(&msg.topic, msg.partition, msg.offset);
        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到 Kafka 消息"
        );
        Ok(msg)
    }

    /// 标记消息已处理完毕
    ///
    /// 只有同一分区中更早的消息都已处理完，位置才会推进并在下一次自动提交时生效。
    pub fn settle(&self, msg: &ConsumerMessage) -> Result<(), HeraldError> {
        let (position, pending) = {
            let mut offsets = self.offsets.lock();
            let position = offsets.settle(&msg.topic, msg.partition, msg.offset);
            (position, offsets.pending(&msg.topic, msg.partition))
        };

        match position {
            Some(position) => self
                .consumer
                .store_offset(&msg.topic, msg.partition, position)
                .map_err(|e| HeraldError::Kafka(format!("存储位点失败: {e}"))),
            None => {
                debug!(
                    message_id = %msg.message_id(),
                    pending,
                    "更早的消息仍在处理，位置暂不推进"
                );
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: "events".to_string(),
            partition: 1,
            offset: 100,
            key: None,
            payload: payload.to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::ACTIVITY_EVENTS, "herald.activity.events");
        assert_eq!(topics::DEAD_LETTER_QUEUE, "herald.dlq");
    }

    #[test]
    fn test_message_id() {
        assert_eq!(make_message(b"{}").message_id(), "events/1/100");
    }

    #[test]
    fn test_out_of_order_settle_waits_for_earlier_message() {
        let mut tracker = OffsetTracker::new();
        tracker.track("events", 0, 9);
        tracker.track("events", 0, 10);

        // 10 先处理完，9 仍在事务中：不能越过 9
        assert_eq!(tracker.settle("events", 0, 10), None);
        assert_eq!(tracker.pending("events", 0), 1);
        assert_eq!(tracker.settle("events", 0, 9), Some(11));
        assert_eq!(tracker.pending("events", 0), 0);
    }

    #[test]
    fn test_in_order_settle_never_moves_backwards() {
        let mut tracker = OffsetTracker::new();
        for offset in [9, 10, 11] {
            tracker.track("events", 0, offset);
        }

        assert_eq!(tracker.settle("events", 0, 9), Some(10));
        assert_eq!(tracker.settle("events", 0, 11), None);
        assert_eq!(tracker.settle("events", 0, 10), Some(12));
        // 重复确认不改变位置
        assert_eq!(tracker.settle("events", 0, 10), None);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.track("events", 0, 5);
        tracker.track("events", 1, 7);
        tracker.track("events", 0, 6);

        assert_eq!(tracker.settle("events", 1, 7), Some(8));
        assert_eq!(tracker.settle("events", 0, 6), None);
        assert_eq!(tracker.settle("events", 0, 5), Some(7));
        assert_eq!(tracker.settle("other", 0, 5), None);
    }

    #[test]
    fn test_redelivery_from_earlier_position_resets_partition() {
        let mut tracker = OffsetTracker::new();
        tracker.track("events", 0, 20);
        assert_eq!(tracker.settle("events", 0, 20), Some(21));

        // 分区重新分配，从 15 开始重新投递
        tracker.track("events", 0, 15);
        assert_eq!(tracker.settle("events", 0, 15), Some(16));
    }

    #[test]
    fn test_payload_lossy_invalid_utf8() {
        let msg = make_message(&[0x68, 0x69, 0xFF]);
        assert_eq!(msg.payload_lossy(), "hi\u{FFFD}");
    }
}
