//! 死信队列
//!
//! 被永久拒绝的消息（解码失败、受众解析失败、持久化失败）不会再被重新投递，
//! 但会连同失败原因写入死信 topic，供人工排查或离线补偿。
//! 死信只是记录，不会自动回流到原始 topic。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HeraldError;
use crate::kafka::{ConsumerMessage, KafkaProducer};

// ---------------------------------------------------------------------------
// DeadLetterMessage: 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、来源位置等元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息位置（topic/partition/offset）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（非 UTF-8 字节按替换字符保存）
    pub payload: String,
    /// 拒绝原因
    pub error: String,
    /// 拒绝时间
    pub failed_at: DateTime<Utc>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            failed_at: Utc::now(),
            source_service: source_service.into(),
        }
    }

    /// 从消费到的消息构造死信
    pub fn from_consumer_message(
        msg: &ConsumerMessage,
        error: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self::new(
            msg.message_id(),
            msg.topic.clone(),
            msg.payload_lossy(),
            error,
            source_service,
        )
    }
}

// ---------------------------------------------------------------------------
// DlqProducer: 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    topic: String,
    source_service: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, topic: &str, source_service: &str) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
            source_service: source_service.to_string(),
        }
    }

    /// 将被拒绝的消息写入死信队列
    pub async fn send_to_dlq(&self, msg: &ConsumerMessage, error: &str) -> Result<(), HeraldError> {
        let dlq_msg = DeadLetterMessage::from_consumer_message(msg, error, &self.source_service);

        self.producer
            .send_json(&self.topic, &dlq_msg.message_id, &dlq_msg)
            .await?;

        warn!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
