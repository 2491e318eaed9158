//! 活动事件模型
//!
//! 上游服务在用户产生动作（关注、点赞等）时向活动 topic 投递事件，
//! 扇出管道消费后为该用户的每个订阅者生成一条通知。
//! 事件本身不落库，只作为通知的来源。

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 活动事件
///
/// 线上格式: `{"actor_id": "<uuid>", "activity_type": "follow"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// 产生动作的用户
    pub actor_id: Uuid,
    /// 动作类型，原样写入通知的 notification_type
    pub activity_type: String,
}

/// 事件解码失败
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("事件不是合法 JSON 或字段不匹配: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("activity_type 不能为空")]
    BlankActivityType,
}

impl ActivityEvent {
    pub fn new(actor_id: Uuid, activity_type: impl Into<String>) -> Self {
        Self {
            actor_id,
            activity_type: activity_type.into(),
        }
    }

    /// 从消息负载解码并校验
    ///
    /// actor_id 必须是 UUID（由 serde 保证），activity_type 去除空白后不能为空。
    pub fn decode(payload: &[u8]) -> Result<Self, EventDecodeError> {
        let event: Self = serde_json::from_slice(payload)?;
        if event.activity_type.trim().is_empty() {
            return Err(EventDecodeError::BlankActivityType);
        }
        Ok(event)
    }

    /// 序列化为 JSON 字节，供生产者和测试使用
    pub fn to_payload(&self) -> Vec<u8> {
        // 两个字段都是可直接序列化的类型，不会失败
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_event() {
        let actor = Uuid::new_v4();
        let payload = format!(r#"{{"actor_id":"{actor}","activity_type":"follow"}}"#);

        let event = ActivityEvent::decode(payload.as_bytes()).unwrap();
        assert_eq!(event.actor_id, actor);
        assert_eq!(event.activity_type, "follow");
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = ActivityEvent::decode(b"{not json").unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_bad_uuid() {
        let err =
            ActivityEvent::decode(br#"{"actor_id":"user-1","activity_type":"like"}"#).unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let payload = format!(r#"{{"actor_id":"{}"}}"#, Uuid::new_v4());
        assert!(ActivityEvent::decode(payload.as_bytes()).is_err());
    }

    #[test]
    fn test_decode_rejects_blank_activity_type() {
        let payload = format!(
            r#"{{"actor_id":"{}","activity_type":"   "}}"#,
            Uuid::new_v4()
        );
        let err = ActivityEvent::decode(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, EventDecodeError::BlankActivityType));
    }

    #[test]
    fn test_payload_decodes_back() {
        let event = ActivityEvent::new(Uuid::new_v4(), "like");
        let decoded = ActivityEvent::decode(&event.to_payload()).unwrap();
        assert_eq!(decoded, event);
    }
}
