//! 订阅关系实体与分页游标

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NotificationError, Result};

/// 订阅关系：subscriber 关注 target 的动态
///
/// (subscriber_id, target_id) 唯一，且不能订阅自己。取消订阅时物理删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub target_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// 该订阅在分页中的位置
    pub fn cursor(&self) -> SubscriptionCursor {
        SubscriptionCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// 订阅者分页游标
///
/// 按 (created_at, id) 做键集分页，对外以 base64url 编码的不透明字符串传递。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCursor {
    #[serde(rename = "c")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "i")]
    pub id: Uuid,
}

impl SubscriptionCursor {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| NotificationError::InvalidCursor(format!("非法 base64: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| NotificationError::InvalidCursor(format!("游标内容无法解析: {e}")))
    }
}
