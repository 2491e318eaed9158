//! 通知实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 通知
///
/// 由扇出管道批量创建，此后只会被“标记已读”修改，本服务从不删除通知。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// UUID v7，插入时生成，时间有序
    pub notification_id: Uuid,
    /// 接收者
    pub recipient_id: Uuid,
    /// 触发者（系统通知为空）
    pub sender_id: Option<Uuid>,
    /// 通知类型，如 "follow"、"like"
    pub notification_type: String,
    pub read: bool,
    /// 由存储层在插入时写入，之后不再变化
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 是否属于指定用户
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.recipient_id == user_id
    }
}
