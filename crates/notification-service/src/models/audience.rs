//! 扇出受众

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 某次活动的受众：解析时刻 actor 的订阅者快照
///
/// 解析之后新增的订阅者不会收到本次活动的通知。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    pub actor_id: Uuid,
    pub subscribers: Vec<Uuid>,
}

impl Audience {
    pub fn new(actor_id: Uuid, subscribers: Vec<Uuid>) -> Self {
        Self {
            actor_id,
            subscribers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}
