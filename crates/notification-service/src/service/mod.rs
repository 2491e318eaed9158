//! 服务层
//!
//! 实现订阅与通知的业务逻辑，协调仓储层和缓存层。RPC 层直接调用这里的方法，
//! 并通过 `From<NotificationError> for tonic::Status` 转换错误。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `subscription_service`: 订阅、取消订阅、订阅者分页
//! - `notification_service`: 通知查询（读穿透缓存）与标记已读

pub mod dto;
pub mod notification_service;
pub mod subscription_service;

pub use dto::*;
pub use notification_service::NotificationService;
pub use subscription_service::SubscriptionService;

use uuid::Uuid;

use crate::error::{NotificationError, Result};

/// 解析外部传入的用户 ID
pub(crate) fn parse_user_id(field: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| NotificationError::InvalidActor(format!("{field} 不是合法的 UUID: {raw}")))
}
