//! 数据库仓储层
//!
//! 提供订阅关系与通知的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑（如所有权校验由服务层完成）
//! - 批量写入的事务在仓储内部开启并提交，事务句柄不会泄露给调用方
//! - 定义 trait 接口，PostgreSQL 与内存实现可互换，支持 mock 测试

mod memory;
mod notification_repo;
mod subscription_repo;
mod traits;

pub use memory::{InMemoryNotificationRepository, InMemorySubscriptionRepository};
pub use notification_repo::NotificationRepository;
pub use subscription_repo::SubscriptionRepository;
pub use traits::*;
