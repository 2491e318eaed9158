//! 通知扇出服务
//!
//! 用户可以订阅其他用户的动态；被订阅者产生动作时，每个订阅者都会收到一条
//! 持久化、可查询的通知。
//!
//! ## 核心功能
//!
//! - **扇出管道**：消费活动事件，解析受众，在单个事务内批量写入通知，
//!   失效受影响用户的缓存，持久化成功后才确认事件
//! - **订阅管理**：订阅、取消订阅、分页列出订阅者
//! - **通知查询**：按接收者读取通知页（读穿透缓存），标记单条/全部已读
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义与 RPC 状态映射
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `cache`: 通知页缓存（Redis 与内存实现）
//! - `service`: 订阅与通知业务服务
//! - `fanout`: 受众解析、事件源与扇出管道

pub mod cache;
pub mod error;
pub mod fanout;
pub mod models;
pub mod repository;
pub mod service;

pub use cache::{InMemoryNotificationCache, NotificationCache, RedisNotificationCache};
pub use error::{FanoutError, NotificationError, Result};
pub use fanout::{
    AudienceResolver, EventSource, FanoutPipeline, FanoutReport, KafkaEventSource,
    MemoryEventPublisher, MemoryEventSource,
};
pub use models::*;
pub use repository::{
    InMemoryNotificationRepository, InMemorySubscriptionRepository, NotificationRepository,
    SubscriptionRepository,
};
pub use service::{NotificationService, SubscriptionService, dto};
