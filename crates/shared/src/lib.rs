//! 共享库
//!
//! 包含各服务共用的配置、错误处理、数据库连接、缓存、Kafka、死信队列、
//! 重试策略和可观测性等基础设施代码。

pub mod cache;
pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
