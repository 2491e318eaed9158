//! 扇出模块
//!
//! 消费活动事件，解析受众，在单个事务内为每个订阅者写入通知，
//! 失效受影响用户的缓存页，持久化成功后确认事件。
//!
//! ## 模块结构
//!
//! - `audience`: 受众解析（actor -> 当前订阅者快照）
//! - `source`: 事件源抽象及 Kafka / 内存实现
//! - `pipeline`: 固定数量 worker 的扇出管道

pub mod audience;
pub mod pipeline;
pub mod source;

pub use audience::AudienceResolver;
pub use pipeline::{DEFAULT_WORKERS, FanoutPipeline, FanoutReport};
pub use source::{
    EventSource, KafkaEventSource, MemoryEventPublisher, MemoryEventSource, memory_channel,
};
