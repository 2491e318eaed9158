//! 通知服务领域模型

pub mod audience;
pub mod notification;
pub mod subscription;

pub use audience::Audience;
pub use notification::Notification;
pub use subscription::{Subscription, SubscriptionCursor};
