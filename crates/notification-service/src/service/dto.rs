//! 服务层数据传输对象

use serde::{Deserialize, Serialize};

use crate::models::Subscription;

/// 订阅者分页默认条数
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
/// 订阅者分页最大条数
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 将调用方传入的 limit 规整到 1..=MAX_PAGE_LIMIT，缺省为 DEFAULT_PAGE_LIMIT
pub fn clamp_page_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT)
}

/// 订阅者分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberPage {
    pub subscriptions: Vec<Subscription>,
    /// 下一页游标，已到末页时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
