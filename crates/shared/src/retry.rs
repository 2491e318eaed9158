//! 有限次指数退避重试
//!
//! 扇出管道默认不重试（失败即拒绝事件）；开启后只对调用方判定为
//! 基础设施故障的错误重试，业务错误第一次就返回。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 退避参数
///
/// 第 n 次重试前等待 `initial_delay * multiplier^n`，不超过 `max_delay`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 首次执行之外最多再尝试几次
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// 第 `retry` 次重试（从 0 计）之前的等待时间
    ///
    /// 先在毫秒浮点数上封顶再转换，指数溢出为无穷大时也落在 `max_delay`。
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let cap_ms = self.max_delay.as_millis() as f64;
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        if delay_ms.is_nan() {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms.min(cap_ms) as u64)
    }

    /// 已经重试了 `retries` 次之后是否还能再试
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// 按策略执行异步操作
///
/// `is_retryable` 返回 false 的错误立即返回；重试次数用尽后返回最后一次的错误。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retries = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation = operation_name, retries, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || !policy.should_retry(retries) {
            if retries > 0 {
                warn!(operation = operation_name, retries, error = %err, "重试用尽");
            }
            return Err(err);
        }

        let delay = policy.delay_for_attempt(retries);
        warn!(
            operation = operation_name,
            retry = retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
    }
}
