//! 外部调用的超时与退避重试
//!
//! 所有 I/O 阶段（检索、获取、抽取、合成）共用同一套策略：
//! 每次尝试单独计时，只有瞬时错误（网络、限流、超时）才会退避重试。

use crate::config::Config;
use crate::error::PipelineError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次）
    pub max_attempts: u32,
    /// 单次尝试超时
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 限流时的最小等待
    pub rate_limit_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            timeout: config.request_timeout(),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_backoff_ms),
        }
    }

    /// 第 `attempt` 次（从 0 开始）失败后的等待时间
    ///
    /// 限流时取 `Retry-After` 与本地退避的较大者，但不超过 `max_delay`（或 `rate_limit_delay`，取较大者）
    pub fn backoff_for(&self, attempt: u32, err: &PipelineError) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        match err {
            PipelineError::RateLimit { retry_after_secs } => {
                // 服务端给出的等待时间以退避上限为界
                let ceiling = self.max_delay.max(self.rate_limit_delay);
                let server = Duration::from_secs(retry_after_secs.unwrap_or(0)).min(ceiling);
                exponential.max(self.rate_limit_delay).max(server)
            }
            _ => exponential,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 带超时与指数退避地执行一次外部调用
///
/// # 参数
/// - `policy`: 重试策略
/// - `label`: 日志中显示的调用描述
/// - `operation`: 每次尝试都会重新调用以获得新的 future
///
/// # 返回
/// 第一次成功的结果；不可重试的错误立即返回；次数耗尽时返回最后一次错误
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<T, PipelineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                timeout_secs: policy.timeout.as_secs(),
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= max_attempts {
                    return Err(e);
                }
                let delay = policy.backoff_for(attempt - 1, &e);
                warn!(
                    "{} 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
