use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::BillingConfig;
use crate::error::BillingError;

/// 冲突重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 第 attempt 次重试前的等待: base_delay * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&BillingConfig> for RetryPolicy {
    fn from(config: &BillingConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay())
    }
}

/// 遇到可重试错误 (锁冲突/版本冲突) 时指数退避重跑整个操作
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, BillingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BillingError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "[Retry] 第 {} 次重试, 等待 {:?}: {}",
                    attempt + 1,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> BillingError {
        BillingError::ConcurrentModification {
            entity: "invoice",
            key: "1".into(),
        }
    }

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = retry_on_conflict(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict().closing(1, "202401"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<(), _> = retry_on_conflict(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: Result<(), _> = retry_on_conflict(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BillingError::NoUnits { condominium_id: 1 })
        })
        .await;
        assert!(matches!(result, Err(BillingError::NoUnits { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
