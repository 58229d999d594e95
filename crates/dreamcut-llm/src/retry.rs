use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::media::MediaType;
use dreamcut_core::message::Message;
use dreamcut_core::model::{
    CallOptions, ChatModel, ChatResult, VisionModel, VisionRequest, VisionResponse,
};

/// Exponential backoff settings for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, including a server's `Retry-After`.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, err: &DreamcutError) -> Duration {
        if let DreamcutError::Model(ModelError::RateLimited {
            retry_after_secs: Some(secs),
        }) = err
        {
            return Duration::from_secs(*secs).min(Duration::from_millis(self.max_delay_ms));
        }
        let base_ms = self.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(16));
        // Jitter from the clock's nanoseconds keeps concurrent retries apart.
        let jitter_ms = if self.base_delay_ms == 0 {
            0
        } else {
            (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos()
                % 100) as u64
        };
        Duration::from_millis(base_ms.saturating_add(jitter_ms).min(self.max_delay_ms))
    }
}

fn is_retryable(err: &DreamcutError) -> bool {
    matches!(err, DreamcutError::Model(e) if e.is_retryable())
}

/// Execute a provider call, retrying retryable model errors with backoff.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if retries < policy.max_retries && is_retryable(&e) => {
                retries += 1;
                let delay = policy.delay_for(retries, &e);
                tracing::warn!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %e, "retrying provider call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A `ChatModel` wrapper that applies a `RetryPolicy` to every call.
pub struct RetryingChatModel<M> {
    inner: M,
    policy: RetryPolicy,
}

impl<M: ChatModel> RetryingChatModel<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<M: ChatModel> ChatModel for RetryingChatModel<M> {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        with_retry(self.policy, || self.inner.generate(messages, options)).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// A `VisionModel` wrapper that applies a `RetryPolicy` to every call.
pub struct RetryingVisionModel<V> {
    inner: V,
    policy: RetryPolicy,
}

impl<V: VisionModel> RetryingVisionModel<V> {
    pub fn new(inner: V, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<V: VisionModel> VisionModel for RetryingVisionModel<V> {
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        with_retry(self.policy, || self.inner.describe(request)).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn supports(&self, media_type: MediaType) -> bool {
        self.inner.supports(media_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn retry_succeeds_first_try() {
        let result = with_retry(fast(), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(fast(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DreamcutError::Model(ModelError::Timeout("slow".into())))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = with_retry(fast(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DreamcutError::Model(ModelError::Auth("bad key".into()))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhausts_all_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = with_retry(fast(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DreamcutError::Model(ModelError::ApiRequest(
                    "HTTP 503 Service Unavailable: overloaded".into(),
                )))
            }
        })
        .await;

        assert!(result.is_err());
        // 1 initial + 3 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_retries_tries_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = with_retry(RetryPolicy::none(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DreamcutError::Model(ModelError::Timeout("t".into()))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_honours_retry_after() {
        let policy = RetryPolicy::default();
        let err = DreamcutError::Model(ModelError::RateLimited {
            retry_after_secs: Some(7),
        });
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(7));
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            ..RetryPolicy::default()
        };
        let err = DreamcutError::Model(ModelError::RateLimited {
            retry_after_secs: Some(86_400),
        });
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stalled_work_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = with_retry(fast(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DreamcutError::Model(ModelError::Stalled("pred-1".into()))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1000,
            ..RetryPolicy::default()
        };
        let err = DreamcutError::Model(ModelError::Timeout("t".into()));
        let d1 = policy.delay_for(1, &err).as_millis();
        let d3 = policy.delay_for(3, &err).as_millis();
        assert!((1000..1100).contains(&d1));
        assert!((4000..4100).contains(&d3));
    }
}
