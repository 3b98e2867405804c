use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use forge_core::errors::{ErrorClass, GatewayError};
use forge_core::provider::{ChunkStream, ModelProvider, ModelRequest};

/// Retry settings for opening model streams.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff added or removed at random, 0.0 to disable.
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
        }
    }
}

impl ReliableConfig {
    /// Backoff before retry `attempt` (0-based): `min(base * 2^attempt, max)`
    /// spread by the jitter factor. A server hint wins when present.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if self.jitter_factor <= 0.0 {
            return backoff;
        }
        let spread = backoff.as_secs_f64() * self.jitter_factor;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((backoff.as_secs_f64() + offset).max(0.0))
    }
}

/// Retries opening a stream on network-class failures.
///
/// Only the open is retried. Once a stream is handed back it is committed:
/// errors inside it reach the caller as chunk errors.
pub struct ReliableProvider<P: ModelProvider> {
    inner: P,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl<P: ModelProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<P: ModelProvider> ModelProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn open_stream(&self, request: &ModelRequest) -> Result<ChunkStream, GatewayError> {
        let mut attempt = 0;
        let err = loop {
            let e = match self.inner.open_stream(request).await {
                Ok(stream) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "model stream opened after retry");
                    }
                    return Ok(stream);
                }
                Err(e) => e,
            };
            if e.class() != ErrorClass::Retryable || attempt >= self.config.max_retries {
                break e;
            }

            let delay = self.config.delay_for(attempt, e.suggested_delay());
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error_kind = e.error_kind(),
                error = %e,
                "model stream failed to open; backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        };

        if attempt > 0 {
            warn!(attempts = attempt + 1, error_kind = err.error_kind(), "giving up on model stream");
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn no_jitter(max_retries: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_network_failures() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::NetworkError("dns lookup failed".into())),
            MockResponse::Error(GatewayError::ServerError {
                status: 502,
                body: "bad gateway".into(),
            }),
            MockResponse::text("ok"),
        ]);
        let reliable = ReliableProvider::new(mock, no_jitter(3));

        assert!(reliable.open_stream(&ModelRequest::empty()).await.is_ok());
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_return_immediately() {
        for fatal in [
            GatewayError::AuthenticationFailed("bad key".into()),
            GatewayError::InvalidRequest("no such model".into()),
            GatewayError::Cancelled,
        ] {
            let mock = MockProvider::new(vec![MockResponse::Error(fatal), MockResponse::text("unused")]);
            let reliable = ReliableProvider::with_defaults(mock);
            assert!(reliable.open_stream(&ModelRequest::empty()).await.is_err());
            assert_eq!(reliable.inner().call_count(), 1);
            assert_eq!(reliable.total_retries(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_retries() {
        let responses = (0..5)
            .map(|_| MockResponse::Error(GatewayError::ProviderOverloaded))
            .collect();
        let reliable = ReliableProvider::new(MockProvider::new(responses), no_jitter(2));

        let err = reliable
            .open_stream(&ModelRequest::empty())
            .await
            .err()
            .expect("expected error");
        assert!(matches!(err, GatewayError::ProviderOverloaded));
        assert_eq!(reliable.inner().call_count(), 3);
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn honours_retry_after_hint() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            MockResponse::text("ok"),
        ]);
        let reliable = ReliableProvider::new(mock, no_jitter(1));

        let started = tokio::time::Instant::now();
        assert!(reliable.open_stream(&ModelRequest::empty()).await.is_ok());
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let delays: Vec<_> = (0..5).map(|a| config.delay_for(a, None).as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_factor() {
        let config = ReliableConfig::default();
        for _ in 0..50 {
            let ms = config.delay_for(1, None).as_millis();
            assert!((1599..=2400).contains(&ms), "delay out of range: {ms}");
        }
    }

    #[test]
    fn wrapper_reports_inner_identity() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
    }
}
