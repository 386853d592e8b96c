//! Per-resource-type token-bucket throttle: admits at most `R` calls per
//! second per resource key, and retries once on a rate-limit response with
//! exponential backoff and jitter.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub requests_per_second: f64,
    pub base_retry_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub max_backoff: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            base_retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl ThrottleConfig {
    pub fn with_rate(mut self, requests_per_second: f64) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second.max(f64::MIN_POSITIVE))
    }
}

#[derive(Default)]
struct KeyState {
    last_call_at: Option<Instant>,
    consecutive_errors: u32,
}

/// A textual error is treated as a rate-limit response when it contains any
/// of these substrings, checked case-insensitively.
pub fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
}

/// Builds a `Throttle` from scheduler configuration: the global
/// `requestsPerSecond` default, each job type's documented default rate,
/// overridden by any `resourceSpecificRateLimits` entry.
pub fn build_throttle(config: &crate::config::SchedulerConfig) -> Throttle {
    let default_config = ThrottleConfig::default().with_rate(config.requests_per_second);
    let mut throttle = Throttle::new(default_config);

    for job_type in crate::job::JobType::ALL {
        let rate = config
            .resource_specific_rate_limits
            .get(&job_type)
            .copied()
            .unwrap_or_else(|| job_type.default_rate_per_second());
        throttle = throttle.with_resource_config(job_type.to_string(), ThrottleConfig::default().with_rate(rate));
    }

    throttle
}

/// Per-resource-key admission and retry wrapper around API calls.
pub struct Throttle {
    configs: HashMap<String, ThrottleConfig>,
    default_config: ThrottleConfig,
    state: Mutex<HashMap<String, KeyState>>,
}

impl Throttle {
    pub fn new(default_config: ThrottleConfig) -> Self {
        Self {
            configs: HashMap::new(),
            default_config,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_resource_config(mut self, resource_key: impl Into<String>, config: ThrottleConfig) -> Self {
        self.configs.insert(resource_key.into(), config);
        self
    }

    fn config_for(&self, resource_key: &str) -> &ThrottleConfig {
        self.configs.get(resource_key).unwrap_or(&self.default_config)
    }

    /// Runs `thunk` once admission pacing for `resource_key` permits it. On
    /// an error recognized as a rate-limit response, sleeps for a
    /// jittered exponential backoff and retries the thunk exactly once from
    /// within the throttle. Any other error, or a second failure after the
    /// in-throttle retry, propagates to the caller (retry policy for
    /// non-429 errors is the Scheduler's responsibility).
    pub async fn call<F, Fut, T, E>(&self, resource_key: &str, mut thunk: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.admit(resource_key).await;

        match thunk().await {
            Ok(value) => {
                self.reset_errors(resource_key).await;
                Ok(value)
            }
            Err(err) if is_rate_limit_error(&err.to_string()) => {
                let delay = self.backoff_delay(resource_key).await;
                tracing::warn!(
                    resource_key,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off before single in-throttle retry"
                );
                tokio::time::sleep(delay).await;

                self.admit(resource_key).await;
                match thunk().await {
                    Ok(value) => {
                        self.reset_errors(resource_key).await;
                        Ok(value)
                    }
                    Err(retry_err) => Err(retry_err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Blocks until the next call for `resource_key` is permitted, pacing to
    /// `1000/R` ms since the last admitted call for that key.
    async fn admit(&self, resource_key: &str) {
        let min_interval = self.config_for(resource_key).min_interval();
        let wait = {
            let mut state = self.state.lock().await;
            let entry = state.entry(resource_key.to_string()).or_default();
            let now = Instant::now();
            let wait = entry
                .last_call_at
                .map(|last| {
                    let elapsed = now.checked_duration_since(last).unwrap_or(Duration::ZERO);
                    min_interval.saturating_sub(elapsed)
                })
                .unwrap_or(Duration::ZERO);
            entry.last_call_at = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn backoff_delay(&self, resource_key: &str) -> Duration {
        let config = self.config_for(resource_key).clone();
        let errors = {
            let mut state = self.state.lock().await;
            let entry = state.entry(resource_key.to_string()).or_default();
            entry.consecutive_errors += 1;
            entry.consecutive_errors
        };

        let exponent = (errors - 1) as i32;
        let raw = config.base_retry_delay.as_secs_f64() * config.backoff_factor.powi(exponent);
        let capped = raw.min(config.max_backoff.as_secs_f64());

        let jitter = rand::thread_rng().gen_range(-config.jitter_factor..=config.jitter_factor);
        let jittered = (capped * (1.0 + jitter)).max(0.0);

        Duration::from_secs_f64(jittered)
    }

    async fn reset_errors(&self, resource_key: &str) {
        if let Some(entry) = self.state.lock().await.get_mut(resource_key) {
            entry.consecutive_errors = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct StubError(String);
    impl std::fmt::Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry_on_ok() {
        let throttle = Throttle::new(ThrottleConfig::default().with_rate(1000.0));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<i32, StubError> = throttle
            .call("DISCOVER_GROUPS", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_once_on_rate_limit_then_succeeds() {
        let throttle = Throttle::new(ThrottleConfig {
            requests_per_second: 1000.0,
            base_retry_delay: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..ThrottleConfig::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let handle = tokio::spawn(async move {
            throttle
                .call("DISCOVER_PROJECTS", || {
                    let c = c.clone();
                    async move {
                        let n = c.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            Err(StubError("429 too many requests".into()))
                        } else {
                            Ok(7)
                        }
                    }
                })
                .await
        });

        tokio::time::advance(Duration::from_secs(1)).await;
        let result: Result<i32, StubError> = handle.await.unwrap();

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_error_propagates_without_retry() {
        let throttle = Throttle::new(ThrottleConfig::default().with_rate(1000.0));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<i32, StubError> = throttle
            .call("PROJECT_DETAILS", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(StubError("connection reset".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limit_detection_matches_documented_substrings() {
        assert!(is_rate_limit_error("HTTP 429 Too Many Requests"));
        assert!(is_rate_limit_error("Rate limit exceeded"));
        assert!(is_rate_limit_error("too many requests, slow down"));
        assert!(!is_rate_limit_error("404 not found"));
    }
}
