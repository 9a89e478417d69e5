use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::services::attempt::AttemptToken;

/// Source of the wait between checks. Swappable so polling can be tested
/// without real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Settled { value: T, checks: u32 },
    Cancelled,
}

/// Sequential retry-until-terminal polling. Each check is scheduled only
/// after the previous one finished, so a slow backend slows the loop down
/// instead of piling requests up.
#[derive(Clone)]
pub struct OrderStatusPoller {
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl OrderStatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self::with_sleeper(interval, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        OrderStatusPoller { interval, sleeper }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits one interval, fetches, and repeats until `is_terminal` accepts
    /// a value or `token` goes stale. Failed fetches are logged and retried.
    pub async fn poll_until<T, E, F, Fut, P>(
        &self,
        token: &AttemptToken,
        mut fetch: F,
        is_terminal: P,
    ) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&T) -> bool,
    {
        let mut checks = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return PollOutcome::Cancelled,
                _ = self.sleeper.sleep(self.interval) => {}
            }

            checks += 1;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return PollOutcome::Cancelled,
                result = fetch() => result,
            };

            if !token.is_current() {
                return PollOutcome::Cancelled;
            }

            match result {
                Ok(value) if is_terminal(&value) => {
                    debug!(checks, "Poll reached terminal state");
                    return PollOutcome::Settled { value, checks };
                }
                Ok(_) => debug!(checks, "Poll check not terminal yet"),
                Err(e) => warn!(checks, "Poll check failed: {}", e),
            }
        }
    }
}

impl Default for OrderStatusPoller {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::attempt::Generation;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_settles_on_third_check() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let poller = OrderStatusPoller::with_sleeper(Duration::from_millis(1000), sleeper.clone());
        let generation = Generation::new();
        let token = generation.begin();
        let calls = AtomicU32::new(0);

        let outcome = poller
            .poll_until(
                &token,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok::<u32, String>(n) }
                },
                |n| *n == 3,
            )
            .await;

        assert_eq!(outcome, PollOutcome::Settled { value: 3, checks: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.waits.lock().unwrap(),
            vec![Duration::from_millis(1000); 3]
        );
    }

    #[tokio::test]
    async fn test_errors_keep_polling() {
        let poller = OrderStatusPoller::with_sleeper(
            Duration::from_millis(5),
            Arc::new(RecordingSleeper::default()),
        );
        let token = Generation::new().begin();
        let calls = AtomicU32::new(0);

        let outcome = poller
            .poll_until(
                &token,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("backend unavailable".to_string())
                        } else {
                            Ok(true)
                        }
                    }
                },
                |done| *done,
            )
            .await;

        assert_eq!(outcome, PollOutcome::Settled { value: true, checks: 3 });
    }

    #[tokio::test]
    async fn test_cancel_before_first_check() {
        let poller = OrderStatusPoller::new(Duration::from_secs(3600));
        let generation = Generation::new();
        let token = generation.begin();
        let calls = AtomicU32::new(0);

        let cancel = async {
            tokio::task::yield_now().await;
            generation.invalidate();
        };
        let poll = poller.poll_until(
            &token,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<bool, String>(true) }
            },
            |done| *done,
        );

        let (outcome, _) = tokio::join!(poll, cancel);
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_result_landing_after_cancel_is_dropped() {
        let poller = OrderStatusPoller::with_sleeper(
            Duration::from_millis(5),
            Arc::new(RecordingSleeper::default()),
        );
        let generation = Generation::new();
        let token = generation.begin();
        let owner = &generation;

        // The check is already running when the owner goes away, and it
        // still answers with a terminal value.
        let outcome = poller
            .poll_until(
                &token,
                move || async move {
                    owner.invalidate();
                    Ok::<bool, String>(true)
                },
                |done| *done,
            )
            .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_real_timer_spacing() {
        let interval = Duration::from_millis(30);
        let poller = OrderStatusPoller::new(interval);
        let token = Generation::new().begin();
        let stamps = Mutex::new(Vec::new());

        let outcome = poller
            .poll_until(
                &token,
                || {
                    let mut stamps = stamps.lock().unwrap();
                    stamps.push(tokio::time::Instant::now());
                    let n = stamps.len();
                    async move { Ok::<usize, String>(n) }
                },
                |n| *n == 3,
            )
            .await;

        assert!(matches!(outcome, PollOutcome::Settled { checks: 3, .. }));
        let stamps = stamps.lock().unwrap();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }
}
