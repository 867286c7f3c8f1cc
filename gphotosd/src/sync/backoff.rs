use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::{Classify, ErrorKind, chain_matches};

/// Full-jitter exponential delay law: `fraction * min(cap, base * 2^attempt)`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// `fraction` is clamped to `[0, 1]`. Sub-millisecond remainders are dropped.
    pub fn delay(&self, attempt: u32, fraction: f64) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let cap_ms = self.cap.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(cap_ms);
        let delay_ms = (exp as f64 * fraction.clamp(0.0, 1.0)) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Sleep and randomness used by a retry sequence.
pub trait SideEffects: Send {
    /// Uniform sample in `[0, 1]`.
    fn random_fraction(&mut self) -> f64;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

pub struct SystemSideEffects {
    rng: StdRng,
}

impl SystemSideEffects {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for SystemSideEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl SideEffects for SystemSideEffects {
    fn random_fraction(&mut self) -> f64 {
        self.rng.gen_range(0.0..=1.0)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

type SideEffectsFactory = Arc<dyn Fn() -> Box<dyn SideEffects> + Send + Sync>;

/// Holds policy parameters and hands out one fresh [`RetrySequence`] per operation.
#[derive(Clone)]
pub struct ExponentialRetryFactory {
    backoff: Backoff,
    retryable: Arc<HashSet<ErrorKind>>,
    side_effects: SideEffectsFactory,
}

impl ExponentialRetryFactory {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            backoff: Backoff::new(base, cap),
            retryable: Arc::new(HashSet::new()),
            side_effects: Arc::new(|| Box::new(SystemSideEffects::new())),
        }
    }

    /// An empty set means every failure is retried until the deadline.
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = Arc::new(kinds.into_iter().collect());
        self
    }

    pub fn with_side_effects<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SideEffects> + Send + Sync + 'static,
    {
        self.side_effects = Arc::new(factory);
        self
    }

    fn sequence(&self) -> ExponentialRetry {
        ExponentialRetry {
            attempts: 0,
            backoff: self.backoff,
            deadline: Instant::now() + self.backoff.cap(),
            retryable: Arc::clone(&self.retryable),
            side_effects: (self.side_effects)(),
        }
    }
}

#[derive(Clone, Default)]
pub enum RetryPolicy {
    #[default]
    None,
    Exponential(ExponentialRetryFactory),
}

impl RetryPolicy {
    pub fn create(&self) -> RetrySequence {
        match self {
            RetryPolicy::None => RetrySequence::None,
            RetryPolicy::Exponential(factory) => RetrySequence::Exponential(factory.sequence()),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::None => f.write_str("RetryPolicy::None"),
            RetryPolicy::Exponential(factory) => f
                .debug_struct("RetryPolicy::Exponential")
                .field("backoff", &factory.backoff)
                .field("retryable", &factory.retryable)
                .finish(),
        }
    }
}

/// Per-operation retry state. Never shared between operations.
pub enum RetrySequence {
    None,
    Exponential(ExponentialRetry),
}

impl RetrySequence {
    pub fn should_retry(&mut self, err: &dyn Classify) -> bool {
        match self {
            RetrySequence::None => false,
            RetrySequence::Exponential(retry) => retry.should_retry(err),
        }
    }

    /// Sleeps before the next attempt and returns the slept duration.
    pub async fn wait(&mut self) -> Duration {
        match self {
            RetrySequence::None => Duration::ZERO,
            RetrySequence::Exponential(retry) => retry.wait().await,
        }
    }
}

pub struct ExponentialRetry {
    attempts: u32,
    backoff: Backoff,
    deadline: Instant,
    retryable: Arc<HashSet<ErrorKind>>,
    side_effects: Box<dyn SideEffects>,
}

impl ExponentialRetry {
    fn should_retry(&mut self, err: &dyn Classify) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if Instant::now() >= self.deadline {
            return false;
        }
        self.retryable.is_empty() || chain_matches(err, &self.retryable)
    }

    async fn wait(&mut self) -> Duration {
        let fraction = self.side_effects.random_fraction();
        let delay = self.backoff.delay(self.attempts, fraction);
        self.side_effects.sleep(delay).await;
        delay
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::SideEffects;

    /// Returns a fixed fraction and records sleeps instead of performing them.
    #[derive(Clone)]
    pub struct RecordingSideEffects {
        pub fraction: f64,
        pub sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSideEffects {
        pub fn new(fraction: f64) -> Self {
            Self {
                fraction,
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn recorded(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl SideEffects for RecordingSideEffects {
        fn random_fraction(&mut self) -> f64 {
            self.fraction
        }

        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.sleeps.lock().unwrap().push(duration);
            Box::pin(async {})
        }
    }
}
