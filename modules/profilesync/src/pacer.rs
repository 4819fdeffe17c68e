// Request pacing and throttle recovery.
//
// Every remote call in a run goes through one Pacer. Before each call it
// sleeps a random delay from the current window. A throttle signal
// (`SyncError::RateLimited`) cools down and retries the same call; each
// retry widens the window for later calls, each success narrows it again.
// A transient network failure is retried after a short doubling backoff,
// without widening the window. Any other error passes straight through.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use profilesync_common::{Config, Result, SyncError};

/// Growth of the delay window per outstanding failure.
const WIDEN_FACTOR: f64 = 1.5;
/// The window never grows beyond this multiple of the baseline.
const MAX_WIDEN: f64 = 8.0;
/// First wait before retrying a transient failure; doubles per retry.
const TRANSIENT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub cooldown: Duration,
    pub max_retries: u32,
}

impl From<&Config> for PacerConfig {
    fn from(config: &Config) -> Self {
        Self {
            min_delay: config.min_delay,
            max_delay: config.max_delay,
            cooldown: config.throttle_cooldown,
            max_retries: config.max_throttle_retries,
        }
    }
}

/// Mutable pacing state. Owned by one Pacer, reset at run start.
#[derive(Debug, Default)]
struct DelayState {
    /// Throttle retries not yet paid back by successful calls.
    failures: u32,
}

impl DelayState {
    fn scale(&self) -> f64 {
        WIDEN_FACTOR.powi(self.failures as i32).min(MAX_WIDEN)
    }
}

pub struct Pacer {
    config: PacerConfig,
    state: Mutex<DelayState>,
}

impl Pacer {
    pub fn new(config: PacerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DelayState::default()),
        }
    }

    /// Drop any accumulated slow-down.
    pub fn reset(&self) {
        *self.state() = DelayState::default();
    }

    pub fn failures(&self) -> u32 {
        self.state().failures
    }

    /// Current `[min, max]` pre-call delay window.
    pub fn window(&self) -> (Duration, Duration) {
        let scale = self.state().scale();
        if scale <= 1.0 {
            return self.baseline();
        }
        (
            self.config.min_delay.mul_f64(scale),
            self.config.max_delay.mul_f64(scale),
        )
    }

    pub fn baseline(&self) -> (Duration, Duration) {
        (self.config.min_delay, self.config.max_delay)
    }

    /// Run `op` under the pacing policy. `op` is called again for each retry,
    /// so it must build a fresh request every time.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        let mut transient_retries = 0u32;
        loop {
            let delay = self.next_delay();
            if !delay.is_zero() {
                debug!(label, delay_ms = delay.as_millis() as u64, "Pacing");
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if e.is_throttle_signal() => {
                    if retries >= self.config.max_retries {
                        warn!(label, retries, error = %e, "Throttling persisted, giving up");
                        return Err(SyncError::RemoteThrottled { attempts: retries });
                    }
                    retries += 1;
                    self.record_throttle();
                    warn!(
                        label,
                        retry = retries,
                        max_retries = self.config.max_retries,
                        cooldown_secs = self.config.cooldown.as_secs_f64(),
                        error = %e,
                        "Throttled, cooling down"
                    );
                    tokio::time::sleep(self.config.cooldown).await;
                }
                Err(e) if e.is_transient() => {
                    if transient_retries >= self.config.max_retries {
                        warn!(label, retries = transient_retries, error = %e, "Transient failure persisted, giving up");
                        return Err(e);
                    }
                    let backoff = TRANSIENT_BACKOFF * 2u32.pow(transient_retries);
                    transient_retries += 1;
                    warn!(
                        label,
                        retry = transient_retries,
                        max_retries = self.config.max_retries,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let (lo, hi) = self.window();
        if hi <= lo {
            return lo;
        }
        let secs = rand::rng().random_range(lo.as_secs_f64()..=hi.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn record_throttle(&self) {
        self.state().failures += 1;
    }

    fn record_success(&self) {
        let mut state = self.state();
        state.failures = state.failures.saturating_sub(1);
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
