use crate::error::StoreError;
use crate::store::{CellRange, CollectionMeta, Grid, StructuralEdit, TabularStore, ValueWrite};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the jitter window after the given failed attempt (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
    sleep: SleepFn,
}

impl<S: TabularStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self::with_sleep(inner, policy, thread::sleep)
    }

    pub fn with_sleep(
        inner: S,
        policy: RetryPolicy,
        sleep: impl Fn(Duration) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            policy,
            sleep: Box::new(sleep),
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn call<T>(
        &self,
        op: &str,
        mut f: impl FnMut(&S) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match f(&self.inner) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.policy.jittered(attempt);
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, backing off"
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(op, attempts, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl<S: TabularStore> TabularStore for RetryingStore<S> {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        self.call("collections", |s| s.collections())
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        self.call("read-range", |s| s.read_range(range))
    }

    fn read_ranges(&self, ranges: &[CellRange]) -> Result<Vec<Grid>, StoreError> {
        self.call("read-ranges", |s| s.read_ranges(ranges))
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        self.call("write-values", |s| s.write_values(writes))
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        if edits.iter().all(StructuralEdit::is_replay_safe) {
            return self.call("apply-edits", |s| s.apply_edits(edits));
        }
        // Sent once; the caller re-verifies before deciding to resubmit.
        self.inner.apply_edits(edits)
    }
}
