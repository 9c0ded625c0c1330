/// Outbound budget for classifier calls.
///
/// A request reserves every upstream call it will make up front (one for
/// analyze, one per resolved guideline for classify), so a multi-guideline
/// fan-out either runs in full or is refused before any call leaves.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("request needs {requested} classifier calls, more than RATE_LIMIT_RPS={per_second}")]
    TooLarge { requested: u32, per_second: u32 },

    #[error("classifier rate limit exceeded (RATE_LIMIT_RPS={per_second}): try again in ~{retry_after_ms}ms")]
    Exhausted { per_second: u32, retry_after_ms: u64 },
}

#[derive(Clone)]
pub struct ClassifierBudget {
    per_second: u32,
    bucket: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, per_second: u32) {
        let elapsed = now.saturating_duration_since(self.refilled_at);
        let earned = elapsed.as_secs_f64() * f64::from(per_second);
        self.available = (self.available + earned).min(f64::from(per_second));
        self.refilled_at = now;
    }
}

impl ClassifierBudget {
    /// `None` when `per_second` is zero, which disables throttling.
    pub fn new(per_second: u32) -> Option<Self> {
        (per_second > 0).then(|| Self {
            per_second,
            bucket: Arc::new(Mutex::new(Bucket {
                available: f64::from(per_second),
                refilled_at: Instant::now(),
            })),
        })
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .and_then(Self::new)
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Take `calls` tokens at once or none at all.
    pub fn reserve(&self, calls: u32) -> Result<(), BudgetError> {
        if calls > self.per_second {
            return Err(BudgetError::TooLarge {
                requested: calls,
                per_second: self.per_second,
            });
        }

        // The bucket holds plain numbers, so a poisoned lock is still usable.
        let mut bucket = self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.refill(Instant::now(), self.per_second);

        let needed = f64::from(calls);
        if bucket.available >= needed {
            bucket.available -= needed;
            return Ok(());
        }

        let shortfall = needed - bucket.available;
        let wait = Duration::from_secs_f64(shortfall / f64::from(self.per_second));
        Err(BudgetError::Exhausted {
            per_second: self.per_second,
            retry_after_ms: wait.as_millis().max(1) as u64,
        })
    }
}
