//! Clock Abstraction for the Bucket Index
//!
//! Every arrival is stamped through this trait, so production code reads real
//! time while tests and the DST harness drive a virtual clock by hand.
//!
//! ## Keys
//!
//! Arrival times carry millisecond precision. Buckets are keyed by the whole
//! second an arrival falls into (`floor(arrival, 1s)`), see [`BucketKey`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Arrival time in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ArrivalTime(pub u64);

impl ArrivalTime {
    pub fn from_secs(secs: u64) -> Self {
        ArrivalTime(secs.saturating_mul(1000))
    }

    /// The one-second bucket this arrival belongs to
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey(self.0 / 1000)
    }

    pub fn saturating_sub(&self, other: ArrivalTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

/// Whole seconds since the Unix epoch, naming one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BucketKey(pub u64);

impl BucketKey {
    pub fn from_secs(secs: u64) -> Self {
        BucketKey(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// First millisecond covered by this bucket
    pub fn start(&self) -> ArrivalTime {
        ArrivalTime::from_secs(self.0)
    }

    /// Key `secs` seconds before this one, clamped at the epoch
    pub fn back(&self, secs: u64) -> BucketKey {
        BucketKey(self.0.saturating_sub(secs))
    }

    /// Age of the bucket measured from its first millisecond
    pub fn age_at(&self, now: ArrivalTime) -> Duration {
        now.saturating_sub(self.start())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Clock trait for arrival stamping
///
/// Implementations:
/// - `ProductionClock`: real time, never steps backwards
/// - `SimulatedClock`: controlled virtual time for tests and DST
pub trait StoreClock: Send + Sync + Clone + 'static {
    /// Get current time
    fn now(&self) -> ArrivalTime;
}

/// Production clock using real system time
///
/// Wall time is read once at construction and advanced by a monotonic
/// `Instant`, so NTP steps after startup cannot reorder bucket keys.
#[derive(Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl StoreClock for ProductionClock {
    fn now(&self) -> ArrivalTime {
        let elapsed = self.start.elapsed().as_millis() as u64;
        ArrivalTime(self.start_millis.saturating_add(elapsed))
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
/// Clones share the same underlying time.
#[derive(Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given time
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance time by the given duration
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance time by milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl StoreClock for SimulatedClock {
    fn now(&self) -> ArrivalTime {
        ArrivalTime(self.time_ms.load(Ordering::SeqCst))
    }
}
