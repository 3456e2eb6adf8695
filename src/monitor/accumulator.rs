//! Monitor Accumulator
//!
//! Lock-free counters for sampled cache traffic. Every field is an atomic so
//! that request threads never contend on a lock when recording.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::domain::ports::StatsSnapshot;

// =============================================================================
// Sampler
// =============================================================================

/// Probabilistic event sampler.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    /// Rate is clamped to `[0, 1]`
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether to record this event
    pub fn sample(&self) -> bool {
        if self.rate >= 1.0 {
            true
        } else if self.rate <= 0.0 {
            false
        } else {
            rand::random::<f64>() < self.rate
        }
    }
}

// =============================================================================
// Response Time Ring
// =============================================================================

/// Fixed-capacity ring of recent response times, stored as microseconds.
///
/// Writers claim a slot with one `fetch_add`; the oldest sample is
/// overwritten once the ring is full. A reader racing a writer may see the
/// slot's previous value.
#[derive(Debug)]
pub struct ResponseTimeRing {
    slots: Box<[AtomicU64]>,
    written: AtomicU64,
}

impl ResponseTimeRing {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            written: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        (self.written.load(Ordering::Acquire) as usize).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a response time in milliseconds. Negative and non-finite
    /// values are ignored.
    pub fn push(&self, duration_ms: f64) {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return;
        }
        let micros = (duration_ms * 1000.0).round() as u64;
        let index = self.written.fetch_add(1, Ordering::AcqRel) as usize % self.slots.len();
        self.slots[index].store(micros, Ordering::Release);
    }

    /// Mean in milliseconds, `0` when empty
    pub fn average_ms(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        // Saturated samples are u64::MAX; summing in u128 cannot overflow
        let total: u128 = self.slots[..len]
            .iter()
            .map(|s| u128::from(s.load(Ordering::Acquire)))
            .sum();
        total as f64 / len as f64 / 1000.0
    }
}

// =============================================================================
// Accumulator
// =============================================================================

/// In-process monitoring counters. Only reset by restarting the process.
#[derive(Debug)]
pub struct MonitorAccumulator {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    memory_usage_bytes: AtomicU64,
    response_times: ResponseTimeRing,
}

impl MonitorAccumulator {
    pub fn new(response_buffer_size: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            memory_usage_bytes: AtomicU64::new(0),
            response_times: ResponseTimeRing::new(response_buffer_size),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_memory_usage(&self, bytes: u64) {
        self.memory_usage_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, duration_ms: f64) {
        self.response_times.push(duration_ms);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_usage_bytes.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)`, `0` with no lookups
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn average_response_time_ms(&self) -> f64 {
        self.response_times.average_ms()
    }

    /// Project the counters into a snapshot stamped `timestamp`
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> StatsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        StatsSnapshot {
            timestamp,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            memory_usage_bytes: self.memory_usage(),
            avg_response_time_ms: self.average_response_time_ms(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
