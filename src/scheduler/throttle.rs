//! Bandwidth throttling
//!
//! Samples cumulative bytes transferred over a configured window and parks
//! fetch workers to hold recent bandwidth near a target maximum. Parking is
//! cooperative: a parked worker finishes its in-flight request, returns it,
//! and then stops pulling new work until unparked.

use crate::config::ThrottleConfig;
use std::time::{Duration, Instant};

/// Windowed bandwidth controller over the fetch worker pool
#[derive(Debug)]
pub struct BandwidthThrottle {
    enabled: bool,
    window: Duration,
    target_bytes_per_sec: u64,
    max_workers: usize,
    throttled: usize,
    last_bytes: u64,
    last_tick: Instant,
}

impl BandwidthThrottle {
    pub fn new(config: &ThrottleConfig, max_workers: usize, now: Instant) -> Self {
        let cap = max_workers.saturating_sub(1);
        Self {
            enabled: config.enabled,
            window: Duration::from_secs(config.window_secs),
            target_bytes_per_sec: config.max_bytes_per_sec,
            max_workers,
            throttled: (config.initial_throttled as usize).min(cap),
            last_bytes: 0,
            last_tick: now,
        }
    }

    /// How many workers are currently parked
    pub fn throttled(&self) -> usize {
        if self.enabled {
            self.throttled
        } else {
            0
        }
    }

    /// Whether the given worker should stop pulling new work
    ///
    /// The lowest-indexed workers park first so the set is stable between
    /// adjustments.
    pub fn is_throttled(&self, worker: usize) -> bool {
        self.enabled && worker < self.throttled
    }

    /// Re-evaluates the parked-worker count once per window
    ///
    /// `total_bytes` is the run-cumulative byte counter. The new count is
    /// the average of the proportional ideal and the previous decision, so
    /// one noisy window cannot swing the pool hard.
    pub fn tick(&mut self, now: Instant, total_bytes: u64) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < self.window {
            return None;
        }

        let delta = total_bytes.saturating_sub(self.last_bytes);
        let actual = delta as f64 / elapsed.as_secs_f64();
        let target = self.target_bytes_per_sec as f64;

        let active = (self.max_workers - self.throttled).max(1) as f64;
        let ideal_active = if actual > 0.0 {
            (active * target / actual).min(self.max_workers as f64)
        } else {
            self.max_workers as f64
        };
        let desired = self.max_workers as f64 - ideal_active;

        let smoothed = ((desired + self.throttled as f64) / 2.0).round();
        let cap = self.max_workers.saturating_sub(1);
        self.throttled = (smoothed.max(0.0) as usize).min(cap);

        self.last_bytes = total_bytes;
        self.last_tick = now;
        tracing::debug!(
            "Throttle window: {:.0} B/s against target {:.0} B/s, parking {} of {} workers",
            actual,
            target,
            self.throttled,
            self.max_workers
        );
        Some(self.throttled)
    }
}
