//! Progress reporting for long batch jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

/// Thread-safe completion counter that periodically logs progress.
///
/// A report is emitted whenever another `step_percent` of the total is
/// completed or `interval` has passed since the previous report, whichever
/// comes first.
#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    total: usize,
    completed: AtomicUsize,
    started_at: Instant,
    step_percent: usize,
    interval: Duration,
    last_report: Mutex<(usize, Instant)>,
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn rate_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            0.0
        } else {
            self.completed as f64 / secs
        }
    }

    /// Estimated time to completion at the current rate.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate_per_sec();
        if rate <= 0.0 || self.completed >= self.total {
            return None;
        }
        let remaining = (self.total - self.completed) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            total,
            completed: AtomicUsize::new(0),
            started_at: now,
            step_percent: 10,
            interval: Duration::from_secs(30),
            last_report: Mutex::new((0, now)),
        }
    }

    /// Overrides the reporting cadence.
    pub fn with_cadence(mut self, step_percent: usize, interval: Duration) -> Self {
        self.step_percent = step_percent.max(1);
        self.interval = interval;
        self
    }

    /// Records `n` more completed items and reports if a threshold was crossed.
    ///
    /// Returns `true` when a progress line was emitted.
    pub fn increment(&self, n: usize) -> bool {
        let completed = self.completed.fetch_add(n, Ordering::Relaxed) + n;
        self.maybe_report(completed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Relaxed).min(self.total),
            total: self.total,
            elapsed: self.started_at.elapsed(),
        }
    }

    /// Logs the final summary line.
    pub fn finish(&self) -> ProgressSnapshot {
        let snapshot = self.snapshot();
        info!(
            "{}: finished {}/{} in {:.2}s ({:.1}/s)",
            self.label,
            snapshot.completed,
            snapshot.total,
            snapshot.elapsed.as_secs_f64(),
            snapshot.rate_per_sec()
        );
        snapshot
    }

    fn maybe_report(&self, completed: usize) -> bool {
        if self.total == 0 {
            return false;
        }
        let step = (self.total * self.step_percent / 100).max(1);
        let Ok(mut last) = self.last_report.lock() else {
            return false;
        };
        let (last_count, last_at) = *last;
        let due_by_count = completed >= last_count + step;
        let due_by_time = last_at.elapsed() >= self.interval && completed > last_count;
        if !(due_by_count || due_by_time) {
            return false;
        }
        *last = (completed, Instant::now());
        drop(last);

        let snapshot = self.snapshot();
        match snapshot.eta() {
            Some(eta) => info!(
                "{}: {}/{} ({:.0}%), {:.1}/s, eta {}s",
                self.label,
                snapshot.completed,
                snapshot.total,
                snapshot.percent(),
                snapshot.rate_per_sec(),
                eta.as_secs()
            ),
            None => info!(
                "{}: {}/{} ({:.0}%)",
                self.label,
                snapshot.completed,
                snapshot.total,
                snapshot.percent()
            ),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reports_on_percent_steps() {
        let tracker = ProgressTracker::new("refs", 100).with_cadence(25, Duration::from_secs(3600));
        assert!(!tracker.increment(10));
        assert!(tracker.increment(15));
        assert!(!tracker.increment(5));
        assert!(tracker.increment(25));
        assert_eq!(tracker.snapshot().completed, 55);
    }

    #[test]
    fn test_concurrent_increments() {
        let tracker = Arc::new(ProgressTracker::new("refs", 8_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        t.increment(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = tracker.finish();
        assert_eq!(snapshot.completed, 8_000);
        assert_eq!(snapshot.percent(), 100.0);
    }

    #[test]
    fn test_empty_total_is_complete() {
        let tracker = ProgressTracker::new("empty", 0);
        assert!(!tracker.increment(0));
        assert_eq!(tracker.snapshot().percent(), 100.0);
        assert!(tracker.snapshot().eta().is_none());
    }
}
