//! Pipeline counters shared between the dispatcher and the periodic reporter.
use chrono::{DateTime, Utc};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub errors: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub uptime: Duration,
}

/// Counters only grow, except through an explicit [`StatsTracker::reset`].
#[derive(Debug)]
pub struct StatsTracker {
    received: AtomicU64,
    sent: AtomicU64,
    errors: AtomicU64,
    last_message_time: Mutex<Option<DateTime<Utc>>>,
    start_time: Instant,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_message_time: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let mut last = self
            .last_message_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Utc::now());
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_message_time = *self
            .last_message_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_message_time,
            uptime: self.start_time.elapsed(),
        }
    }

    /// Zero the counters and forget the last message time. Uptime keeps
    /// counting from process start.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.sent.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        let mut last = self
            .last_message_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = None;
    }

    pub fn log_stats(&self) {
        let snap = self.snapshot();
        let last = snap
            .last_message_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        info!(
            "Stats: uptime {}, received {}, sent {}, errors {}, last message {}",
            format_uptime(snap.uptime),
            snap.received,
            snap.sent,
            snap.errors,
            last
        );
    }
}

/// `HH:MM:SS`; hours grow past 24 rather than rolling into days.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_and_reset() {
        let stats = StatsTracker::new();
        assert_eq!(stats.snapshot().last_message_time, None);
        stats.record_received();
        stats.record_received();
        stats.record_sent();
        stats.record_error();
        let snap = stats.snapshot();
        assert_eq!((snap.received, snap.sent, snap.errors), (2, 1, 1));
        assert!(snap.last_message_time.is_some());

        stats.reset();
        let snap = stats.snapshot();
        assert_eq!((snap.received, snap.sent, snap.errors), (0, 0, 0));
        assert_eq!(snap.last_message_time, None);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received();
                        stats.record_sent();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.received, 8000);
        assert_eq!(snap.sent, 8000);
    }

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_uptime(Duration::from_secs(90_000)), "25:00:00");
    }
}
