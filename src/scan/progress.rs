//! Per-run shared state: cooperative stop flag, progress counters, and the
//! scan event journal.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One audit-trail entry. Appended during a run and iterated only when the
/// results summary is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub detail: String,
    pub status: String,
}

/// State threaded through one scan or verification run.
///
/// Counters are atomics so batch workers report without locking; the journal
/// takes a short lock per append. The stop flag is cooperative and observed
/// at batch boundaries only.
#[derive(Debug)]
pub struct RunContext {
    stop: AtomicBool,
    total: AtomicU64,
    completed: AtomicU64,
    found: AtomicU64,
    started: Instant,
    events: Mutex<Vec<ScanEvent>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            found: AtomicU64::new(0),
            started: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Add `n` finished tasks and return the new completed count.
    pub fn add_completed(&self, n: u64) -> u64 {
        self.completed.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn mark_found(&self) {
        self.found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn found(&self) -> u64 {
        self.found.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Completed tasks per second since the run started.
    pub fn throughput(&self) -> f64 {
        self.completed() as f64 / self.elapsed().as_secs_f64().max(1.0)
    }

    /// Append one journal entry.
    pub fn record(&self, category: &str, detail: impl Into<String>, status: impl Into<String>) {
        let event = ScanEvent {
            timestamp: Utc::now(),
            category: category.to_string(),
            detail: detail.into(),
            status: status.into(),
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Snapshot of the journal so far, in append order.
    pub fn events(&self) -> Vec<ScanEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let ctx = RunContext::new();
        ctx.set_total(10);
        assert_eq!(ctx.add_completed(4), 4);
        assert_eq!(ctx.add_completed(6), 10);
        assert_eq!(ctx.completed(), ctx.total());
        ctx.mark_found();
        ctx.mark_found();
        assert_eq!(ctx.found(), 2);
    }

    #[test]
    fn test_stop_flag_is_sticky() {
        let ctx = RunContext::new();
        assert!(!ctx.is_stopped());
        ctx.request_stop();
        assert!(ctx.is_stopped());
        assert!(ctx.is_stopped());
    }

    #[test]
    fn test_journal_preserves_append_order() {
        let ctx = RunContext::new();
        ctx.record("discovery", "probing 8 targets", "started");
        ctx.record("discovery", "found 1 open proxy", "completed");
        let events = ctx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "started");
        assert_eq!(events[1].status, "completed");
    }
}
