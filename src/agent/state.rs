//! Backup cycle state machine
//!
//! Single-flight guard: at most one cycle runs at a time per agent.
//! `start`, `complete`, and `check_timeout` are the only mutators; all of
//! them take the internal lock.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Cycles that run longer than this are force-failed.
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct StateInner {
    in_progress: bool,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    current_source: Option<String>,
    last_successful: Option<DateTime<Utc>>,
}

/// Mutex-protected backup state.
#[derive(Debug, Default)]
pub struct BackupState {
    inner: Mutex<StateInner>,
}

impl BackupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to start a cycle. Returns false if one is already running; the
    /// caller must skip this tick.
    pub fn start(&self, source: &str) -> bool {
        let mut inner = self.inner.lock().expect("backup state lock poisoned");
        if inner.in_progress {
            return false;
        }
        inner.in_progress = true;
        inner.started = Some(Instant::now());
        inner.started_at = Some(Utc::now());
        inner.current_source = Some(source.to_string());
        true
    }

    /// Finish the running cycle. Updates `last_successful` on success.
    pub fn complete(&self, success: bool) {
        let mut inner = self.inner.lock().expect("backup state lock poisoned");
        if success {
            inner.last_successful = inner.started_at;
        }
        inner.in_progress = false;
        inner.started = None;
        inner.started_at = None;
        inner.current_source = None;
    }

    pub fn in_progress(&self) -> bool {
        self.inner.lock().expect("backup state lock poisoned").in_progress
    }

    pub fn current_source(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("backup state lock poisoned")
            .current_source
            .clone()
    }

    pub fn last_successful(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().expect("backup state lock poisoned").last_successful
    }

    /// Seconds the current cycle has been running, or zero.
    pub fn cycle_duration(&self) -> Duration {
        let inner = self.inner.lock().expect("backup state lock poisoned");
        match (inner.in_progress, inner.started) {
            (true, Some(started)) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Force-fail a cycle that has run past `max_duration`. Returns true
    /// if a stuck cycle was cleared. The orchestrator calls this every
    /// tick so a wedged cycle cannot block the agent forever.
    pub fn check_timeout(&self, max_duration: Duration) -> bool {
        let mut inner = self.inner.lock().expect("backup state lock poisoned");
        let timed_out = matches!(
            (inner.in_progress, inner.started),
            (true, Some(started)) if started.elapsed() > max_duration
        );
        if timed_out {
            inner.in_progress = false;
            inner.started = None;
            inner.started_at = None;
            inner.current_source = None;
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_complete_round_trip() {
        let state = BackupState::new();
        assert!(!state.in_progress());

        assert!(state.start("realtime"));
        assert!(state.in_progress());
        assert_eq!(state.current_source().as_deref(), Some("realtime"));

        state.complete(true);
        assert!(!state.in_progress());
        assert!(state.last_successful().is_some());
    }

    #[test]
    fn test_second_start_rejected() {
        let state = BackupState::new();
        assert!(state.start("weekly"));
        assert!(!state.start("monthly"));
        // The running cycle's source is untouched by the rejected start.
        assert_eq!(state.current_source().as_deref(), Some("weekly"));
    }

    #[test]
    fn test_failed_cycle_does_not_update_last_successful() {
        let state = BackupState::new();
        state.start("realtime");
        state.complete(false);
        assert!(state.last_successful().is_none());

        state.start("realtime");
        state.complete(true);
        assert!(state.last_successful().is_some());
    }

    #[test]
    fn test_timeout_clears_stuck_cycle() {
        let state = BackupState::new();
        state.start("weekly");

        assert!(!state.check_timeout(Duration::from_secs(3600)));
        assert!(state.in_progress());

        // Zero budget: any running cycle has timed out.
        assert!(state.check_timeout(Duration::ZERO));
        assert!(!state.in_progress());
        assert!(state.last_successful().is_none());

        // Idle state never times out.
        assert!(!state.check_timeout(Duration::ZERO));
    }

    #[test]
    fn test_single_flight_across_threads() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let state = Arc::new(BackupState::new());
        let acquired = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let acquired = Arc::clone(&acquired);
                std::thread::spawn(move || {
                    if state.start("realtime") {
                        acquired.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert!(state.in_progress());
    }
}
