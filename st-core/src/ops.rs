//! Operation surface for CLI/service wrappers
//!
//! The engine exposes named operations - Activate, Deactivate, Status,
//! DetailedStatus, and the live monitor - so any dispatcher can call them
//! without knowing the internals. Activate/Deactivate/Status/DetailedStatus
//! live on [`StateMachine`]; this module adds the unprivileged status read
//! and the read-only live monitor loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use st_protocol::{Severity, StatusSnapshot};
use tracing::info;

use crate::constants::{paths, timing};
use crate::state::read_published_status;
use crate::xrun::{WindowCounts, XrunMonitor};

/// Read the last published snapshot from its well-known location.
/// Needs no privileges and no engine instance - this is what a status
/// command or tray icon uses.
pub fn published_status() -> Option<StatusSnapshot> {
    read_published_status(&PathBuf::from(paths::RUN_DIR).join(paths::STATUS_FILE))
}

/// Read-only xrun display loop at a fast cadence.
///
/// Samples the monitor every ~2s and hands each reading to `display` until
/// `cancel` is set. Mutates no tunables; cancellation leaves no partial
/// state behind beyond the monitor's own rolling sample buffer.
pub fn run_live_monitor<F>(monitor: &mut XrunMonitor, cancel: &AtomicBool, mut display: F)
where
    F: FnMut(&WindowCounts, Severity),
{
    info!("Live monitor started");
    while !cancel.load(Ordering::SeqCst) {
        let counts = monitor.sample();
        let severity = monitor.classify(&counts);
        display(&counts, severity);

        // Sleep in short steps so cancellation lands promptly
        let mut remaining = timing::MONITOR_INTERVAL;
        while !remaining.is_zero() {
            if cancel.load(Ordering::SeqCst) {
                info!("Live monitor cancelled");
                return;
            }
            let step = remaining.min(timing::MONITOR_CANCEL_STEP);
            thread::sleep(step);
            remaining -= step;
        }
    }
    info!("Live monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_live_monitor_stops_on_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        let iterations = Arc::new(AtomicUsize::new(0));

        let cancel_clone = Arc::clone(&cancel);
        let iterations_clone = Arc::clone(&iterations);
        let handle = thread::spawn(move || {
            let mut monitor = XrunMonitor::new(Vec::new(), 5);
            run_live_monitor(&mut monitor, &cancel_clone, |_, _| {
                iterations_clone.fetch_add(1, Ordering::SeqCst);
            });
        });

        // Let it complete at least one display pass, then cancel
        let started = Instant::now();
        while iterations.load(Ordering::SeqCst) == 0 && started.elapsed() < Duration::from_secs(5)
        {
            thread::sleep(Duration::from_millis(20));
        }
        cancel.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(iterations.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_published_status_missing_is_none() {
        // The well-known runtime path does not exist in the test sandbox
        if !PathBuf::from(paths::RUN_DIR).exists() {
            assert!(published_status().is_none());
        }
    }
}
