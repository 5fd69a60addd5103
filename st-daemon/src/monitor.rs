//! Live monitor mode
//!
//! Read-only xrun display at a fast cadence, for watching a session while
//! tuning. Mutates nothing; ctrl-c stops it cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use st_core::constants::paths;
use st_core::xrun::XrunMonitor;
use st_core::{get_cached_settings, run_live_monitor};

pub fn run_monitor_mode() {
    let settings = get_cached_settings();
    let mut monitor =
        XrunMonitor::with_default_sources(paths::user_home_dir(), settings.xrun.mild_threshold);

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        cancel_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    println!("Live xrun monitor (ctrl-c to stop)");
    println!("{:>6} {:>6} {:>6} {:>6} {:>6}  severity", "5s", "10s", "30s", "1m", "5m");

    run_live_monitor(&mut monitor, &cancel, |counts, severity| {
        let mut row = String::new();
        for window in st_core::constants::xrun::WINDOWS {
            let count = counts.get(window).copied().unwrap_or(0);
            row.push_str(&format!("{:>6} ", count));
        }
        println!("{} {}", row, severity);
    });
}
