//! Xrun monitoring
//!
//! Consumes heterogeneous event-log sources and computes xrun counts over
//! sliding time windows (5s/10s/30s/1m/5m). Each source adapter is
//! independent and pluggable; a missing backing facility reports zero
//! rather than erroring. Windows are recomputed from the raw sample buffer
//! on every call - no incremental counters to accumulate drift.
//!
//! Adapters are polled concurrently, one thread each, and merged with a
//! bounded per-adapter timeout: a hung log backend degrades to zero for
//! this pass instead of stalling the tick.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use regex::Regex;
use st_protocol::Severity;
use tracing::{debug, warn};

use crate::constants::xrun as xc;
use crate::error::Result;

/// Per-window totals keyed by window duration
pub type WindowCounts = BTreeMap<Duration, u32>;

/// One observation from a log source. Immutable once created.
#[derive(Debug, Clone)]
pub struct XrunSample {
    pub source: String,
    pub timestamp: SystemTime,
    pub count: u32,
}

/// A pluggable event-log source.
///
/// `query` returns the samples observed since `since`; it takes `&mut self`
/// because file adapters track their read offset between calls.
pub trait XrunLogSource: Send {
    fn name(&self) -> &str;
    /// Severe sources (hardware-error logs) force Severe classification
    /// whenever they report anything recent.
    fn severe(&self) -> bool;
    fn query(&mut self, since: SystemTime) -> Result<Vec<XrunSample>>;
}

// ============================================================================
// File-tail adapter (engine log, tunnel/bridge log)
// ============================================================================

/// Tails a plain log file, counting new lines that match a pattern.
/// The log lines carry no machine-readable timestamps, so new matches are
/// stamped at read time - at monitor cadence that is accurate to a couple
/// of seconds.
pub struct FileLogSource {
    name: String,
    severe: bool,
    path: PathBuf,
    pattern: Regex,
    offset: u64,
}

impl FileLogSource {
    pub fn new(name: &str, path: PathBuf, pattern: Regex, severe: bool) -> Self {
        Self {
            name: name.to_string(),
            severe,
            path,
            pattern,
            // Start at the end: history before the monitor started is not
            // attributable to a window
            offset: u64::MAX,
        }
    }
}

impl XrunLogSource for FileLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn severe(&self) -> bool {
        self.severe
    }

    fn query(&mut self, _since: SystemTime) -> Result<Vec<XrunSample>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            // Missing log file: facility not present, report nothing
            Err(_) => return Ok(Vec::new()),
        };
        let len = file.metadata()?.len();

        if self.offset == u64::MAX {
            // First query: skip history
            self.offset = len;
            return Ok(Vec::new());
        }
        if len < self.offset {
            // Log rotated underneath us
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut new_data = String::new();
        file.read_to_string(&mut new_data)?;
        self.offset = len;

        let count = new_data
            .lines()
            .filter(|line| self.pattern.is_match(line))
            .count() as u32;
        if count == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![XrunSample {
            source: self.name.clone(),
            timestamp: SystemTime::now(),
            count,
        }])
    }
}

// ============================================================================
// Journal adapters (system journal, kernel log)
// ============================================================================

/// Queries the systemd journal via journalctl. Lines are timestamped
/// (short-unix output), so samples carry real event times.
pub struct JournalLogSource {
    name: String,
    severe: bool,
    kernel_only: bool,
    pattern: Regex,
}

impl JournalLogSource {
    pub fn new(name: &str, kernel_only: bool, pattern: Regex, severe: bool) -> Self {
        Self {
            name: name.to_string(),
            severe,
            kernel_only,
            pattern,
        }
    }
}

impl XrunLogSource for JournalLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn severe(&self) -> bool {
        self.severe
    }

    fn query(&mut self, since: SystemTime) -> Result<Vec<XrunSample>> {
        let since_secs = since
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let since_arg = format!("@{}", since_secs);
        let mut args = vec![
            "--since",
            since_arg.as_str(),
            "--output=short-unix",
            "--no-pager",
            "--quiet",
        ];
        if self.kernel_only {
            args.push("-k");
        }

        let output = match Command::new("journalctl").args(&args).output() {
            Ok(o) => o,
            // No journal on this system: facility not present
            Err(_) => return Ok(Vec::new()),
        };
        if !output.status.success() {
            debug!("{}: journalctl exited with {}", self.name, output.status);
            return Ok(Vec::new());
        }

        let mut samples = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !self.pattern.is_match(line) {
                continue;
            }
            // short-unix lines lead with fractional epoch seconds
            let timestamp = line
                .split_whitespace()
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .map(|secs| UNIX_EPOCH + Duration::from_secs_f64(secs))
                .unwrap_or_else(SystemTime::now);
            samples.push(XrunSample {
                source: self.name.clone(),
                timestamp,
                count: 1,
            });
        }
        Ok(samples)
    }
}

// ============================================================================
// Monitor
// ============================================================================

type SharedSource = Arc<Mutex<Box<dyn XrunLogSource>>>;

/// Aggregates samples from all sources into per-window totals
pub struct XrunMonitor {
    sources: Vec<SharedSource>,
    severe_names: HashSet<String>,
    samples: Vec<XrunSample>,
    windows: Vec<Duration>,
    mild_threshold: u32,
    adapter_timeout: Duration,
}

impl XrunMonitor {
    pub fn new(sources: Vec<Box<dyn XrunLogSource>>, mild_threshold: u32) -> Self {
        let severe_names = sources
            .iter()
            .filter(|s| s.severe())
            .map(|s| s.name().to_string())
            .collect();
        Self {
            sources: sources
                .into_iter()
                .map(|s| Arc::new(Mutex::new(s)))
                .collect(),
            severe_names,
            samples: Vec::new(),
            windows: xc::WINDOWS.to_vec(),
            mild_threshold,
            adapter_timeout: xc::ADAPTER_TIMEOUT,
        }
    }

    /// The standard four-adapter set: engine log, cross-engine tunnel log,
    /// system journal, kernel log (severe). `home` is the invoking user's
    /// home directory, where the engine's session logs live.
    pub fn with_default_sources(home: Option<PathBuf>, mild_threshold: u32) -> Self {
        let mut sources: Vec<Box<dyn XrunLogSource>> = Vec::new();
        if let Some(home) = home {
            sources.push(Box::new(FileLogSource::new(
                "engine-log",
                home.join(".log/jack/jackdbus.log"),
                Regex::new(r"(?i)xrun").expect("static pattern"),
                false,
            )));
            sources.push(Box::new(FileLogSource::new(
                "tunnel-log",
                home.join(".log/jack/tunnel.log"),
                Regex::new(r"(?i)(xrun|overrun|underrun)").expect("static pattern"),
                false,
            )));
        }
        sources.push(Box::new(JournalLogSource::new(
            "journal",
            false,
            Regex::new(r"(?i)(xrun|underrun|overrun)").expect("static pattern"),
            false,
        )));
        sources.push(Box::new(JournalLogSource::new(
            "kernel-log",
            true,
            Regex::new(r"(?i)(xhci|usb).*(error|babble|halt|reset)").expect("static pattern"),
            true,
        )));
        Self::new(sources, mild_threshold)
    }

    #[cfg(test)]
    fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    fn largest_window(&self) -> Duration {
        self.windows.iter().copied().max().unwrap_or(xc::SEVERITY_WINDOW)
    }

    /// Poll all adapters, fold new samples into the rolling buffer, prune
    /// anything older than the largest window, and recompute per-window
    /// totals from the raw samples.
    pub fn sample(&mut self) -> WindowCounts {
        let now = SystemTime::now();
        let since = now - self.largest_window();

        let (tx, rx) = mpsc::channel::<(String, Result<Vec<XrunSample>>)>();
        let mut expected = 0usize;
        for source in &self.sources {
            let source = Arc::clone(source);
            let tx = tx.clone();
            expected += 1;
            thread::spawn(move || {
                // A previous pass may still be stuck inside this adapter;
                // reporting nothing beats blocking the tick behind it
                let Some(mut guard) = source.try_lock() else {
                    let _ = tx.send(("busy".to_string(), Ok(Vec::new())));
                    return;
                };
                let name = guard.name().to_string();
                let result = guard.query(since);
                let _ = tx.send((name, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.adapter_timeout;
        let mut received = 0usize;
        while received < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((_name, Ok(samples))) => {
                    received += 1;
                    for mut s in samples {
                        // A source reporting future times would never age out
                        if s.timestamp > now {
                            s.timestamp = now;
                        }
                        self.samples.push(s);
                    }
                }
                Ok((name, Err(e))) => {
                    received += 1;
                    debug!("Adapter {} failed: {}", name, e);
                }
                Err(_) => {
                    warn!(
                        "{} of {} adapters timed out; reporting zero for them",
                        expected - received,
                        expected
                    );
                    break;
                }
            }
        }

        let cutoff = now - self.largest_window();
        self.samples.retain(|s| s.timestamp >= cutoff);

        self.compute_windows(now)
    }

    fn compute_windows(&self, now: SystemTime) -> WindowCounts {
        let mut counts = WindowCounts::new();
        for &window in &self.windows {
            let start = now - window;
            let total = self
                .samples
                .iter()
                .filter(|s| s.timestamp >= start)
                .map(|s| s.count)
                .sum();
            counts.insert(window, total);
        }
        counts
    }

    /// Count from severe (hardware-error) sources within the severity window
    pub fn severe_recent(&self) -> u32 {
        let start = SystemTime::now() - xc::SEVERITY_WINDOW;
        self.samples
            .iter()
            .filter(|s| s.timestamp >= start && self.severe_names.contains(&s.source))
            .map(|s| s.count)
            .sum()
    }

    /// Classify the current window totals
    pub fn classify(&self, counts: &WindowCounts) -> Severity {
        let one_min = counts.get(&xc::SEVERITY_WINDOW).copied().unwrap_or(0);
        classify_severity(one_min, self.severe_recent(), self.mild_threshold)
    }

    /// Window totals keyed by display label, for the published snapshot
    pub fn labeled_counts(counts: &WindowCounts) -> BTreeMap<String, u32> {
        let mut labeled = BTreeMap::new();
        for (i, &window) in xc::WINDOWS.iter().enumerate() {
            if let Some(&count) = counts.get(&window) {
                labeled.insert(xc::WINDOW_LABELS[i].to_string(), count);
            }
        }
        labeled
    }

    #[cfg(test)]
    fn ingest(&mut self, samples: Vec<XrunSample>) {
        self.samples.extend(samples);
    }
}

/// Severity rule, exactly as configured:
/// - Perfect: the 1-minute total is 0 (and no severe-source activity)
/// - Mild: 1-minute total below the threshold, no severe-source activity
/// - Severe: everything else
pub fn classify_severity(one_min_total: u32, severe_recent: u32, mild_threshold: u32) -> Severity {
    if severe_recent > 0 {
        return Severity::Severe;
    }
    if one_min_total == 0 {
        Severity::Perfect
    } else if one_min_total < mild_threshold {
        Severity::Mild
    } else {
        Severity::Severe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct VecSource {
        name: String,
        severe: bool,
        samples: Vec<XrunSample>,
    }

    impl XrunLogSource for VecSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn severe(&self) -> bool {
            self.severe
        }
        fn query(&mut self, _since: SystemTime) -> Result<Vec<XrunSample>> {
            Ok(std::mem::take(&mut self.samples))
        }
    }

    struct SlowSource;

    impl XrunLogSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }
        fn severe(&self) -> bool {
            false
        }
        fn query(&mut self, _since: SystemTime) -> Result<Vec<XrunSample>> {
            thread::sleep(Duration::from_secs(5));
            Ok(vec![XrunSample {
                source: "slow".to_string(),
                timestamp: SystemTime::now(),
                count: 99,
            }])
        }
    }

    fn sample_at(source: &str, age: Duration, count: u32) -> XrunSample {
        XrunSample {
            source: source.to_string(),
            timestamp: SystemTime::now() - age,
            count,
        }
    }

    #[test]
    fn test_window_totals_match_manual_sums() {
        let mut monitor = XrunMonitor::new(Vec::new(), 5);
        monitor.ingest(vec![
            sample_at("engine-log", Duration::from_secs(3), 2),
            sample_at("engine-log", Duration::from_secs(20), 1),
            sample_at("engine-log", Duration::from_secs(50), 4),
            sample_at("engine-log", Duration::from_secs(200), 3),
        ]);
        let counts = monitor.compute_windows(SystemTime::now());
        assert_eq!(counts[&Duration::from_secs(5)], 2);
        assert_eq!(counts[&Duration::from_secs(30)], 3);
        assert_eq!(counts[&Duration::from_secs(60)], 7);
        assert_eq!(counts[&Duration::from_secs(300)], 10);
    }

    #[test]
    fn test_samples_older_than_largest_window_are_pruned() {
        let mut monitor = XrunMonitor::new(Vec::new(), 5);
        monitor.ingest(vec![
            sample_at("engine-log", Duration::from_secs(400), 50),
            sample_at("engine-log", Duration::from_secs(10), 1),
        ]);
        let counts = monitor.sample();
        // The 400s-old sample must not appear in any total
        for (_, total) in &counts {
            assert!(*total <= 1);
        }
        assert_eq!(counts[&Duration::from_secs(300)], 1);
    }

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(classify_severity(0, 0, 5), Severity::Perfect);
        assert_eq!(classify_severity(4, 0, 5), Severity::Mild);
        assert_eq!(classify_severity(5, 0, 5), Severity::Severe);
        assert_eq!(classify_severity(1, 0, 5), Severity::Mild);
        // Any severe-source activity forces Severe
        assert_eq!(classify_severity(1, 1, 5), Severity::Severe);
        assert_eq!(classify_severity(0, 2, 5), Severity::Severe);
    }

    #[test]
    fn test_classify_uses_severe_sources() {
        let mut monitor = XrunMonitor::new(
            vec![Box::new(VecSource {
                name: "kernel-log".to_string(),
                severe: true,
                samples: vec![sample_at("kernel-log", Duration::from_secs(2), 1)],
            })],
            5,
        );
        let counts = monitor.sample();
        assert_eq!(monitor.severe_recent(), 1);
        assert_eq!(monitor.classify(&counts), Severity::Severe);
    }

    #[test]
    fn test_merges_multiple_sources() {
        let mut monitor = XrunMonitor::new(
            vec![
                Box::new(VecSource {
                    name: "engine-log".to_string(),
                    severe: false,
                    samples: vec![sample_at("engine-log", Duration::from_secs(1), 2)],
                }),
                Box::new(VecSource {
                    name: "journal".to_string(),
                    severe: false,
                    samples: vec![sample_at("journal", Duration::from_secs(2), 3)],
                }),
            ],
            5,
        );
        let counts = monitor.sample();
        assert_eq!(counts[&Duration::from_secs(60)], 5);
        assert_eq!(monitor.classify(&counts), Severity::Severe);
    }

    #[test]
    fn test_slow_adapter_degrades_to_zero() {
        let mut monitor = XrunMonitor::new(
            vec![
                Box::new(SlowSource),
                Box::new(VecSource {
                    name: "engine-log".to_string(),
                    severe: false,
                    samples: vec![sample_at("engine-log", Duration::from_secs(1), 1)],
                }),
            ],
            5,
        )
        .with_adapter_timeout(Duration::from_secs(1));

        let started = Instant::now();
        let counts = monitor.sample();
        assert!(started.elapsed() < Duration::from_secs(3));
        // The fast source landed; the slow one contributed nothing
        assert_eq!(counts[&Duration::from_secs(60)], 1);
    }

    #[test]
    fn test_file_source_counts_new_matches_only() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("jackdbus.log");
        std::fs::write(&log, "old line\nXRun detected\n").unwrap();

        let mut source = FileLogSource::new(
            "engine-log",
            log.clone(),
            Regex::new(r"(?i)xrun").unwrap(),
            false,
        );
        let since = SystemTime::now() - Duration::from_secs(300);
        // First query only records the offset - history is not counted
        assert!(source.query(since).unwrap().is_empty());

        let mut content = std::fs::read_to_string(&log).unwrap();
        content.push_str("something benign\nERROR: XRun of 2.5ms\nanother xrun here\n");
        std::fs::write(&log, content).unwrap();

        let samples = source.query(since).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].count, 2);

        // Nothing new: no samples
        assert!(source.query(since).unwrap().is_empty());
    }

    #[test]
    fn test_file_source_missing_file_reports_zero() {
        let tmp = TempDir::new().unwrap();
        let mut source = FileLogSource::new(
            "engine-log",
            tmp.path().join("never-created.log"),
            Regex::new(r"xrun").unwrap(),
            false,
        );
        let samples = source.query(SystemTime::now()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_file_source_handles_rotation() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("log");
        std::fs::write(&log, "a long preamble without matches\n").unwrap();
        let mut source =
            FileLogSource::new("t", log.clone(), Regex::new(r"xrun").unwrap(), false);
        let since = SystemTime::now();
        assert!(source.query(since).unwrap().is_empty());

        // Rotation: file replaced with shorter content containing a match
        std::fs::write(&log, "xrun\n").unwrap();
        let samples = source.query(since).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].count, 1);
    }

    #[test]
    fn test_labeled_counts() {
        let mut monitor = XrunMonitor::new(Vec::new(), 5);
        monitor.ingest(vec![sample_at("engine-log", Duration::from_secs(1), 2)]);
        let counts = monitor.compute_windows(SystemTime::now());
        let labeled = XrunMonitor::labeled_counts(&counts);
        assert_eq!(labeled["5s"], 2);
        assert_eq!(labeled["1m"], 2);
        assert_eq!(labeled.len(), 5);
    }
}
