//! Shared types between the Studiotune engine and external consumers
//!
//! The daemon publishes a [`StatusSnapshot`] to a well-known location after
//! each monitoring pass; CLI and tray wrappers deserialize it from there
//! without linking the core. This crate also owns the strict allowlist
//! validation for every sysfs/procfs path the engine is permitted to write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maximum serialized snapshot size (64KB)
pub const MAX_SNAPSHOT_SIZE: usize = 64 * 1024;

/// Maximum path length for security validation
const MAX_PATH_LENGTH: usize = 256;

/// Directories the engine is allowed to write tunables under
const ALLOWED_PATH_PREFIXES: &[&str] = &[
    "/sys/devices/system/cpu/",
    "/proc/irq/",
    "/sys/bus/usb/devices/",
    "/sys/module/usbcore/parameters/",
    "/proc/sys/kernel/",
    "/proc/sys/vm/",
];

const FORBIDDEN_PATH_COMPONENTS: &[&str] = &[
    "..",      // Path traversal
    "//",      // Double slash (path normalization bypass)
    "\0",      // Null byte injection
    "\n",      // Newline injection
    "\r",      // Carriage return injection
    "$(",      // Command substitution
    "`",       // Command substitution (backtick)
    ";",       // Command chaining
    "|",       // Pipe
    "&",       // Background execution
    ">",       // Output redirection
    "<",       // Input redirection
    "\\",      // Backslash (escape sequences)
    "'",       // Single quote (shell injection)
    "\"",      // Double quote (shell injection)
];

/// Validate that a tunable path is inside the write allowlist and free of
/// injection/traversal components.
///
/// Test fixtures run against temporary directory trees, so paths under the
/// system temp dir are also accepted.
pub fn validate_tunable_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Path is empty".to_string());
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(format!("Path exceeds maximum length of {}", MAX_PATH_LENGTH));
    }
    if !path.starts_with('/') {
        return Err("Path must be absolute".to_string());
    }
    for component in FORBIDDEN_PATH_COMPONENTS {
        if path.contains(component) {
            return Err(format!("Path contains forbidden component: {:?}", component));
        }
    }
    let allowed = ALLOWED_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
        || path.starts_with("/tmp/")
        || path.starts_with(std::env::temp_dir().to_string_lossy().as_ref());
    if !allowed {
        return Err(format!("Path not under an allowed prefix: {}", path));
    }
    Ok(())
}

// ============================================================================
// State and severity
// ============================================================================

/// Engine optimization state
///
/// `Optimizing` and `Deoptimizing` are transient: they are persisted before
/// the apply/revert sub-steps run so a crash mid-transition is recognizable
/// at the next startup, but a live status read only ever observes `Standard`
/// or `Optimized`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptState {
    Standard,
    Optimizing,
    Optimized,
    Deoptimizing,
}

impl Default for OptState {
    fn default() -> Self {
        OptState::Standard
    }
}

impl std::fmt::Display for OptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptState::Standard => write!(f, "standard"),
            OptState::Optimizing => write!(f, "optimizing"),
            OptState::Optimized => write!(f, "optimized"),
            OptState::Deoptimizing => write!(f, "deoptimizing"),
        }
    }
}

/// Overall xrun severity over the recent monitoring window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Perfect,
    Mild,
    Severe,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Perfect => write!(f, "perfect"),
            Severity::Mild => write!(f, "mild"),
            Severity::Severe => write!(f, "severe"),
        }
    }
}

// ============================================================================
// Status snapshot
// ============================================================================

/// Published status record, written after each Optimized-phase sample.
///
/// Window counts are keyed by window label (`"5s"`, `"10s"`, `"30s"`,
/// `"1m"`, `"5m"`) so the file stays readable without this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device_present: bool,
    pub state: OptState,
    pub engine_active: bool,
    pub buffer_frames: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub periods: Option<u32>,
    #[serde(default)]
    pub xrun_window_counts: BTreeMap<String, u32>,
    pub severity: Severity,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Milliseconds since the Unix epoch at publication time
    pub updated_at_ms: u64,
}

impl StatusSnapshot {
    /// An empty snapshot for when nothing has been sampled yet
    pub fn empty(device_present: bool, state: OptState) -> Self {
        Self {
            device_present,
            state,
            engine_active: false,
            buffer_frames: None,
            sample_rate_hz: None,
            periods: None,
            xrun_window_counts: BTreeMap::new(),
            severity: Severity::Perfect,
            recommendations: Vec::new(),
            updated_at_ms: 0,
        }
    }
}
