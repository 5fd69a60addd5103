//! Resource ledger
//!
//! Records the pre-optimization value of every tunable the optimizer is
//! about to change, so deactivation restores the exact prior values rather
//! than hard-coded defaults. Entries live in memory in insertion order and
//! are mirrored to disk after every mutation; a ledger file that survives a
//! crash is what lets startup run a forced revert instead of stranding the
//! system half-applied.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::limits;

/// What kind of tunable a ledger entry covers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TunableKind {
    Governor,
    MinFreq,
    IrqAffinity,
    IrqBalance,
    UsbPower,
    UsbAutosuspend,
    SchedParam,
}

/// One recorded prior value. Exactly one live entry exists per applied
/// tunable until it is reverted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Tunable path, or a pseudo-key like "service:irqbalance"
    pub key: String,
    pub kind: TunableKind,
    pub prior_value: String,
    pub applied_value: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: Vec<LedgerEntry>,
}

/// In-memory prior-value store with optional disk mirror
#[derive(Debug)]
pub struct ResourceLedger {
    entries: HashMap<String, LedgerEntry>,
    /// Insertion order; revert walks this in reverse
    order: Vec<String>,
    mirror: Option<PathBuf>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ResourceLedger {
    /// A ledger that exists only in memory (tests, dry runs)
    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            mirror: None,
        }
    }

    /// A ledger mirrored to `path` after every mutation
    pub fn with_mirror(path: &Path) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            mirror: Some(path.to_path_buf()),
        }
    }

    /// Load a surviving ledger mirror, preserving its recorded order.
    /// Returns None when no file exists or it cannot be parsed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        let file: LedgerFile = match serde_json::from_str(&data) {
            Ok(f) => f,
            Err(e) => {
                warn!("Ledger file {:?} unreadable: {}", path, e);
                return None;
            }
        };
        let mut ledger = Self::with_mirror(path);
        for entry in file.entries {
            ledger.order.push(entry.key.clone());
            ledger.entries.insert(entry.key.clone(), entry);
        }
        Some(ledger)
    }

    /// Record a prior value. A key that already has a live entry keeps its
    /// original prior value - re-applying must not overwrite what we will
    /// eventually restore.
    pub fn record(&mut self, key: &str, kind: TunableKind, prior: &str, applied: &str) {
        if self.entries.contains_key(key) {
            debug!("Ledger already holds {}, keeping original prior value", key);
            return;
        }
        if self.entries.len() >= limits::MAX_LEDGER_ENTRIES {
            warn!("Ledger full, refusing to record {}", key);
            return;
        }
        self.order.push(key.to_string());
        self.entries.insert(
            key.to_string(),
            LedgerEntry {
                key: key.to_string(),
                kind,
                prior_value: prior.to_string(),
                applied_value: applied.to_string(),
                timestamp_ms: now_millis(),
            },
        );
        self.persist();
    }

    /// Look up the recorded prior value for a tunable
    pub fn lookup(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    /// Delete an entry after a successful revert
    pub fn clear(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            self.persist();
        }
    }

    /// Entries in reverse insertion order, for the revert walk
    pub fn entries_reverse(&self) -> Vec<LedgerEntry> {
        self.order
            .iter()
            .rev()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the disk mirror once everything is reverted
    pub fn remove_mirror(&self) {
        if let Some(ref path) = self.mirror {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Failed to remove ledger mirror {:?}: {}", path, e);
                }
            }
        }
    }

    /// Best-effort mirror write; failure is logged, never propagated, since
    /// the in-memory ledger stays authoritative for this process.
    fn persist(&self) {
        let Some(ref path) = self.mirror else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if self.entries.is_empty() {
            self.remove_mirror();
            return;
        }
        let file = LedgerFile {
            entries: self
                .order
                .iter()
                .filter_map(|k| self.entries.get(k).cloned())
                .collect(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("Failed to mirror ledger to {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("Failed to serialize ledger: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_lookup_clear() {
        let mut ledger = ResourceLedger::in_memory();
        ledger.record("/sys/x/governor", TunableKind::Governor, "schedutil", "performance");
        assert_eq!(ledger.len(), 1);
        let entry = ledger.lookup("/sys/x/governor").unwrap();
        assert_eq!(entry.prior_value, "schedutil");
        assert_eq!(entry.applied_value, "performance");
        ledger.clear("/sys/x/governor");
        assert!(ledger.is_empty());
        assert!(ledger.lookup("/sys/x/governor").is_none());
    }

    #[test]
    fn test_rerecord_keeps_original_prior() {
        let mut ledger = ResourceLedger::in_memory();
        ledger.record("k", TunableKind::Governor, "schedutil", "performance");
        // Second apply sees "performance" as current; the original prior must survive
        ledger.record("k", TunableKind::Governor, "performance", "performance");
        assert_eq!(ledger.lookup("k").unwrap().prior_value, "schedutil");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reverse_insertion_order() {
        let mut ledger = ResourceLedger::in_memory();
        ledger.record("a", TunableKind::Governor, "1", "x");
        ledger.record("b", TunableKind::MinFreq, "2", "y");
        ledger.record("c", TunableKind::IrqAffinity, "3", "z");
        let keys: Vec<String> = ledger.entries_reverse().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_mirror_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        {
            let mut ledger = ResourceLedger::with_mirror(&path);
            ledger.record("a", TunableKind::Governor, "schedutil", "performance");
            ledger.record("b", TunableKind::SchedParam, "950000", "-1");
            assert!(path.exists());
        }
        let loaded = ResourceLedger::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup("a").unwrap().prior_value, "schedutil");
        let keys: Vec<String> = loaded.entries_reverse().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_mirror_removed_when_emptied() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        let mut ledger = ResourceLedger::with_mirror(&path);
        ledger.record("a", TunableKind::Governor, "p", "q");
        assert!(path.exists());
        ledger.clear("a");
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        assert!(ResourceLedger::load(&tmp.path().join("nope.json")).is_none());
    }
}
