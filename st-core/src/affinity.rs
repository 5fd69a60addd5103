//! Process affinity management
//!
//! Holds the configured {name-pattern -> CPU pool, RT priority} table and
//! re-pins matching live processes on every optimization cycle. The manager
//! keeps no state between scans: each cycle re-reads the process table, so
//! processes that started or exited between cycles need no bookkeeping.
//!
//! Audio-server-class matches land on the fast-path pool at the highest RT
//! priority in the table; application-class matches land on the background
//! pool at a strictly lower RT priority. The audio server must always
//! preempt applications.

use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::settings::{AppSettings, CpuPools, ProcessRule, RuleClass};
use crate::system::online_cpus;

/// A match between a live process and a configured rule. Recomputed every
/// scan; never persisted.
#[derive(Debug, Clone)]
pub struct AffinityAssignment {
    pub pid: i32,
    pub name: String,
    pub rule: ProcessRule,
    pub cpus: Vec<usize>,
}

/// Scans the process table and applies/reverts affinity and RT scheduling
pub struct AffinityManager {
    rules: Vec<ProcessRule>,
    pools: CpuPools,
    proc_root: PathBuf,
    /// Full CPU set used by revert
    all_cpus: Vec<usize>,
}

impl AffinityManager {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            rules: settings.merged_rules(),
            pools: settings.pools.clone(),
            proc_root: PathBuf::from("/proc"),
            all_cpus: online_cpus(),
        }
    }

    /// Scan against a fixture process tree
    pub fn with_proc_root(settings: &AppSettings, proc_root: &Path, all_cpus: Vec<usize>) -> Self {
        Self {
            rules: settings.merged_rules(),
            pools: settings.pools.clone(),
            proc_root: proc_root.to_path_buf(),
            all_cpus,
        }
    }

    fn pool_for(&self, class: RuleClass) -> &[usize] {
        match class {
            RuleClass::AudioServer => &self.pools.fast,
            RuleClass::Application => &self.pools.background,
        }
    }

    /// Walk the live process table and collect every rule match.
    /// Executable names match case-insensitively and exactly.
    pub fn scan(&self) -> Vec<AffinityAssignment> {
        let mut assignments = Vec::new();
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(e) => {
                warn!("Cannot read process table: {}", e);
                return assignments;
            }
        };

        for ent in entries.flatten() {
            let name = ent.file_name();
            let name = name.to_string_lossy();
            let Ok(pid) = name.parse::<i32>() else {
                continue;
            };
            let comm = match fs::read_to_string(ent.path().join("comm")) {
                Ok(c) => c.trim().to_string(),
                // Process exited mid-scan; the OS reclaims it
                Err(_) => continue,
            };
            if let Some(rule) = self
                .rules
                .iter()
                .find(|r| r.pattern.eq_ignore_ascii_case(&comm))
            {
                assignments.push(AffinityAssignment {
                    pid,
                    name: comm,
                    rule: rule.clone(),
                    cpus: self.pool_for(rule.class).to_vec(),
                });
            }
        }
        assignments
    }

    /// Pin every matching process to its pool with its RT priority.
    /// Individual privilege failures are logged and skipped; the operation
    /// never fails the caller and is safe to repeat.
    pub fn apply_all(&self) -> Vec<AffinityAssignment> {
        let assignments = self.scan();
        let mut pinned = 0usize;
        let mut skipped = 0usize;

        for a in &assignments {
            let mut ok = true;
            if let Err(e) = set_affinity(a.pid, &a.cpus) {
                debug!("SKIP: affinity {} (pid {}): {}", a.name, a.pid, e);
                ok = false;
            }
            if let Err(e) = set_rt_priority(a.pid, a.rule.rt_priority) {
                debug!("SKIP: rt priority {} (pid {}): {}", a.name, a.pid, e);
                ok = false;
            }
            if ok {
                debug!(
                    "PIN: {} (pid {}) -> cpus {:?}, fifo {}",
                    a.name, a.pid, a.cpus, a.rule.rt_priority
                );
                pinned += 1;
            } else {
                skipped += 1;
            }
        }
        if !assignments.is_empty() {
            info!(pinned, skipped, "Affinity pass complete");
        }
        assignments
    }

    /// Reset every matching process to the full CPU set and standard
    /// (non-real-time) scheduling. Idempotent.
    pub fn revert_all(&self) {
        let assignments = self.scan();
        let mut reset = 0usize;

        for a in &assignments {
            let mut ok = true;
            if let Err(e) = set_affinity(a.pid, &self.all_cpus) {
                debug!("SKIP: affinity reset {} (pid {}): {}", a.name, a.pid, e);
                ok = false;
            }
            if let Err(e) = set_standard_scheduling(a.pid) {
                debug!("SKIP: sched reset {} (pid {}): {}", a.name, a.pid, e);
                ok = false;
            }
            if ok {
                reset += 1;
            }
        }
        if !assignments.is_empty() {
            info!(reset, matched = assignments.len(), "Affinity revert complete");
        }
    }
}

/// Pin a process to a CPU set via sched_setaffinity
fn set_affinity(pid: i32, cpus: &[usize]) -> io::Result<()> {
    // SAFETY: cpu_set_t is a plain bitmask struct; zeroed is a valid empty set.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    // SAFETY: CPU_ZERO/CPU_SET operate on the locally-owned `set`; cpu indices
    // are bounds-checked against CPU_SETSIZE before being set.
    unsafe {
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus {
            if cpu < libc::CPU_SETSIZE as usize {
                libc::CPU_SET(cpu, &mut set);
            }
        }
    }
    // SAFETY: set is properly initialized and outlives the call; the kernel
    // copies the mask before returning.
    let rc = unsafe { libc::sched_setaffinity(pid, mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Give a process SCHED_FIFO at the given priority
fn set_rt_priority(pid: i32, priority: u8) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority as libc::c_int,
    };
    // SAFETY: param is properly initialized; sched_setscheduler only reads it.
    let rc = unsafe { libc::sched_setscheduler(pid, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Return a process to SCHED_OTHER (priority must be 0 there)
fn set_standard_scheduling(pid: i32) -> io::Result<()> {
    let param = libc::sched_param { sched_priority: 0 };
    // SAFETY: param is properly initialized; sched_setscheduler only reads it.
    let rc = unsafe { libc::sched_setscheduler(pid, libc::SCHED_OTHER, &param) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc(entries: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (pid, comm) in entries {
            let dir = tmp.path().join(pid);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        }
        // Non-process entries that must be ignored
        std::fs::create_dir_all(tmp.path().join("sys")).unwrap();
        std::fs::create_dir_all(tmp.path().join("irq")).unwrap();
        tmp
    }

    fn settings() -> AppSettings {
        AppSettings {
            pools: CpuPools {
                fast: vec![2, 3],
                background: vec![0, 1],
                irq: vec![1],
            },
            ..AppSettings::default()
        }
    }

    #[test]
    fn test_scan_matches_configured_names() {
        let proc_root = fake_proc(&[
            ("100", "jackd"),
            ("200", "ardour"),
            ("300", "bash"),
            ("400", "firefox"),
        ]);
        let mgr = AffinityManager::with_proc_root(&settings(), proc_root.path(), vec![0, 1, 2, 3]);
        let mut found: Vec<(i32, String)> = mgr
            .scan()
            .into_iter()
            .map(|a| (a.pid, a.name))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![(100, "jackd".to_string()), (200, "ardour".to_string())]
        );
    }

    #[test]
    fn test_scan_is_case_insensitive_exact() {
        let proc_root = fake_proc(&[
            ("100", "JACKD"),
            ("200", "Ardour"),
            // Substring is not an exact match
            ("300", "jackd-helper"),
        ]);
        let mgr = AffinityManager::with_proc_root(&settings(), proc_root.path(), vec![0, 1]);
        let found: Vec<i32> = mgr.scan().into_iter().map(|a| a.pid).collect();
        assert!(found.contains(&100));
        assert!(found.contains(&200));
        assert!(!found.contains(&300));
    }

    #[test]
    fn test_pools_assigned_by_class() {
        let proc_root = fake_proc(&[("100", "jackd"), ("200", "ardour")]);
        let mgr = AffinityManager::with_proc_root(&settings(), proc_root.path(), vec![0, 1, 2, 3]);
        for a in mgr.scan() {
            match a.rule.class {
                RuleClass::AudioServer => assert_eq!(a.cpus, vec![2, 3]),
                RuleClass::Application => assert_eq!(a.cpus, vec![0, 1]),
            }
        }
    }

    #[test]
    fn test_server_priority_outranks_applications_in_scan() {
        let proc_root = fake_proc(&[("100", "jackd"), ("200", "ardour"), ("300", "carla")]);
        let mgr = AffinityManager::with_proc_root(&settings(), proc_root.path(), vec![0, 1]);
        let assignments = mgr.scan();
        let server_min = assignments
            .iter()
            .filter(|a| a.rule.class == RuleClass::AudioServer)
            .map(|a| a.rule.rt_priority)
            .min()
            .unwrap();
        let app_max = assignments
            .iter()
            .filter(|a| a.rule.class == RuleClass::Application)
            .map(|a| a.rule.rt_priority)
            .max()
            .unwrap();
        assert!(server_min > app_max);
    }

    #[test]
    fn test_missing_proc_root_yields_empty_scan() {
        let tmp = TempDir::new().unwrap();
        let mgr = AffinityManager::with_proc_root(
            &settings(),
            &tmp.path().join("nonexistent"),
            vec![0],
        );
        assert!(mgr.scan().is_empty());
    }

    #[test]
    fn test_extension_rules_participate_in_scan() {
        let mut cfg = settings();
        cfg.extra_rules
            .push(ProcessRule::new("mydaw", RuleClass::Application, 60));
        let proc_root = fake_proc(&[("500", "mydaw")]);
        let mgr = AffinityManager::with_proc_root(&cfg, proc_root.path(), vec![0, 1]);
        let found = mgr.scan();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule.rt_priority, 60);
    }
}
