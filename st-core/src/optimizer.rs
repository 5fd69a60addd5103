//! Resource optimizer
//!
//! Applies and reverts the coordinated tunable set: per-pool CPU governors
//! with the fast-path pool's minimum frequency pinned to its maximum, IRQ
//! affinity for the USB controller and audio driver interrupts, USB power
//! policy for the target interface, and the scheduler knobs RT audio needs.
//!
//! Every tunable write is independent: a kernel missing one knob must not
//! block the rest, so per-target failures are collected and logged, never
//! raised. The ledger records each prior value before the first write and
//! revert restores those values verbatim, walking in reverse-insertion order.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::constants::{baseline, irq, paths, pools};
use crate::error::StudiotuneError;
use crate::ledger::{ResourceLedger, TunableKind};
use crate::presence::PresenceDetector;
use crate::settings::{AppSettings, CpuPools};
use crate::system::{format_cpu_list, read_trimmed};

/// One planned tunable write. Built per apply pass, consumed immediately;
/// only the ledger entry outlives the pass.
#[derive(Debug, Clone)]
pub struct TunableTarget {
    pub path: PathBuf,
    pub desired: String,
    pub kind: TunableKind,
    /// Short human label for the tick outcome log
    pub label: String,
}

/// Filesystem roots for everything the optimizer touches, injectable so
/// tests run against a fixture tree.
#[derive(Debug, Clone)]
pub struct SysfsRoots {
    pub cpu_base: PathBuf,
    pub irq_base: PathBuf,
    pub interrupts: PathBuf,
    pub usb_autosuspend: PathBuf,
    pub sched_rt_runtime: PathBuf,
    pub swappiness: PathBuf,
}

impl Default for SysfsRoots {
    fn default() -> Self {
        Self {
            cpu_base: PathBuf::from(paths::CPU_BASE),
            irq_base: PathBuf::from(paths::IRQ_BASE),
            interrupts: PathBuf::from(paths::INTERRUPTS),
            usb_autosuspend: PathBuf::from(paths::USB_AUTOSUSPEND),
            sched_rt_runtime: PathBuf::from(paths::SCHED_RT_RUNTIME),
            swappiness: PathBuf::from(paths::SWAPPINESS),
        }
    }
}

/// Applies/reverts the coordinated tunable plan with ledger-backed rollback
pub struct ResourceOptimizer {
    cpu_pools: CpuPools,
    background_governor: String,
    swappiness: u32,
    presence: PresenceDetector,
    roots: SysfsRoots,
    ledger: ResourceLedger,
    /// Stop/restart the irqbalance service around optimization. Disabled in
    /// tests, where there is no service manager to talk to.
    manage_irqbalance: bool,
}

impl ResourceOptimizer {
    pub fn new(settings: &AppSettings, presence: PresenceDetector, ledger: ResourceLedger) -> Self {
        Self {
            cpu_pools: settings.pools.clone(),
            background_governor: settings.background_governor.clone(),
            swappiness: settings.swappiness,
            presence,
            roots: SysfsRoots::default(),
            ledger,
            manage_irqbalance: true,
        }
    }

    /// Construct against a fixture tree; service management disabled
    pub fn with_roots(
        settings: &AppSettings,
        presence: PresenceDetector,
        ledger: ResourceLedger,
        roots: SysfsRoots,
    ) -> Self {
        Self {
            cpu_pools: settings.pools.clone(),
            background_governor: settings.background_governor.clone(),
            swappiness: settings.swappiness,
            presence,
            roots,
            ledger,
            manage_irqbalance: false,
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// True when at least one tunable is currently ledgered as applied
    pub fn is_applied(&self) -> bool {
        !self.ledger.is_empty()
    }

    // ========================================================================
    // Plan construction
    // ========================================================================

    /// Build the apply plan from the live topology. Targets are ordered so
    /// that reverse-order revert undoes dependent writes last-first
    /// (min-freq pins are released before governors are restored).
    pub fn build_plan(&self) -> Vec<TunableTarget> {
        let mut plan: Vec<TunableTarget> = Vec::new();
        let mut planned_paths: Vec<PathBuf> = Vec::new();

        let mut push = |plan: &mut Vec<TunableTarget>,
                        planned: &mut Vec<PathBuf>,
                        target: TunableTarget| {
            // A CPU in two pools keeps its first (higher-priority) assignment
            if planned.contains(&target.path) {
                return;
            }
            planned.push(target.path.clone());
            plan.push(target);
        };

        // Pool governors: fast and irq pools run flat out, background stays
        // on the configured governor. Fast-pool cores additionally get their
        // floor pinned to the ceiling so the clock never dips mid-buffer.
        for &cpu in &self.cpu_pools.fast {
            let cpufreq = self.roots.cpu_base.join(format!("cpu{}/cpufreq", cpu));
            push(
                &mut plan,
                &mut planned_paths,
                TunableTarget {
                    path: cpufreq.join("scaling_governor"),
                    desired: pools::FAST_GOVERNOR.to_string(),
                    kind: TunableKind::Governor,
                    label: format!("cpu{} governor", cpu),
                },
            );
            if let Ok(max_freq) = read_trimmed(cpufreq.join("cpuinfo_max_freq")) {
                push(
                    &mut plan,
                    &mut planned_paths,
                    TunableTarget {
                        path: cpufreq.join("scaling_min_freq"),
                        desired: max_freq,
                        kind: TunableKind::MinFreq,
                        label: format!("cpu{} min freq pin", cpu),
                    },
                );
            } else {
                debug!("cpu{} has no cpuinfo_max_freq, skipping min-freq pin", cpu);
            }
        }
        for &cpu in &self.cpu_pools.irq {
            push(
                &mut plan,
                &mut planned_paths,
                TunableTarget {
                    path: self
                        .roots
                        .cpu_base
                        .join(format!("cpu{}/cpufreq/scaling_governor", cpu)),
                    desired: pools::IRQ_GOVERNOR.to_string(),
                    kind: TunableKind::Governor,
                    label: format!("cpu{} governor", cpu),
                },
            );
        }
        for &cpu in &self.cpu_pools.background {
            push(
                &mut plan,
                &mut planned_paths,
                TunableTarget {
                    path: self
                        .roots
                        .cpu_base
                        .join(format!("cpu{}/cpufreq/scaling_governor", cpu)),
                    desired: self.background_governor.clone(),
                    kind: TunableKind::Governor,
                    label: format!("cpu{} governor", cpu),
                },
            );
        }

        // IRQ affinity: pin USB controller and audio driver interrupts to
        // the interrupt-handling pool
        let irq_cpus = format_cpu_list(&self.cpu_pools.irq);
        for irq_num in self.find_device_irqs() {
            push(
                &mut plan,
                &mut planned_paths,
                TunableTarget {
                    path: self
                        .roots
                        .irq_base
                        .join(format!("{}/smp_affinity_list", irq_num)),
                    desired: irq_cpus.clone(),
                    kind: TunableKind::IrqAffinity,
                    label: format!("irq{} affinity", irq_num),
                },
            );
        }

        // USB power: keep the interface fully powered, disable global
        // autosuspend for the bus
        for dev_dir in self.presence.usb_device_dirs() {
            push(
                &mut plan,
                &mut planned_paths,
                TunableTarget {
                    path: dev_dir.join("power/control"),
                    desired: "on".to_string(),
                    kind: TunableKind::UsbPower,
                    label: "usb power policy".to_string(),
                },
            );
        }
        push(
            &mut plan,
            &mut planned_paths,
            TunableTarget {
                path: self.roots.usb_autosuspend.clone(),
                desired: "-1".to_string(),
                kind: TunableKind::UsbAutosuspend,
                label: "usb autosuspend".to_string(),
            },
        );

        // Scheduler knobs: unlimited RT runtime, low swappiness
        push(
            &mut plan,
            &mut planned_paths,
            TunableTarget {
                path: self.roots.sched_rt_runtime.clone(),
                desired: "-1".to_string(),
                kind: TunableKind::SchedParam,
                label: "rt runtime".to_string(),
            },
        );
        push(
            &mut plan,
            &mut planned_paths,
            TunableTarget {
                path: self.roots.swappiness.clone(),
                desired: self.swappiness.to_string(),
                kind: TunableKind::SchedParam,
                label: "swappiness".to_string(),
            },
        );

        plan
    }

    /// Parse /proc/interrupts for lines registered by the USB host
    /// controllers or the USB audio driver
    fn find_device_irqs(&self) -> Vec<u32> {
        let mut irqs = Vec::new();
        let table = match fs::read_to_string(&self.roots.interrupts) {
            Ok(t) => t,
            Err(_) => return irqs,
        };
        for line in table.lines() {
            if !irq::DRIVER_TOKENS.iter().any(|t| line.contains(t)) {
                continue;
            }
            let Some((num, _)) = line.trim_start().split_once(':') else {
                continue;
            };
            if let Ok(n) = num.trim().parse::<u32>() {
                irqs.push(n);
            }
        }
        irqs.sort_unstable();
        irqs.dedup();
        irqs
    }

    // ========================================================================
    // Apply / revert
    // ========================================================================

    /// Apply the full plan. Returns the per-target failures; an empty vec
    /// means every tunable took. Safe to call repeatedly: a tunable already
    /// ledgered keeps its original prior value and is simply rewritten.
    pub fn apply(&mut self) -> Vec<StudiotuneError> {
        let plan = self.build_plan();
        let mut errors = Vec::new();
        let mut applied = 0usize;

        for target in &plan {
            match self.apply_target(target) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!("SKIP: {} ({}): {}", target.label, target.path.display(), e);
                    errors.push(e);
                }
            }
        }

        if self.manage_irqbalance {
            if let Err(e) = self.suspend_irq_rebalancing() {
                warn!("SKIP: irq rebalance service: {}", e);
                errors.push(e);
            }
        }

        info!(
            applied,
            failed = errors.len(),
            "Optimization pass complete ({} targets planned)",
            plan.len()
        );
        errors
    }

    fn apply_target(&mut self, target: &TunableTarget) -> Result<(), StudiotuneError> {
        let path_str = target.path.to_string_lossy();
        st_protocol::validate_tunable_path(&path_str)
            .map_err(|reason| StudiotuneError::invalid_path(target.path.clone(), reason))?;

        let prior = read_trimmed(&target.path)
            .map_err(|e| StudiotuneError::tunable_read(target.path.clone(), e.to_string()))?;

        self.ledger
            .record(&path_str, target.kind, &prior, &target.desired);

        fs::write(&target.path, &target.desired)
            .map_err(|e| StudiotuneError::tunable_write(target.path.clone(), e.to_string()))?;

        debug!(
            "APPLY: {} {} -> {}",
            target.label, prior, target.desired
        );
        Ok(())
    }

    /// Restore every ledgered tunable to its recorded prior value, walking
    /// the ledger in reverse-insertion order. A tunable whose path vanished
    /// (device already unplugged) counts as reverted - the OS reclaimed it.
    pub fn revert_all(&mut self) -> Vec<StudiotuneError> {
        let mut errors = Vec::new();
        let mut reverted = 0usize;

        for entry in self.ledger.entries_reverse() {
            if entry.key == irq::REBALANCE_LEDGER_KEY {
                match self.resume_irq_rebalancing(&entry.prior_value) {
                    Ok(()) => {
                        self.ledger.clear(&entry.key);
                        reverted += 1;
                    }
                    Err(e) => {
                        warn!("Failed to restore irq rebalance service: {}", e);
                        errors.push(e);
                    }
                }
                continue;
            }

            match fs::write(&entry.key, &entry.prior_value) {
                Ok(()) => {
                    debug!("REVERT: {} -> {}", entry.key, entry.prior_value);
                    self.ledger.clear(&entry.key);
                    reverted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("REVERT: {} gone, treating as reverted", entry.key);
                    self.ledger.clear(&entry.key);
                    reverted += 1;
                }
                Err(e) => {
                    warn!("Failed to revert {}: {}", entry.key, e);
                    errors.push(StudiotuneError::tunable_write(
                        PathBuf::from(&entry.key),
                        e.to_string(),
                    ));
                }
            }
        }

        if self.ledger.is_empty() {
            self.ledger.remove_mirror();
        } else {
            warn!(
                remaining = self.ledger.len(),
                "Revert left ledger entries behind; a later pass will retry"
            );
        }
        info!(reverted, failed = errors.len(), "Revert pass complete");
        errors
    }

    /// Crash recovery: restore a sane state when the persisted state says
    /// Optimized but no ledger survived. The documented baseline is used
    /// ONLY here - whenever a ledger entry exists, its prior value wins.
    pub fn revert_to_baseline(&mut self) -> Vec<StudiotuneError> {
        if !self.ledger.is_empty() {
            return self.revert_all();
        }
        info!("No surviving ledger; reverting to documented baseline");
        let mut errors = Vec::new();
        for target in self.build_plan() {
            let fallback = match target.kind {
                TunableKind::Governor => baseline::GOVERNOR.to_string(),
                TunableKind::UsbPower => baseline::USB_POWER.to_string(),
                TunableKind::SchedParam => {
                    if target.path == self.roots.swappiness {
                        baseline::SWAPPINESS.to_string()
                    } else {
                        baseline::RT_RUNTIME_US.to_string()
                    }
                }
                // Min-freq pins, IRQ affinity and autosuspend have no
                // meaningful baseline beyond what the kernel boots with
                TunableKind::MinFreq | TunableKind::IrqAffinity => continue,
                TunableKind::UsbAutosuspend => "2".to_string(),
                TunableKind::IrqBalance => continue,
            };
            if let Err(e) = fs::write(&target.path, &fallback) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    errors.push(StudiotuneError::tunable_write(target.path, e.to_string()));
                }
            }
        }
        errors
    }

    // ========================================================================
    // irqbalance service handling
    // ========================================================================

    fn suspend_irq_rebalancing(&mut self) -> Result<(), StudiotuneError> {
        if self.ledger.lookup(irq::REBALANCE_LEDGER_KEY).is_some() {
            return Ok(());
        }
        if !service_is_active(irq::REBALANCE_SERVICE) {
            debug!("{} not active, nothing to suspend", irq::REBALANCE_SERVICE);
            return Ok(());
        }
        systemctl(&["stop", irq::REBALANCE_SERVICE])?;
        self.ledger.record(
            irq::REBALANCE_LEDGER_KEY,
            TunableKind::IrqBalance,
            "active",
            "stopped",
        );
        info!("Suspended {} while optimized", irq::REBALANCE_SERVICE);
        Ok(())
    }

    fn resume_irq_rebalancing(&self, prior: &str) -> Result<(), StudiotuneError> {
        if prior == "active" {
            systemctl(&["start", irq::REBALANCE_SERVICE])?;
            info!("Restored {}", irq::REBALANCE_SERVICE);
        }
        Ok(())
    }
}

fn service_is_active(service: &str) -> bool {
    Command::new("systemctl")
        .args(["is-active", "--quiet", service])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn systemctl(args: &[&str]) -> Result<(), StudiotuneError> {
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .map_err(|e| StudiotuneError::Generic(format!("systemctl {:?}: {}", args, e)))?;
    if !output.status.success() {
        return Err(StudiotuneError::Generic(format!(
            "systemctl {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DeviceIdentity;
    use tempfile::TempDir;

    /// Build a fixture tree mimicking the sysfs/procfs surface the
    /// optimizer touches, and an optimizer wired to it.
    struct Fixture {
        _tmp: TempDir,
        roots: SysfsRoots,
        settings: AppSettings,
        presence: PresenceDetector,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();

        let cpu_base = base.join("cpu");
        for n in 0..4usize {
            let cpufreq = cpu_base.join(format!("cpu{}/cpufreq", n));
            std::fs::create_dir_all(&cpufreq).unwrap();
            std::fs::write(cpufreq.join("scaling_governor"), "schedutil").unwrap();
            std::fs::write(cpufreq.join("cpuinfo_max_freq"), "3500000").unwrap();
            std::fs::write(cpufreq.join("scaling_min_freq"), "800000").unwrap();
        }

        let irq_base = base.join("irq");
        std::fs::create_dir_all(irq_base.join("128")).unwrap();
        std::fs::write(irq_base.join("128/smp_affinity_list"), "0-3").unwrap();
        let interrupts = base.join("interrupts");
        std::fs::write(
            &interrupts,
            " 128:   1000   0   0   0  IR-PCI-MSI 327680-edge  xhci_hcd\n  29:      0   0   0   0  IO-APIC  29-fasteoi  snd_usb_audio\n",
        )
        .unwrap();
        std::fs::create_dir_all(irq_base.join("29")).unwrap();
        std::fs::write(irq_base.join("29/smp_affinity_list"), "0-3").unwrap();

        let usb_root = base.join("usb");
        let dev = usb_root.join("3-1");
        std::fs::create_dir_all(dev.join("power")).unwrap();
        std::fs::write(dev.join("idVendor"), "1235").unwrap();
        std::fs::write(dev.join("idProduct"), "8210").unwrap();
        std::fs::write(dev.join("power/control"), "auto").unwrap();

        let autosuspend = base.join("autosuspend");
        std::fs::write(&autosuspend, "2").unwrap();
        let rt_runtime = base.join("sched_rt_runtime_us");
        std::fs::write(&rt_runtime, "950000").unwrap();
        let swappiness = base.join("swappiness");
        std::fs::write(&swappiness, "60").unwrap();

        let cards = base.join("cards");
        std::fs::write(&cards, " 1 [USB  ]: USB-Audio - Scarlett 18i20 USB\n").unwrap();

        let roots = SysfsRoots {
            cpu_base,
            irq_base,
            interrupts,
            usb_autosuspend: autosuspend,
            sched_rt_runtime: rt_runtime,
            swappiness,
        };

        let settings = AppSettings {
            pools: CpuPools {
                fast: vec![2, 3],
                background: vec![0],
                irq: vec![1],
            },
            swappiness: 10,
            ..AppSettings::default()
        };
        let presence =
            PresenceDetector::with_roots(DeviceIdentity::default(), &cards, &usb_root);

        Fixture {
            _tmp: tmp,
            roots,
            settings,
            presence,
        }
    }

    fn read(path: &Path) -> String {
        read_trimmed(path).unwrap()
    }

    #[test]
    fn test_plan_covers_all_tunable_kinds() {
        let fx = fixture();
        let opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        let plan = opt.build_plan();
        for kind in [
            TunableKind::Governor,
            TunableKind::MinFreq,
            TunableKind::IrqAffinity,
            TunableKind::UsbPower,
            TunableKind::UsbAutosuspend,
            TunableKind::SchedParam,
        ] {
            assert!(
                plan.iter().any(|t| t.kind == kind),
                "plan missing {:?}",
                kind
            );
        }
        // Both the controller and driver IRQs are pinned
        assert_eq!(
            plan.iter()
                .filter(|t| t.kind == TunableKind::IrqAffinity)
                .count(),
            2
        );
    }

    #[test]
    fn test_apply_writes_desired_values() {
        let fx = fixture();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        let errors = opt.apply();
        assert!(errors.is_empty(), "{:?}", errors);

        let cpu = |n: usize, f: &str| fx.roots.cpu_base.join(format!("cpu{}/cpufreq/{}", n, f));
        assert_eq!(read(&cpu(2, "scaling_governor")), "performance");
        assert_eq!(read(&cpu(3, "scaling_governor")), "performance");
        assert_eq!(read(&cpu(2, "scaling_min_freq")), "3500000");
        assert_eq!(read(&cpu(1, "scaling_governor")), "performance");
        assert_eq!(read(&cpu(0, "scaling_governor")), "powersave");
        assert_eq!(read(&fx.roots.irq_base.join("128/smp_affinity_list")), "1");
        assert_eq!(read(&fx.roots.irq_base.join("29/smp_affinity_list")), "1");
        assert_eq!(read(&fx.roots.usb_autosuspend), "-1");
        assert_eq!(read(&fx.roots.sched_rt_runtime), "-1");
        assert_eq!(read(&fx.roots.swappiness), "10");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let fx = fixture();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        assert!(opt.apply().is_empty());
        let ledger_len = opt.ledger().len();
        let gov2 = read(&fx.roots.cpu_base.join("cpu2/cpufreq/scaling_governor"));

        assert!(opt.apply().is_empty());
        assert_eq!(opt.ledger().len(), ledger_len);
        assert_eq!(
            read(&fx.roots.cpu_base.join("cpu2/cpufreq/scaling_governor")),
            gov2
        );
        // Prior values must still be the pre-optimization ones
        assert_eq!(
            opt.ledger()
                .lookup(
                    &fx.roots
                        .cpu_base
                        .join("cpu2/cpufreq/scaling_governor")
                        .to_string_lossy()
                )
                .unwrap()
                .prior_value,
            "schedutil"
        );
    }

    #[test]
    fn test_revert_restores_prior_values_verbatim() {
        let fx = fixture();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        assert!(opt.apply().is_empty());
        let errors = opt.revert_all();
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(opt.ledger().is_empty());

        let cpu = |n: usize, f: &str| fx.roots.cpu_base.join(format!("cpu{}/cpufreq/{}", n, f));
        for n in 0..4 {
            assert_eq!(read(&cpu(n, "scaling_governor")), "schedutil");
        }
        assert_eq!(read(&cpu(2, "scaling_min_freq")), "800000");
        assert_eq!(read(&fx.roots.irq_base.join("128/smp_affinity_list")), "0-3");
        assert_eq!(read(&fx.roots.usb_autosuspend), "2");
        assert_eq!(read(&fx.roots.sched_rt_runtime), "950000");
        assert_eq!(read(&fx.roots.swappiness), "60");
        assert_eq!(
            read(&fx.presence.usb_device_dirs()[0].join("power/control")),
            "auto"
        );
    }

    #[test]
    fn test_revert_without_apply_is_noop() {
        let fx = fixture();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        assert!(opt.revert_all().is_empty());
        assert_eq!(
            read(&fx.roots.cpu_base.join("cpu0/cpufreq/scaling_governor")),
            "schedutil"
        );
    }

    #[test]
    fn test_vanished_target_counts_as_reverted() {
        let fx = fixture();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        assert!(opt.apply().is_empty());
        // Simulate the interface being unplugged before revert
        let dev_power = fx.presence.usb_device_dirs()[0].join("power");
        std::fs::remove_dir_all(dev_power.parent().unwrap()).unwrap();

        let errors = opt.revert_all();
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(opt.ledger().is_empty());
    }

    #[test]
    fn test_individual_failure_does_not_block_others() {
        let fx = fixture();
        // Remove one governor file so its write fails
        std::fs::remove_file(
            fx.roots
                .cpu_base
                .join("cpu1/cpufreq/scaling_governor"),
        )
        .unwrap();
        let mut opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        let errors = opt.apply();
        assert_eq!(errors.len(), 1);
        // Everything else still applied
        assert_eq!(
            read(&fx.roots.cpu_base.join("cpu2/cpufreq/scaling_governor")),
            "performance"
        );
        assert_eq!(read(&fx.roots.swappiness), "10");
    }

    #[test]
    fn test_find_device_irqs() {
        let fx = fixture();
        let opt = ResourceOptimizer::with_roots(
            &fx.settings,
            fx.presence.clone(),
            ResourceLedger::in_memory(),
            fx.roots.clone(),
        );
        assert_eq!(opt.find_device_irqs(), vec![29, 128]);
    }
}
