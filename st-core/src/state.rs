//! Optimization state machine
//!
//! The top-level driver. Each tick checks device presence and walks the
//! Standard -> Optimizing -> Optimized -> Deoptimizing -> Standard cycle,
//! invoking the resource optimizer and affinity manager on the transitions
//! and the xrun monitor periodically while Optimized.
//!
//! Ticks are strictly sequential: a single-flight guard drops a tick that
//! arrives while one is still running rather than queueing it. The current
//! state is persisted before each transition's sub-steps run, so a restart
//! can tell a clean Standard from a crash mid-apply and reconcile instead
//! of blindly re-applying.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use st_protocol::{OptState, StatusSnapshot};
use tracing::{debug, info, warn};

use crate::affinity::AffinityManager;
use crate::audio::AudioEngineProbe;
use crate::constants::paths;
use crate::ledger::ResourceLedger;
use crate::optimizer::ResourceOptimizer;
use crate::presence::PresenceDetector;
use crate::recommend::{advise, RecommendConfig};
use crate::settings::{AppSettings, TickSettings};
use crate::xrun::XrunMonitor;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    state: OptState,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Presence-driven optimization driver. All state lives behind the
/// single-flight guard; external callers only see `tick`, the operation
/// verbs, and snapshot reads.
pub struct StateMachine {
    inner: Mutex<Inner>,
}

struct Inner {
    state: OptState,
    tick_count: u64,
    presence: PresenceDetector,
    optimizer: ResourceOptimizer,
    affinity: AffinityManager,
    probe: AudioEngineProbe,
    monitor: XrunMonitor,
    recommend_cfg: RecommendConfig,
    ticks: TickSettings,
    state_file: PathBuf,
    status_file: PathBuf,
    last_snapshot: Option<StatusSnapshot>,
}

impl StateMachine {
    /// Build the production machine from settings, loading any persisted
    /// state and surviving ledger from the state directory.
    pub fn new(settings: &AppSettings) -> Self {
        let state_dir = PathBuf::from(paths::STATE_DIR);
        let state_file = state_dir.join(paths::STATE_FILE);
        let ledger_file = state_dir.join(paths::LEDGER_FILE);
        let status_file = PathBuf::from(paths::RUN_DIR).join(paths::STATUS_FILE);

        let presence = PresenceDetector::new(settings.device.clone());
        let ledger = ResourceLedger::load(&ledger_file)
            .unwrap_or_else(|| ResourceLedger::with_mirror(&ledger_file));
        let optimizer = ResourceOptimizer::new(settings, presence.clone(), ledger);
        let monitor = XrunMonitor::with_default_sources(
            paths::user_home_dir(),
            settings.xrun.mild_threshold,
        );

        Self {
            inner: Mutex::new(Inner {
                state: load_state(&state_file),
                tick_count: 0,
                presence,
                optimizer,
                affinity: AffinityManager::new(settings),
                probe: AudioEngineProbe::new(&settings.device.card_label),
                monitor,
                recommend_cfg: RecommendConfig {
                    severe_jump_threshold: settings.xrun.severe_jump_threshold,
                },
                ticks: settings.ticks.clone(),
                state_file,
                status_file,
                last_snapshot: None,
            }),
        }
    }

    /// Assemble a machine from explicitly constructed parts (tests)
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        presence: PresenceDetector,
        optimizer: ResourceOptimizer,
        affinity: AffinityManager,
        probe: AudioEngineProbe,
        monitor: XrunMonitor,
        recommend_cfg: RecommendConfig,
        ticks: TickSettings,
        state_file: &Path,
        status_file: &Path,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: load_state(state_file),
                tick_count: 0,
                presence,
                optimizer,
                affinity,
                probe,
                monitor,
                recommend_cfg,
                ticks,
                state_file: state_file.to_path_buf(),
                status_file: status_file.to_path_buf(),
                last_snapshot: None,
            }),
        }
    }

    /// Run one tick. A tick arriving while another runs is dropped - the
    /// next scheduled one will observe whatever that tick left behind.
    pub fn tick(&self) {
        let Some(mut inner) = self.inner.try_lock() else {
            debug!("Tick already in flight, skipping");
            return;
        };
        inner.tick();
    }

    /// Startup reconciliation: a persisted state other than Standard, or a
    /// surviving ledger file, means a previous run died mid-cycle. Run a
    /// forced revert pass first so no half-applied tunables survive, then -
    /// if the device is actually present - apply cleanly on top.
    pub fn reconcile_on_startup(&self) {
        let mut inner = self.inner.lock();
        let dirty = inner.state != OptState::Standard || inner.optimizer.is_applied();
        if !dirty {
            return;
        }
        let present = inner.presence.is_present();
        info!(
            state = %inner.state,
            ledgered = inner.optimizer.ledger().len(),
            present,
            "Inconsistent startup state, forcing revert pass"
        );
        inner.set_state(OptState::Deoptimizing);
        let errors = inner.optimizer.revert_to_baseline();
        if !errors.is_empty() {
            warn!(failed = errors.len(), "Forced revert finished with failures");
        }
        inner.affinity.revert_all();
        inner.set_state(OptState::Standard);

        if present {
            inner.enter_optimized();
        } else {
            inner.publish_minimal(false);
        }
    }

    /// Operator override: apply optimization now, regardless of presence
    pub fn activate(&self) {
        let mut inner = self.inner.lock();
        inner.enter_optimized();
    }

    /// Operator override: revert everything now
    pub fn deactivate(&self) {
        let mut inner = self.inner.lock();
        inner.enter_standard();
    }

    pub fn state(&self) -> OptState {
        self.inner.lock().state
    }

    pub fn device_present(&self) -> bool {
        self.inner.lock().presence.is_present()
    }

    /// Last published snapshot, or a minimal live reading when nothing has
    /// been sampled yet
    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        if let Some(ref snap) = inner.last_snapshot {
            return snap.clone();
        }
        let mut snap = StatusSnapshot::empty(inner.presence.is_present(), inner.state);
        snap.updated_at_ms = now_millis();
        snap
    }

    /// Fresh presence + engine probe + xrun sample, bypassing the cadence
    pub fn detailed_status(&self) -> StatusSnapshot {
        let mut inner = self.inner.lock();
        inner.sample_and_publish()
    }
}

impl Inner {
    fn tick(&mut self) {
        self.tick_count += 1;
        let present = self.presence.is_present();

        match self.state {
            OptState::Standard if present => {
                info!("Device attached, entering optimized state");
                self.enter_optimized();
            }
            OptState::Optimized if !present => {
                info!("Device detached, reverting to standard state");
                self.enter_standard();
            }
            OptState::Optimized => {
                if self.tick_count % self.ticks.affinity_rescan_ticks == 0 {
                    // Catch audio processes started since the last pass
                    self.affinity.apply_all();
                }
                if self.tick_count % self.ticks.xrun_sample_ticks == 0 {
                    self.sample_and_publish();
                }
            }
            OptState::Standard => {}
            // Transient states only survive a crash; reconcile handles them
            // before ticking starts, so treat them like their target state
            OptState::Optimizing => self.enter_optimized(),
            OptState::Deoptimizing => self.enter_standard(),
        }
    }

    /// Standard -> Optimizing -> Optimized. The transient state is persisted
    /// before the sub-steps run and never observed by status readers.
    fn enter_optimized(&mut self) {
        self.set_state(OptState::Optimizing);
        let errors = self.optimizer.apply();
        if !errors.is_empty() {
            warn!(
                failed = errors.len(),
                "Optimization applied with per-tunable failures"
            );
        }
        self.affinity.apply_all();
        self.set_state(OptState::Optimized);
        self.publish_minimal(true);
    }

    /// Optimized -> Deoptimizing -> Standard
    fn enter_standard(&mut self) {
        self.set_state(OptState::Deoptimizing);
        let errors = self.optimizer.revert_all();
        if !errors.is_empty() {
            warn!(failed = errors.len(), "Revert finished with failures");
        }
        self.affinity.revert_all();
        self.set_state(OptState::Standard);
        self.publish_minimal(false);
    }

    fn set_state(&mut self, state: OptState) {
        self.state = state;
        if let Some(parent) = self.state_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&PersistedState { state }) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.state_file, json) {
                    warn!("Failed to persist state to {:?}: {}", self.state_file, e);
                }
            }
            Err(e) => warn!("Failed to serialize state: {}", e),
        }
    }

    /// Full monitoring pass: engine probe, xrun windows, severity, advice;
    /// publishes and returns the resulting snapshot.
    fn sample_and_publish(&mut self) -> StatusSnapshot {
        let engine = self.probe.current_settings();
        let counts = self.monitor.sample();
        let severity = self.monitor.classify(&counts);
        let recommendations = advise(&engine, severity, &counts, &self.recommend_cfg);

        let snapshot = StatusSnapshot {
            device_present: self.presence.is_present(),
            state: self.state,
            engine_active: engine.active,
            buffer_frames: engine.buffer_frames,
            sample_rate_hz: engine.sample_rate_hz,
            periods: engine.periods,
            xrun_window_counts: XrunMonitor::labeled_counts(&counts),
            severity,
            recommendations,
            updated_at_ms: now_millis(),
        };
        self.publish(snapshot.clone());
        snapshot
    }

    /// Publish a snapshot without running the monitor (state transitions)
    fn publish_minimal(&mut self, device_present: bool) {
        let mut snap = StatusSnapshot::empty(device_present, self.state);
        snap.updated_at_ms = now_millis();
        self.publish(snap);
    }

    /// Write the snapshot to the well-known location, world-readable so
    /// unprivileged CLI/tray readers can consume it.
    fn publish(&mut self, snapshot: StatusSnapshot) {
        if let Some(parent) = self.status_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.status_file, json) {
                    warn!("Failed to publish status to {:?}: {}", self.status_file, e);
                } else {
                    let _ = fs::set_permissions(
                        &self.status_file,
                        fs::Permissions::from_mode(0o644),
                    );
                }
            }
            Err(e) => warn!("Failed to serialize status snapshot: {}", e),
        }
        self.last_snapshot = Some(snapshot);
    }
}

fn load_state(path: &Path) -> OptState {
    let Ok(data) = fs::read_to_string(path) else {
        return OptState::Standard;
    };
    match serde_json::from_str::<PersistedState>(&data) {
        Ok(persisted) => persisted.state,
        Err(e) => {
            warn!("State file {:?} unreadable ({}), assuming standard", path, e);
            OptState::Standard
        }
    }
}

/// Read a previously published snapshot without touching the engine.
/// Used by unprivileged status readers.
pub fn read_published_status(path: &Path) -> Option<StatusSnapshot> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
