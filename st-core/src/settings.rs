//! Application Settings
//!
//! Persistent settings stored as JSON in /etc/studiotune/config.json, with a
//! per-user override at ~/.config/studiotune/config.json (resolved through
//! SUDO_USER/PKEXEC_UID when the daemon runs elevated).

use std::fs;
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{limits, paths, pools, rt, timing, xrun};
use crate::error::{Result, StudiotuneError};

// ============================================================================
// Cached Settings (avoid disk I/O on every access)
// ============================================================================

/// Global cached settings - avoids repeated disk reads.
/// Updated only when settings are explicitly saved or invalidated.
static SETTINGS_CACHE: OnceLock<RwLock<Option<AppSettings>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<Option<AppSettings>> {
    SETTINGS_CACHE.get_or_init(|| RwLock::new(None))
}

/// Get cached settings (fast, no disk I/O).
/// Falls back to loading from disk if the cache is empty.
pub fn get_cached_settings() -> AppSettings {
    if let Ok(guard) = get_cache().read() {
        if let Some(ref settings) = *guard {
            return settings.clone();
        }
    }

    let settings = load_settings().unwrap_or_default();
    if let Ok(mut guard) = get_cache().write() {
        *guard = Some(settings.clone());
    }
    settings
}

/// Invalidate the settings cache (call after external config edits)
pub fn invalidate_settings_cache() {
    if let Ok(mut guard) = get_cache().write() {
        *guard = None;
    }
}

// ============================================================================
// Types
// ============================================================================

/// Identity of the USB audio interface the engine reacts to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// USB vendor ID as it appears in sysfs (lowercase hex, no 0x prefix)
    pub vendor_id: String,
    /// USB product ID as it appears in sysfs
    pub product_id: String,
    /// Substring of the ALSA card line registered by the driver
    pub card_label: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: "1235".to_string(),
            product_id: "8210".to_string(),
            card_label: "Scarlett".to_string(),
        }
    }
}

/// The three named CPU pools the optimizer manages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CpuPools {
    /// Fast-path cores: audio server and clients, pinned min=max frequency
    pub fast: Vec<usize>,
    /// Background cores: everything else
    pub background: Vec<usize>,
    /// Interrupt-handling cores: USB controller and audio driver IRQs
    pub irq: Vec<usize>,
}

impl CpuPools {
    /// Default pool layout for a machine with `cpu_count` online CPUs.
    /// Small machines collapse pools rather than leaving one empty.
    pub fn default_for(cpu_count: usize) -> Self {
        match cpu_count {
            0 | 1 => Self {
                fast: vec![0],
                background: vec![0],
                irq: vec![0],
            },
            2 => Self {
                fast: vec![1],
                background: vec![0],
                irq: vec![0],
            },
            3 => Self {
                fast: vec![2],
                background: vec![0],
                irq: vec![1],
            },
            n => Self {
                // Upper half for audio, core 1 for interrupts, the rest background
                fast: (n / 2..n).collect(),
                background: (2..n / 2).chain(std::iter::once(0)).collect(),
                irq: vec![1],
            },
        }
    }
}

/// Which class of process a rule targets; determines CPU pool and where the
/// priority must sit in the global ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    /// The audio engine itself and its helper daemons
    AudioServer,
    /// Editors, synthesizers, plugin hosts
    Application,
}

/// A single process-affinity rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRule {
    /// Executable name, matched case-insensitively and exactly
    pub pattern: String,
    pub class: RuleClass,
    /// SCHED_FIFO priority applied to matches
    pub rt_priority: u8,
}

impl ProcessRule {
    pub fn new(pattern: &str, class: RuleClass, rt_priority: u8) -> Self {
        Self {
            pattern: pattern.to_string(),
            class,
            rt_priority,
        }
    }
}

/// Xrun monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct XrunThresholds {
    /// 1-minute totals below this (with no severe-source samples) are Mild
    pub mild_threshold: u32,
    /// 1-minute totals above this jump recommendations to the top buffer tier
    pub severe_jump_threshold: u32,
}

impl Default for XrunThresholds {
    fn default() -> Self {
        Self {
            mild_threshold: xrun::DEFAULT_MILD_THRESHOLD,
            severe_jump_threshold: crate::constants::recommend::DEFAULT_SEVERE_JUMP_THRESHOLD,
        }
    }
}

/// Tick cadence settings for the state machine driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSettings {
    pub base_tick_secs: u64,
    /// Re-run process affinity every Nth tick while Optimized
    pub affinity_rescan_ticks: u64,
    /// Sample xruns and publish the snapshot every Nth tick
    pub xrun_sample_ticks: u64,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            base_tick_secs: timing::BASE_TICK.as_secs(),
            affinity_rescan_ticks: timing::AFFINITY_RESCAN_TICKS,
            xrun_sample_ticks: timing::XRUN_SAMPLE_TICKS,
        }
    }
}

/// Top-level application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub device: DeviceIdentity,
    #[serde(default = "default_pools")]
    pub pools: CpuPools,
    /// Built-in process rule table
    #[serde(default = "default_rules")]
    pub rules: Vec<ProcessRule>,
    /// Operator-supplied extension rules, merged after the built-ins at load
    #[serde(default)]
    pub extra_rules: Vec<ProcessRule>,
    #[serde(default)]
    pub xrun: XrunThresholds,
    #[serde(default)]
    pub ticks: TickSettings,
    /// Governor for the background pool while optimized
    #[serde(default = "default_background_governor")]
    pub background_governor: String,
    /// VM swappiness while optimized
    #[serde(default = "default_swappiness")]
    pub swappiness: u32,
}

fn default_pools() -> CpuPools {
    CpuPools::default_for(crate::system::online_cpus().len())
}

fn default_background_governor() -> String {
    pools::DEFAULT_BACKGROUND_GOVERNOR.to_string()
}

fn default_swappiness() -> u32 {
    10
}

fn default_rules() -> Vec<ProcessRule> {
    vec![
        // Audio-server class: the engine and its helper daemons
        ProcessRule::new("jackd", RuleClass::AudioServer, rt::AUDIO_SERVER_PRIORITY),
        ProcessRule::new("jackdbus", RuleClass::AudioServer, rt::AUDIO_SERVER_PRIORITY),
        ProcessRule::new("a2jmidid", RuleClass::AudioServer, rt::AUDIO_SERVER_PRIORITY - 2),
        ProcessRule::new("zita-a2j", RuleClass::AudioServer, rt::AUDIO_SERVER_PRIORITY - 2),
        ProcessRule::new("zita-j2a", RuleClass::AudioServer, rt::AUDIO_SERVER_PRIORITY - 2),
        // Application class: strictly lower priority than every server rule
        ProcessRule::new("ardour", RuleClass::Application, rt::APPLICATION_PRIORITY),
        ProcessRule::new("reaper", RuleClass::Application, rt::APPLICATION_PRIORITY),
        ProcessRule::new("qtractor", RuleClass::Application, rt::APPLICATION_PRIORITY),
        ProcessRule::new("renoise", RuleClass::Application, rt::APPLICATION_PRIORITY),
        ProcessRule::new("carla", RuleClass::Application, rt::APPLICATION_PRIORITY - 5),
        ProcessRule::new("guitarix", RuleClass::Application, rt::APPLICATION_PRIORITY - 5),
    ]
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device: DeviceIdentity::default(),
            pools: default_pools(),
            rules: default_rules(),
            extra_rules: Vec::new(),
            xrun: XrunThresholds::default(),
            ticks: TickSettings::default(),
            background_governor: default_background_governor(),
            swappiness: default_swappiness(),
        }
    }
}

impl AppSettings {
    /// Built-in rules plus operator extensions, in match order
    pub fn merged_rules(&self) -> Vec<ProcessRule> {
        let mut merged = self.rules.clone();
        merged.extend(self.extra_rules.iter().cloned());
        merged
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Resolved config file path: user config wins when it exists, otherwise
/// the system config under /etc/studiotune.
pub fn get_settings_path() -> PathBuf {
    if let Some(user_dir) = paths::user_config_dir() {
        let user_path = user_dir.join(paths::CONFIG_FILE);
        if user_path.exists() {
            return user_path;
        }
    }
    PathBuf::from(paths::CONFIG_DIR).join(paths::CONFIG_FILE)
}

/// Load settings from disk, validating before returning
pub fn load_settings() -> Result<AppSettings> {
    let path = get_settings_path();
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Ok(AppSettings::default());
    }

    let meta = fs::metadata(&path).map_err(|e| StudiotuneError::FileRead {
        path: path.clone(),
        source: e,
    })?;
    if meta.len() > limits::MAX_CONFIG_SIZE {
        return Err(StudiotuneError::Config(format!(
            "config file too large: {} bytes (max {})",
            meta.len(),
            limits::MAX_CONFIG_SIZE
        )));
    }

    let data = fs::read_to_string(&path).map_err(|e| StudiotuneError::FileRead {
        path: path.clone(),
        source: e,
    })?;
    let settings: AppSettings = serde_json::from_str(&data)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Save settings to the system config path, refreshing the cache
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    validate_settings(settings)?;
    let path = PathBuf::from(paths::CONFIG_DIR).join(paths::CONFIG_FILE);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json).map_err(|e| StudiotuneError::FileWrite {
        path: path.clone(),
        source: e,
    })?;

    if let Ok(mut guard) = get_cache().write() {
        *guard = Some(settings.clone());
    }
    Ok(())
}

// ============================================================================
// Validation
// ============================================================================

fn is_safe_pattern(s: &str) -> bool {
    if s.is_empty() || s.len() > limits::MAX_PATTERN_LEN {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
}

/// Validate a settings tree.
///
/// The priority ordering check is the load-bearing invariant: every
/// audio-server rule must outrank every application rule, for any rule set,
/// not just the defaults.
pub fn validate_settings(settings: &AppSettings) -> Result<()> {
    let rules = settings.merged_rules();
    if rules.len() > limits::MAX_PROCESS_RULES {
        return Err(StudiotuneError::InvalidConfig {
            field: "rules".to_string(),
            reason: format!("too many rules (max {})", limits::MAX_PROCESS_RULES),
        });
    }

    let mut min_server: Option<u8> = None;
    let mut max_app: Option<u8> = None;
    for rule in &rules {
        if !is_safe_pattern(&rule.pattern) {
            return Err(StudiotuneError::InvalidConfig {
                field: "rules".to_string(),
                reason: format!("invalid process name pattern {:?}", rule.pattern),
            });
        }
        if rule.rt_priority == 0 || rule.rt_priority > rt::MAX_PRIORITY {
            return Err(StudiotuneError::InvalidConfig {
                field: "rules".to_string(),
                reason: format!(
                    "rt_priority {} for {:?} out of range (1..={})",
                    rule.rt_priority,
                    rule.pattern,
                    rt::MAX_PRIORITY
                ),
            });
        }
        match rule.class {
            RuleClass::AudioServer => {
                min_server = Some(min_server.map_or(rule.rt_priority, |m| m.min(rule.rt_priority)));
            }
            RuleClass::Application => {
                max_app = Some(max_app.map_or(rule.rt_priority, |m| m.max(rule.rt_priority)));
            }
        }
    }
    if let (Some(min_server), Some(max_app)) = (min_server, max_app) {
        if min_server <= max_app {
            return Err(StudiotuneError::InvalidConfig {
                field: "rules".to_string(),
                reason: format!(
                    "audio-server priority {} does not outrank application priority {}",
                    min_server, max_app
                ),
            });
        }
    }

    for (name, pool) in [
        ("fast", &settings.pools.fast),
        ("background", &settings.pools.background),
        ("irq", &settings.pools.irq),
    ] {
        if pool.is_empty() {
            return Err(StudiotuneError::InvalidConfig {
                field: format!("pools.{}", name),
                reason: "pool must name at least one CPU".to_string(),
            });
        }
    }

    if settings.swappiness > 200 {
        return Err(StudiotuneError::InvalidConfig {
            field: "swappiness".to_string(),
            reason: format!("{} out of range (0..=200)", settings.swappiness),
        });
    }
    if settings.ticks.base_tick_secs == 0
        || settings.ticks.affinity_rescan_ticks == 0
        || settings.ticks.xrun_sample_ticks == 0
    {
        return Err(StudiotuneError::InvalidConfig {
            field: "ticks".to_string(),
            reason: "tick intervals must be non-zero".to_string(),
        });
    }

    if settings.device.vendor_id.is_empty() && settings.device.card_label.is_empty() {
        warn!("Device identity is empty; presence detection will never fire");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = AppSettings::default();
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_priority_ordering_invariant() {
        let mut settings = AppSettings::default();
        // Lift an application above the servers: must be rejected
        settings
            .extra_rules
            .push(ProcessRule::new("ardour", RuleClass::Application, 90));
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_priority_ordering_holds_for_any_rule_set() {
        // A custom, non-default table with correct ordering must pass
        let settings = AppSettings {
            rules: vec![
                ProcessRule::new("pipewire", RuleClass::AudioServer, 60),
                ProcessRule::new("mixbus", RuleClass::Application, 40),
            ],
            extra_rules: vec![ProcessRule::new("bitwig", RuleClass::Application, 59)],
            ..AppSettings::default()
        };
        assert!(validate_settings(&settings).is_ok());

        // Equal priorities do not satisfy "strictly lower"
        let settings = AppSettings {
            rules: vec![
                ProcessRule::new("pipewire", RuleClass::AudioServer, 60),
                ProcessRule::new("mixbus", RuleClass::Application, 60),
            ],
            extra_rules: Vec::new(),
            ..AppSettings::default()
        };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_merged_rules_appends_extensions() {
        let mut settings = AppSettings::default();
        let builtin = settings.rules.len();
        settings
            .extra_rules
            .push(ProcessRule::new("mycustomdaw", RuleClass::Application, 65));
        let merged = settings.merged_rules();
        assert_eq!(merged.len(), builtin + 1);
        assert_eq!(merged.last().unwrap().pattern, "mycustomdaw");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut settings = AppSettings::default();
        settings
            .extra_rules
            .push(ProcessRule::new("bad name!", RuleClass::Application, 50));
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_empty_pool_rejected() {
        let mut settings = AppSettings::default();
        settings.pools.irq.clear();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_pools_default_small_machines() {
        let two = CpuPools::default_for(2);
        assert!(!two.fast.is_empty() && !two.irq.is_empty() && !two.background.is_empty());
        let eight = CpuPools::default_for(8);
        assert_eq!(eight.fast, vec![4, 5, 6, 7]);
        assert_eq!(eight.irq, vec![1]);
        assert!(eight.background.contains(&0));
        assert!(!eight.background.contains(&1));
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = AppSettings::default();
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: AppSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device, settings.device);
        assert_eq!(back.pools, settings.pools);
        assert_eq!(back.rules, settings.rules);
    }

    #[test]
    fn test_unknown_config_uses_defaults_for_missing_fields() {
        let back: AppSettings = serde_json::from_str(r#"{"swappiness": 20}"#).unwrap();
        assert_eq!(back.swappiness, 20);
        assert_eq!(back.device, DeviceIdentity::default());
        assert!(!back.rules.is_empty());
    }
}
