//! Constants and configuration values for Studiotune
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all configuration values.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths for the tunables the engine manages
pub mod paths {

    /// Base path for per-CPU cpufreq controls
    pub const CPU_BASE: &str = "/sys/devices/system/cpu";

    /// Online CPU range file (e.g. "0-7")
    pub const CPU_ONLINE: &str = "/sys/devices/system/cpu/online";

    /// Per-IRQ control directory root
    pub const IRQ_BASE: &str = "/proc/irq";

    /// Interrupt table used to locate USB-controller and audio-driver IRQs
    pub const INTERRUPTS: &str = "/proc/interrupts";

    /// USB bus device tree
    pub const USB_DEVICES: &str = "/sys/bus/usb/devices";

    /// Global USB autosuspend module parameter
    pub const USB_AUTOSUSPEND: &str = "/sys/module/usbcore/parameters/autosuspend";

    /// ALSA registered sound card table
    pub const ASOUND_CARDS: &str = "/proc/asound/cards";

    /// ALSA per-card directory root
    pub const ASOUND_BASE: &str = "/proc/asound";

    /// RT throttling control (-1 disables the RT runtime cap)
    pub const SCHED_RT_RUNTIME: &str = "/proc/sys/kernel/sched_rt_runtime_us";

    /// VM swappiness control
    pub const SWAPPINESS: &str = "/proc/sys/vm/swappiness";

    /// System configuration directory
    pub const CONFIG_DIR: &str = "/etc/studiotune";

    /// Configuration file name
    pub const CONFIG_FILE: &str = "config.json";

    /// Persistent state directory (state + ledger survive restarts)
    pub const STATE_DIR: &str = "/var/lib/studiotune";

    /// Persisted state machine state
    pub const STATE_FILE: &str = "state.json";

    /// Persisted resource ledger mirror
    pub const LEDGER_FILE: &str = "ledger.json";

    /// Runtime directory for the published status snapshot
    pub const RUN_DIR: &str = "/run/studiotune";

    /// Published status snapshot file name
    pub const STATUS_FILE: &str = "status.json";

    /// User configuration directory - handles the case where the daemon runs
    /// as root but needs to access the invoking user's config.
    /// Uses SUDO_USER/PKEXEC_UID to find the original user when running elevated.
    pub fn user_config_dir() -> Option<std::path::PathBuf> {
        let config_base = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            // Running via sudo - get the original user's home
            get_user_home(&sudo_user).map(|h| h.join(".config"))
        } else if let Ok(pkexec_uid) = std::env::var("PKEXEC_UID") {
            // Running via pkexec - get user by UID
            if let Ok(uid) = pkexec_uid.parse::<u32>() {
                get_home_by_uid(uid).map(|h| h.join(".config"))
            } else {
                None
            }
        // SAFETY: geteuid is always safe - it just returns the effective user ID of the process.
        } else if unsafe { libc::geteuid() } == 0 {
            // Running as root without SUDO_USER/PKEXEC_UID - find the
            // logged-in desktop user's config
            find_logged_in_user_config()
        } else {
            None
        };

        let config_base = config_base.or_else(|| {
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                Some(std::path::PathBuf::from(xdg))
            } else if let Ok(home) = std::env::var("HOME") {
                Some(std::path::PathBuf::from(home).join(".config"))
            } else {
                dirs::config_dir()
            }
        });

        config_base.map(|p| p.join("studiotune"))
    }

    /// Home directory of the invoking desktop user, resolved through the
    /// same SUDO_USER/PKEXEC_UID chain as `user_config_dir`. Used for log
    /// files that live in the user's session (the engine's own logs).
    pub fn user_home_dir() -> Option<std::path::PathBuf> {
        if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            if let Some(home) = get_user_home(&sudo_user) {
                return Some(home);
            }
        }
        if let Ok(pkexec_uid) = std::env::var("PKEXEC_UID") {
            if let Ok(uid) = pkexec_uid.parse::<u32>() {
                if let Some(home) = get_home_by_uid(uid) {
                    return Some(home);
                }
            }
        }
        std::env::var("HOME").ok().map(std::path::PathBuf::from)
    }

    /// Get home directory for a username
    pub fn get_user_home(username: &str) -> Option<std::path::PathBuf> {
        if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 6 && parts[0] == username {
                    return Some(std::path::PathBuf::from(parts[5]));
                }
            }
        }
        None
    }

    /// Get home directory by UID
    fn get_home_by_uid(uid: u32) -> Option<std::path::PathBuf> {
        if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 6 {
                    if let Ok(line_uid) = parts[2].parse::<u32>() {
                        if line_uid == uid {
                            return Some(std::path::PathBuf::from(parts[5]));
                        }
                    }
                }
            }
        }
        None
    }

    /// Find the logged-in user's config directory (UID >= 1000 with a
    /// live /run/user/<uid> session), falling back to the first regular
    /// user with a home directory.
    fn find_logged_in_user_config() -> Option<std::path::PathBuf> {
        use tracing::debug;

        let passwd = match std::fs::read_to_string("/etc/passwd") {
            Ok(p) => p,
            Err(e) => {
                debug!("Failed to read /etc/passwd: {}", e);
                return None;
            }
        };

        let mut users: Vec<(String, u32, std::path::PathBuf)> = Vec::new();
        for line in passwd.lines() {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() >= 6 {
                if let Ok(uid) = parts[2].parse::<u32>() {
                    if uid >= 1000 && uid < 65534 {
                        let home = std::path::PathBuf::from(parts[5]);
                        if home.exists() {
                            users.push((parts[0].to_string(), uid, home));
                        }
                    }
                }
            }
        }

        // Active session takes precedence
        for (_, uid, home) in &users {
            if std::path::Path::new(&format!("/run/user/{}", uid)).exists() {
                return Some(home.join(".config"));
            }
        }

        users.first().map(|(_, _, home)| home.join(".config"))
    }
}

/// CPU pool and governor defaults
pub mod pools {
    /// Governor applied to the fast-path (audio) pool while optimized
    pub const FAST_GOVERNOR: &str = "performance";

    /// Governor applied to the interrupt-handling pool while optimized
    pub const IRQ_GOVERNOR: &str = "performance";

    /// Default governor for the background pool while optimized
    pub const DEFAULT_BACKGROUND_GOVERNOR: &str = "powersave";
}

/// Interrupt routing parameters
pub mod irq {
    /// /proc/interrupts driver tokens whose IRQs get pinned to the
    /// interrupt-handling pool: the USB host controllers and the USB audio
    /// driver itself
    pub const DRIVER_TOKENS: &[&str] = &["xhci_hcd", "ehci_hcd", "ohci_hcd", "snd_usb_audio"];

    /// Service that would re-spread the pinned IRQs if left running
    pub const REBALANCE_SERVICE: &str = "irqbalance";

    /// Ledger pseudo-key for the rebalance service state
    pub const REBALANCE_LEDGER_KEY: &str = "service:irqbalance";
}

/// Real-time scheduling defaults
///
/// The ordering is load-bearing: the audio server must always preempt
/// applications, so every audio-server rule priority must stay strictly
/// above every application rule priority.
pub mod rt {
    /// Default SCHED_FIFO priority for the audio server and its helpers
    pub const AUDIO_SERVER_PRIORITY: u8 = 85;

    /// Default SCHED_FIFO priority for audio applications
    pub const APPLICATION_PRIORITY: u8 = 70;

    /// Highest priority accepted from configuration
    pub const MAX_PRIORITY: u8 = 98;
}

/// Xrun monitoring parameters
pub mod xrun {
    use super::Duration;

    /// Sliding window durations, smallest to largest
    pub const WINDOWS: &[Duration] = &[
        Duration::from_secs(5),
        Duration::from_secs(10),
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(300),
    ];

    /// Window labels used in the published snapshot, index-aligned with WINDOWS
    pub const WINDOW_LABELS: &[&str] = &["5s", "10s", "30s", "1m", "5m"];

    /// The window severity classification is based on (1 minute)
    pub const SEVERITY_WINDOW: Duration = Duration::from_secs(60);

    /// 1-minute totals below this count (and no severe-source activity)
    /// classify as Mild
    pub const DEFAULT_MILD_THRESHOLD: u32 = 5;

    /// Per-adapter query timeout; a slow backend degrades to zero
    pub const ADAPTER_TIMEOUT: Duration = Duration::from_secs(3);
}

/// Recommendation engine parameters
pub mod recommend {
    /// Buffer size ladder, frames per period
    pub const BUFFER_LADDER: &[u32] = &[64, 128, 256, 512, 1024];

    /// 1-minute xrun counts above this jump straight to the top tier.
    /// Empirically chosen, kept configurable rather than treated as an
    /// invariant.
    pub const DEFAULT_SEVERE_JUMP_THRESHOLD: u32 = 20;

    /// Sample rate recommended as a ceiling under severe xrun load
    pub const FALLBACK_SAMPLE_RATE: u32 = 48_000;

    /// Reference sample rate for the generic latency table
    pub const REFERENCE_SAMPLE_RATE: u32 = 48_000;
}

/// Timing constants for the tick driver and monitor loops
pub mod timing {
    use super::Duration;

    /// Base tick interval for the state machine driver
    pub const BASE_TICK: Duration = Duration::from_secs(5);

    /// Re-run process affinity every Nth tick while Optimized (≈30s)
    pub const AFFINITY_RESCAN_TICKS: u64 = 6;

    /// Sample xruns and refresh the status snapshot every Nth tick (≈60s)
    pub const XRUN_SAMPLE_TICKS: u64 = 12;

    /// Live monitor display cadence
    pub const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

    /// Cancellation poll step inside the live monitor sleep
    pub const MONITOR_CANCEL_STEP: Duration = Duration::from_millis(200);
}

/// Documented first-run baseline, used by Revert ONLY when a tunable has no
/// ledger entry (the ledger's prior value always wins when present).
pub mod baseline {
    pub const GOVERNOR: &str = "schedutil";
    pub const USB_POWER: &str = "auto";
    pub const SWAPPINESS: &str = "60";
    pub const RT_RUNTIME_US: &str = "950000";
}

/// File size and table limits for security
pub mod limits {
    /// Maximum config file size (1MB)
    pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

    /// Maximum number of process rules (built-in plus operator extensions)
    pub const MAX_PROCESS_RULES: usize = 128;

    /// Maximum process name pattern length
    pub const MAX_PATTERN_LEN: usize = 64;

    /// Maximum ledger entries (plan size is bounded well below this)
    pub const MAX_LEDGER_ENTRIES: usize = 1024;
}
