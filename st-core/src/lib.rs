//! Studiotune Core Library
//!
//! Adaptive resource optimization for USB audio interfaces on Linux.
//!
//! # Features
//!
//! - **Presence Detection**: ALSA card table and USB bus probes for the target interface
//! - **Resource Optimization**: CPU governors per pool, IRQ affinity, USB power policy,
//!   scheduler knobs - applied idempotently with ledger-backed rollback
//! - **Process Affinity**: continuous re-pinning of audio processes to CPU pools
//!   with real-time priorities
//! - **Xrun Monitoring**: multi-source event-log ingestion with sliding-window counts
//!   and severity classification
//! - **Recommendations**: buffer/sample-rate/period advice for the engine's current
//!   configuration
//!
//! # Module Structure
//!
//! - `presence`/`optimizer`/`ledger`/`affinity` - the optimization side
//! - `audio`/`xrun`/`recommend` - the monitoring side
//! - `state` - the presence-driven state machine tying both together
//! - `ops` - the operation surface CLI/service wrappers call

pub mod affinity;
pub mod audio;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod ops;
pub mod optimizer;
pub mod presence;
pub mod recommend;
pub mod service;
pub mod settings;
pub mod state;
pub mod system;
pub mod xrun;

// Re-export error types
pub use error::{Result, StudiotuneError};

// Re-export shared protocol types
pub use st_protocol::{OptState, Severity, StatusSnapshot};

// Re-export primary component types
pub use affinity::{AffinityAssignment, AffinityManager};
pub use audio::{AudioEngineProbe, EngineSettings, IdentityResolver, SudoIdentityResolver};
pub use ledger::{LedgerEntry, ResourceLedger, TunableKind};
pub use optimizer::{ResourceOptimizer, SysfsRoots, TunableTarget};
pub use presence::PresenceDetector;
pub use recommend::{advise, latency_ms, RecommendConfig};
pub use state::{read_published_status, StateMachine};
pub use xrun::{XrunLogSource, XrunMonitor, XrunSample};

// Re-export settings surface
pub use settings::{
    get_cached_settings, invalidate_settings_cache, load_settings, save_settings,
    validate_settings, AppSettings, CpuPools, DeviceIdentity, ProcessRule, RuleClass,
};

// Re-export system helpers
pub use system::{format_cpu_list, get_system_summary, online_cpus, parse_cpu_list, SystemSummary};

// Re-export operations
pub use ops::{published_status, run_live_monitor};
