//! Studiotune Daemon (studiotuned)
//!
//! Privileged service driving the adaptive resource optimization engine.
//! Watches for the configured USB audio interface and re-shapes CPU
//! governors, IRQ affinity, USB power policy, and process scheduling while
//! it is attached, reverting everything when it leaves.
//!
//! # Security Model
//! - **Privilege**: runs as root for /sys and /proc tunable access only
//! - **Validation**: strict allowlist-based tunable path validation
//! - **Isolation**: restrictive umask, working directory set to /
//! - **Limits**: resource limits, no core dumps
//! - **Signals**: graceful shutdown with a full revert of applied tunables

mod monitor;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use st_core::{get_system_summary, load_settings, OptState, StateMachine};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const PID_FILE: &str = "/run/studiotuned.pid";

// ============================================================================
// Security Hardening
// ============================================================================

/// Sanitize the process environment by removing dangerous variables.
/// SUDO_USER and PKEXEC_UID are deliberately preserved - they carry the
/// invoking-user identity the engine probe and log adapters rely on.
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "HOSTALIASES",
        "LOCALDOMAIN",
        "RES_OPTIONS",
        "IFS",
        "PATH", // We'll set our own
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }

    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LC_ALL", "C");
    std::env::set_var("LANG", "C");

    debug!("Environment sanitized");
}

/// Set restrictive resource limits
fn set_resource_limits() {
    // Disable core dumps
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);

    // The daemon only holds a handful of sysfs files and log tails open
    set_rlimit(libc::RLIMIT_NOFILE as i32, 1024, 1024);

    // 256 MB address space is generous for this daemon
    set_rlimit(libc::RLIMIT_AS as i32, 256 * 1024 * 1024, 256 * 1024 * 1024);

    debug!("Resource limits applied");
}

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit is safe when called with a valid resource type and a
    // properly initialized rlimit struct.
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            warn!("Failed to set rlimit for resource {}", resource);
        }
    }
}

/// Set restrictive umask (0077: owner-only on created files)
fn set_secure_umask() {
    // SAFETY: umask is always safe to call - it simply sets the file creation mask.
    unsafe { libc::umask(0o077) };
    debug!("Umask set to 0077");
}

/// Change to root directory (prevent directory-based attacks)
fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// Verify we're running as root
fn verify_privileges() -> Result<(), &'static str> {
    // SAFETY: geteuid/getuid are always safe - they just return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err("Daemon must run as root (euid=0) for tunable access");
    }
    if uid != 0 && euid == 0 {
        warn!("Running as setuid root - this is not recommended");
    }

    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

// ============================================================================
// PID File Management
// ============================================================================

/// Write PID file, refusing to start when another instance is alive
fn write_pid_file() -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if Path::new(PID_FILE).exists() {
        if let Ok(content) = std::fs::read_to_string(PID_FILE) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only checks whether the process
                // exists; the PID is a validated i32 from the PID file.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        // Stale PID file
        let _ = std::fs::remove_file(PID_FILE);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(PID_FILE)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", PID_FILE);
    Ok(())
}

fn cleanup() {
    if Path::new(PID_FILE).exists() {
        if let Err(e) = std::fs::remove_file(PID_FILE) {
            warn!("Failed to remove PID file: {}", e);
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging() {
    let log_level = std::env::var("STUDIOTUNE_LOG").unwrap_or_else(|_| "info".to_string());

    let use_journald = Path::new("/run/systemd/journal/socket").exists();
    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("studiotuned {} - Studiotune adaptive audio resource daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    studiotuned [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -f, --foreground    Run the presence-watching daemon (default)");
    eprintln!("        --activate      Apply optimization now and exit");
    eprintln!("        --deactivate    Revert all applied tunables and exit");
    eprintln!("        --status        Print the last published status snapshot");
    eprintln!("        --json          With --status, print the raw snapshot JSON");
    eprintln!("        --monitor       Live xrun monitor (read-only, ctrl-c to stop)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    STUDIOTUNE_LOG      Log level (trace, debug, info, warn, error)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Daemon,
    Activate,
    Deactivate,
    Status,
    Monitor,
}

fn parse_args() -> (Mode, bool) {
    let mut mode = Mode::Daemon;
    let mut json = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                println!("studiotuned {}", VERSION);
                std::process::exit(0);
            }
            "-f" | "--foreground" => mode = Mode::Daemon,
            "--activate" => mode = Mode::Activate,
            "--deactivate" => mode = Mode::Deactivate,
            "--status" => mode = Mode::Status,
            "--json" => json = true,
            "--monitor" => mode = Mode::Monitor,
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
    }
    (mode, json)
}

// ============================================================================
// Status printing
// ============================================================================

fn print_status(json: bool) {
    if json {
        let snap = st_core::published_status().unwrap_or_else(|| {
            st_protocol::StatusSnapshot::empty(false, st_protocol::OptState::Standard)
        });
        match serde_json::to_string_pretty(&snap) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("Failed to serialize snapshot: {}", e),
        }
        return;
    }

    let summary = get_system_summary();
    println!(
        "{} · kernel {} · {} ({} cores)",
        summary.hostname, summary.kernel_version, summary.cpu_model, summary.cpu_cores
    );
    match st_core::published_status() {
        Some(snap) => {
            println!("state:        {}", snap.state);
            println!("device:       {}", if snap.device_present { "present" } else { "absent" });
            println!("engine:       {}", if snap.engine_active { "running" } else { "stopped" });
            if let (Some(buffer), Some(rate)) = (snap.buffer_frames, snap.sample_rate_hz) {
                println!(
                    "engine cfg:   {} frames @ {} Hz ({:.1} ms), {} periods",
                    buffer,
                    rate,
                    st_core::latency_ms(buffer, rate),
                    snap.periods.map_or("?".to_string(), |p| p.to_string()),
                );
            }
            println!("severity:     {}", snap.severity);
            for (window, count) in &snap.xrun_window_counts {
                println!("xruns {:<6}  {}", window, count);
            }
            for rec in &snap.recommendations {
                println!("advice: {}", rec);
            }
        }
        None => println!("No status snapshot published yet (daemon not running?)"),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // PHASE 0: panic handler so a bug never leaves tunables silently stranded
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!("PANIC at {}: daemon state is persisted; restart will reconcile", location);
    }));

    // PHASE 1: pre-initialization hardening
    sanitize_environment();
    set_secure_umask();
    set_resource_limits();
    secure_working_directory();

    // PHASE 2: arguments
    let (mode, json) = parse_args();

    // PHASE 3: logging
    init_logging();

    // Unprivileged read-only modes
    match mode {
        Mode::Status => {
            print_status(json);
            return Ok(());
        }
        Mode::Monitor => {
            monitor::run_monitor_mode();
            return Ok(());
        }
        _ => {}
    }

    info!("STARTUP: studiotuned {} starting", VERSION);

    // PHASE 4: privilege check - everything past here mutates tunables
    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    // PHASE 5: configuration and engine construction
    let settings = match load_settings() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load settings: {} - using defaults", e);
            st_core::AppSettings::default()
        }
    };
    let machine = Arc::new(StateMachine::new(&settings));

    // One-shot operator overrides
    match mode {
        Mode::Activate => {
            machine.activate();
            info!("Optimization applied (state: {})", machine.state());
            return Ok(());
        }
        Mode::Deactivate => {
            machine.deactivate();
            info!("Optimization reverted (state: {})", machine.state());
            return Ok(());
        }
        _ => {}
    }

    // PHASE 6: PID file (detect other instances)
    if let Err(e) = write_pid_file() {
        error!("Could not write PID file: {}", e);
        std::process::exit(1);
    }

    // PHASE 7: signal handling
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: received SIGINT/SIGTERM - initiating shutdown");
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // PHASE 8: crash recovery before the first tick
    machine.reconcile_on_startup();
    info!(
        "STARTUP: reconciled (state: {}, device {})",
        machine.state(),
        if machine.device_present() { "present" } else { "absent" }
    );

    // PHASE 9: tick loop
    let base_tick = Duration::from_secs(settings.ticks.base_tick_secs.max(1));
    info!("STARTUP: ticking every {:?}", base_tick);

    while !shutdown.load(Ordering::SeqCst) {
        machine.tick();
        tokio::select! {
            _ = tokio::time::sleep(base_tick) => {}
            _ = wait_for_shutdown(&shutdown) => break,
        }
    }

    // PHASE 10: shutdown - leave the machine in a clean Standard state
    if machine.state() == OptState::Optimized {
        info!("SHUTDOWN: reverting applied tunables");
        machine.deactivate();
    }
    cleanup();
    info!("SHUTDOWN: daemon terminated gracefully");
    Ok(())
}

/// Resolve once the shutdown flag is raised; polled cheaply so the ctrlc
/// handler (a plain thread) can interrupt the tokio sleep.
async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
