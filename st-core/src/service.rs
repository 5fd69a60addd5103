//! Service management helpers
//!
//! Detects the init system and generates the systemd unit text for the
//! studiotuned daemon. Actual unit installation belongs to the installer
//! collaborator; the engine only needs to know whether it is running under
//! systemd and what a correct unit looks like.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Result};

const DAEMON_BINARY: &str = "studiotuned";

/// Detected init system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    Unknown,
}

impl std::fmt::Display for InitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitSystem::Systemd => write!(f, "systemd"),
            InitSystem::Unknown => write!(f, "unknown"),
        }
    }
}

/// Detect the init system in use (runtime detection)
pub fn detect_init_system() -> InitSystem {
    if Path::new("/run/systemd/system").exists() {
        return InitSystem::Systemd;
    }
    if let Ok(comm) = std::fs::read_to_string("/proc/1/comm") {
        if comm.trim().contains("systemd") {
            return InitSystem::Systemd;
        }
    }
    InitSystem::Unknown
}

/// systemd unit text for the daemon
pub fn systemd_service(daemon_path: &str) -> String {
    format!(
        r#"[Unit]
Description=Studiotune Adaptive Audio Resource Optimizer
Documentation=https://example.com/studiotune
After=sound.target

[Service]
Type=simple
ExecStart={} --foreground
Restart=on-failure
RestartSec=5

# Security hardening
ProtectHome=read-only
PrivateTmp=true
ReadWritePaths=/sys/devices/system/cpu /proc/irq /sys/bus/usb /run /var/lib/studiotune

[Install]
WantedBy=multi-user.target
"#,
        daemon_path
    )
}

/// Whether the daemon service is currently active under systemd
pub fn is_service_running() -> bool {
    Command::new("systemctl")
        .args(["is-active", "--quiet", DAEMON_BINARY])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Locate the installed daemon binary
pub fn find_daemon_binary() -> Result<String> {
    for candidate in [
        format!("/usr/local/bin/{}", DAEMON_BINARY),
        format!("/usr/bin/{}", DAEMON_BINARY),
        format!("/usr/sbin/{}", DAEMON_BINARY),
    ] {
        if Path::new(&candidate).exists() {
            return Ok(candidate);
        }
    }
    bail!("{} not found in the usual install locations", DAEMON_BINARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemd_unit_references_daemon() {
        let unit = systemd_service("/usr/bin/studiotuned");
        assert!(unit.contains("ExecStart=/usr/bin/studiotuned --foreground"));
        assert!(unit.contains("WantedBy=multi-user.target"));
        assert!(unit.contains("/var/lib/studiotune"));
    }

    #[test]
    fn test_detect_init_system_does_not_panic() {
        let _ = detect_init_system();
    }
}
