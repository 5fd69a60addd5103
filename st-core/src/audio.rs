//! Audio engine probe
//!
//! Detects whether the JACK engine is running and queries its active buffer
//! size, sample rate, and period count. "Unknown" is a first-class value for
//! every field: any individual query that fails leaves its field unset
//! rather than erroring the caller.
//!
//! The daemon runs as root while the engine runs in the desktop user's
//! session, so client-tool queries are re-issued under that user's identity.
//! The identity comes from an injected resolver (SUDO_USER convention) so
//! tests can substitute a fixed one.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::paths;

/// Process names that count as "the engine is running"
const ENGINE_PROCESS_NAMES: &[&str] = &["jackd", "jackdbus"];

/// Bounded wait for an engine client-tool query
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Snapshot of the engine's active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub active: bool,
    pub buffer_frames: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub periods: Option<u32>,
}

impl EngineSettings {
    /// Engine not running: inactive with every field unknown
    pub fn inactive() -> Self {
        Self {
            active: false,
            buffer_frames: None,
            sample_rate_hz: None,
            periods: None,
        }
    }
}

/// Resolves the identity queries should run under when the probe itself is
/// running elevated.
pub trait IdentityResolver: Send + Sync {
    /// The invoking desktop user, or None to query as the current user
    fn invoking_user(&self) -> Option<String>;
}

/// Production resolver: the sudo/pkexec invoking-user convention
pub struct SudoIdentityResolver;

impl IdentityResolver for SudoIdentityResolver {
    fn invoking_user(&self) -> Option<String> {
        if let Ok(user) = std::env::var("SUDO_USER") {
            if !user.is_empty() {
                return Some(user);
            }
        }
        if let Ok(uid) = std::env::var("PKEXEC_UID") {
            if let Ok(uid) = uid.parse::<u32>() {
                return user_name_by_uid(uid);
            }
        }
        None
    }
}

/// Fixed identity for tests
pub struct FixedIdentity(pub Option<String>);

impl IdentityResolver for FixedIdentity {
    fn invoking_user(&self) -> Option<String> {
        self.0.clone()
    }
}

fn user_name_by_uid(uid: u32) -> Option<String> {
    let passwd = fs::read_to_string("/etc/passwd").ok()?;
    for line in passwd.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 3 {
            if let Ok(line_uid) = parts[2].parse::<u32>() {
                if line_uid == uid {
                    return Some(parts[0].to_string());
                }
            }
        }
    }
    None
}

/// Queries the running audio engine's configuration
pub struct AudioEngineProbe {
    resolver: Box<dyn IdentityResolver>,
    proc_root: PathBuf,
    asound_base: PathBuf,
    card_label: String,
}

impl AudioEngineProbe {
    pub fn new(card_label: &str) -> Self {
        Self {
            resolver: Box::new(SudoIdentityResolver),
            proc_root: PathBuf::from("/proc"),
            asound_base: PathBuf::from(paths::ASOUND_BASE),
            card_label: card_label.to_string(),
        }
    }

    /// Probe against fixture trees with an injected identity
    pub fn with_roots(
        resolver: Box<dyn IdentityResolver>,
        proc_root: &Path,
        asound_base: &Path,
        card_label: &str,
    ) -> Self {
        Self {
            resolver,
            proc_root: proc_root.to_path_buf(),
            asound_base: asound_base.to_path_buf(),
            card_label: card_label.to_string(),
        }
    }

    /// Current engine settings. Never errors: a failed query degrades the
    /// affected field to unknown.
    pub fn current_settings(&self) -> EngineSettings {
        if !self.engine_running() {
            return EngineSettings::inactive();
        }

        let user = self.resolver.invoking_user();

        // Primary path: the engine's own client tools, under the session
        // identity when we are elevated
        let mut buffer = query_first_u32("jack_bufsize", user.as_deref());
        let mut rate = query_first_u32("jack_samplerate", user.as_deref());
        let mut periods = None;

        // Fallback: the ALSA stream parameters of the card itself, which
        // root can always read while the stream is open
        if buffer.is_none() || rate.is_none() || periods.is_none() {
            if let Some(hw) = self.read_hw_params() {
                let parsed = parse_hw_params(&hw);
                buffer = buffer.or(parsed.buffer_frames);
                rate = rate.or(parsed.sample_rate_hz);
                periods = periods.or(parsed.periods);
            }
        }

        EngineSettings {
            active: true,
            buffer_frames: buffer,
            sample_rate_hz: rate,
            periods,
        }
    }

    /// Process-table lookup for the engine daemons
    pub fn engine_running(&self) -> bool {
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(_) => return false,
        };
        for ent in entries.flatten() {
            let name = ent.file_name();
            if !name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Ok(comm) = fs::read_to_string(ent.path().join("comm")) {
                let comm = comm.trim();
                if ENGINE_PROCESS_NAMES
                    .iter()
                    .any(|n| n.eq_ignore_ascii_case(comm))
                {
                    return true;
                }
            }
        }
        false
    }

    /// Locate the card by label and read its playback stream parameters
    fn read_hw_params(&self) -> Option<String> {
        let index = self.find_card_index()?;
        let path = self
            .asound_base
            .join(format!("card{}/pcm0p/sub0/hw_params", index));
        match fs::read_to_string(&path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() || trimmed == "closed" {
                    None
                } else {
                    Some(content)
                }
            }
            Err(_) => None,
        }
    }

    fn find_card_index(&self) -> Option<u32> {
        let cards = fs::read_to_string(self.asound_base.join("cards")).ok()?;
        let needle = self.card_label.to_ascii_lowercase();
        for line in cards.lines() {
            if !line.to_ascii_lowercase().contains(&needle) {
                continue;
            }
            // Card lines start with the index: " 1 [USB  ]: ..."
            let index = line.trim_start().split_whitespace().next()?;
            if let Ok(n) = index.parse::<u32>() {
                return Some(n);
            }
        }
        None
    }
}

/// Parsed subset of an ALSA hw_params file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwParams {
    pub buffer_frames: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub periods: Option<u32>,
}

/// Parse rate/period_size/buffer_size out of an open stream's hw_params.
/// Period count is derived: buffer_size / period_size.
pub fn parse_hw_params(content: &str) -> HwParams {
    let mut rate = None;
    let mut period_size = None;
    let mut buffer_size = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            // "rate: 48000 (48000/1)"
            "rate" => {
                rate = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<u32>().ok());
            }
            "period_size" => period_size = value.parse::<u32>().ok(),
            "buffer_size" => buffer_size = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let periods = match (buffer_size, period_size) {
        (Some(b), Some(p)) if p > 0 && b % p == 0 => Some(b / p),
        _ => None,
    };

    HwParams {
        // The engine's "buffer size" (frames per process cycle) is the ALSA
        // period size; the ALSA buffer is period_size * periods
        buffer_frames: period_size,
        sample_rate_hz: rate,
        periods,
    }
}

/// Run an engine client tool, optionally under another user via sudo, with a
/// bounded wait; returns the first integer in its stdout.
fn query_first_u32(program: &str, user: Option<&str>) -> Option<u32> {
    let output = run_with_timeout(program, user, QUERY_TIMEOUT)?;
    for token in output.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_digit());
        if token.is_empty() {
            continue;
        }
        if let Ok(n) = token.parse::<u32>() {
            return Some(n);
        }
    }
    debug!("{} produced no numeric output", program);
    None
}

fn run_with_timeout(program: &str, user: Option<&str>, timeout: Duration) -> Option<String> {
    let program = program.to_string();
    let user = user.map(|u| u.to_string());
    let (tx, rx) = mpsc::channel();

    let thread_program = program.clone();
    thread::spawn(move || {
        // SAFETY: geteuid is always safe - it just returns the effective user ID.
        let elevated = unsafe { libc::geteuid() } == 0;
        let output = match user {
            Some(ref u) if elevated => Command::new("sudo")
                .args(["-u", u, "--", &thread_program])
                .output(),
            _ => Command::new(&thread_program).output(),
        };
        let _ = tx.send(output);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(Ok(output)) => {
            debug!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Ok(Err(e)) => {
            debug!("{} failed to spawn: {}", program, e);
            None
        }
        Err(_) => {
            warn!("{} timed out after {:?}", program, timeout);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HW_PARAMS: &str = "access: MMAP_INTERLEAVED\n\
format: S32_LE\n\
subformat: STD\n\
channels: 2\n\
rate: 48000 (48000/1)\n\
period_size: 128\n\
buffer_size: 384\n";

    #[test]
    fn test_parse_hw_params() {
        let parsed = parse_hw_params(HW_PARAMS);
        assert_eq!(parsed.sample_rate_hz, Some(48000));
        assert_eq!(parsed.buffer_frames, Some(128));
        assert_eq!(parsed.periods, Some(3));
    }

    #[test]
    fn test_parse_hw_params_closed() {
        let parsed = parse_hw_params("closed");
        assert_eq!(parsed, HwParams::default());
    }

    #[test]
    fn test_parse_hw_params_partial() {
        let parsed = parse_hw_params("rate: 96000 (96000/1)\nchannels: 2\n");
        assert_eq!(parsed.sample_rate_hz, Some(96000));
        assert_eq!(parsed.buffer_frames, None);
        assert_eq!(parsed.periods, None);
    }

    fn fixture(engine_running: bool, hw_params: Option<&str>) -> (TempDir, AudioEngineProbe) {
        let tmp = TempDir::new().unwrap();
        let proc_root = tmp.path().join("proc");
        std::fs::create_dir_all(proc_root.join("50")).unwrap();
        std::fs::write(proc_root.join("50/comm"), "bash\n").unwrap();
        if engine_running {
            std::fs::create_dir_all(proc_root.join("100")).unwrap();
            std::fs::write(proc_root.join("100/comm"), "jackdbus\n").unwrap();
        }

        let asound = tmp.path().join("asound");
        std::fs::create_dir_all(&asound).unwrap();
        std::fs::write(
            asound.join("cards"),
            " 0 [HDMI ]: HDA-Intel - HDA ATI HDMI\n 1 [USB  ]: USB-Audio - Scarlett 18i20 USB\n",
        )
        .unwrap();
        if let Some(hw) = hw_params {
            let sub = asound.join("card1/pcm0p/sub0");
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(sub.join("hw_params"), hw).unwrap();
        }

        let probe = AudioEngineProbe::with_roots(
            Box::new(FixedIdentity(None)),
            &proc_root,
            &asound,
            "Scarlett",
        );
        (tmp, probe)
    }

    #[test]
    fn test_inactive_when_engine_absent() {
        let (_tmp, probe) = fixture(false, Some(HW_PARAMS));
        assert!(!probe.engine_running());
        assert_eq!(probe.current_settings(), EngineSettings::inactive());
    }

    #[test]
    fn test_settings_from_hw_params_fallback() {
        let (_tmp, probe) = fixture(true, Some(HW_PARAMS));
        let settings = probe.current_settings();
        assert!(settings.active);
        assert_eq!(settings.buffer_frames, Some(128));
        assert_eq!(settings.sample_rate_hz, Some(48000));
        assert_eq!(settings.periods, Some(3));
    }

    #[test]
    fn test_unknown_fields_when_stream_closed() {
        let (_tmp, probe) = fixture(true, Some("closed\n"));
        let settings = probe.current_settings();
        assert!(settings.active);
        assert_eq!(settings.buffer_frames, None);
        assert_eq!(settings.sample_rate_hz, None);
        assert_eq!(settings.periods, None);
    }

    #[test]
    fn test_missing_card_yields_unknown() {
        let (_tmp, probe) = fixture(true, None);
        let settings = probe.current_settings();
        assert!(settings.active);
        assert_eq!(settings.buffer_frames, None);
    }
}
