//! System information gathering
//!
//! CPU topology comes from /sys/devices/system/cpu; host details from /proc.
//! Static facts are cached once - only the CPU online mask could plausibly
//! change at runtime and the pools are validated against it at apply time.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::constants::paths;

/// PERFORMANCE: Cache static system info (hostname, kernel, CPU model) - these never change
static CACHED_STATIC_INFO: OnceLock<CachedStaticInfo> = OnceLock::new();

#[derive(Clone)]
struct CachedStaticInfo {
    hostname: String,
    kernel_version: String,
    cpu_model: String,
    cpu_cores: u32,
}

/// Host summary included in DetailedStatus output
#[derive(Debug, Clone)]
pub struct SystemSummary {
    pub hostname: String,
    pub kernel_version: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
}

fn get_cached_static_info() -> &'static CachedStaticInfo {
    CACHED_STATIC_INFO.get_or_init(|| CachedStaticInfo {
        hostname: read_proc_value("/proc/sys/kernel/hostname"),
        kernel_version: read_proc_value("/proc/sys/kernel/osrelease"),
        cpu_model: read_cpu_name(),
        cpu_cores: online_cpus().len() as u32,
    })
}

/// Gather a summary of system hardware and OS information
pub fn get_system_summary() -> SystemSummary {
    let info = get_cached_static_info();
    SystemSummary {
        hostname: info.hostname.clone(),
        kernel_version: info.kernel_version.clone(),
        cpu_model: info.cpu_model.clone(),
        cpu_cores: info.cpu_cores,
    }
}

/// Read a file and return its contents trimmed
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

fn read_proc_value(path: &str) -> String {
    read_trimmed(path).unwrap_or_default()
}

/// Read CPU model name from /proc/cpuinfo
fn read_cpu_name() -> String {
    if let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") {
        for line in cpuinfo.lines() {
            if line.to_ascii_lowercase().starts_with("model name") {
                if let Some((_, model_name)) = line.split_once(':') {
                    return model_name.trim().to_string();
                }
            }
        }
    }
    "Unknown CPU".to_string()
}

/// List the online CPU indices.
///
/// Parses the range list in /sys/devices/system/cpu/online ("0-3,6-7"),
/// falling back to counting cpuN directories when the mask is unreadable.
pub fn online_cpus() -> Vec<usize> {
    online_cpus_from(Path::new(paths::CPU_ONLINE), Path::new(paths::CPU_BASE))
}

/// Range-list parsing split out for tests against fixture trees
pub fn online_cpus_from(online_file: &Path, cpu_base: &Path) -> Vec<usize> {
    if let Ok(mask) = read_trimmed(online_file) {
        let cpus = parse_cpu_list(&mask);
        if !cpus.is_empty() {
            return cpus;
        }
    }

    // Fallback: count cpuN directories
    let mut cpus = Vec::new();
    if let Ok(entries) = fs::read_dir(cpu_base) {
        for ent in entries.flatten() {
            let name = ent.file_name();
            let name = name.to_string_lossy();
            if let Some(idx) = name.strip_prefix("cpu") {
                if !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()) {
                    if let Ok(n) = idx.parse::<usize>() {
                        cpus.push(n);
                    }
                }
            }
        }
    }
    cpus.sort_unstable();
    cpus
}

/// Parse a kernel CPU range list like "0-3,6,8-9"
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                if lo <= hi && hi - lo < 4096 {
                    cpus.extend(lo..=hi);
                }
            }
        } else if let Ok(n) = part.parse::<usize>() {
            cpus.push(n);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}

/// Render a CPU set in the kernel's range-list syntax ("2-3" or "0,2")
pub fn format_cpu_list(cpus: &[usize]) -> String {
    let mut sorted: Vec<usize> = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            end = sorted[i + 1];
            i += 1;
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
        i += 1;
    }
    parts.join(",")
}
