//! Device presence detection
//!
//! Two independent probes, OR'd together: the ALSA card table registered by
//! the driver, and the raw USB bus device tree. Either alone is enough; a
//! missing enumeration path (sandboxed environment, driver not loaded yet)
//! reads as "not found", never as an error.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::paths;
use crate::settings::DeviceIdentity;
use crate::system::read_trimmed;

/// Answers "is the target device attached". No side effects.
#[derive(Debug, Clone)]
pub struct PresenceDetector {
    identity: DeviceIdentity,
    asound_cards: PathBuf,
    usb_root: PathBuf,
}

impl PresenceDetector {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            asound_cards: PathBuf::from(paths::ASOUND_CARDS),
            usb_root: PathBuf::from(paths::USB_DEVICES),
        }
    }

    /// Probe against fixture trees instead of the live system
    pub fn with_roots(identity: DeviceIdentity, asound_cards: &Path, usb_root: &Path) -> Self {
        Self {
            identity,
            asound_cards: asound_cards.to_path_buf(),
            usb_root: usb_root.to_path_buf(),
        }
    }

    /// True when either probe finds the device. Short-circuits on the first hit.
    pub fn is_present(&self) -> bool {
        self.card_registered() || self.on_usb_bus()
    }

    /// Probe 1: driver-registered sound card whose line carries the label
    fn card_registered(&self) -> bool {
        if self.identity.card_label.is_empty() {
            return false;
        }
        let cards = match fs::read_to_string(&self.asound_cards) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let needle = self.identity.card_label.to_ascii_lowercase();
        cards
            .lines()
            .any(|line| line.to_ascii_lowercase().contains(&needle))
    }

    /// Probe 2: USB bus device tree with matching vendor/product IDs
    fn on_usb_bus(&self) -> bool {
        if self.identity.vendor_id.is_empty() || self.identity.product_id.is_empty() {
            return false;
        }
        let entries = match fs::read_dir(&self.usb_root) {
            Ok(e) => e,
            Err(_) => return false,
        };
        for ent in entries.flatten() {
            let dir = ent.path();
            let vendor = match read_trimmed(dir.join("idVendor")) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if !vendor.eq_ignore_ascii_case(&self.identity.vendor_id) {
                continue;
            }
            if let Ok(product) = read_trimmed(dir.join("idProduct")) {
                if product.eq_ignore_ascii_case(&self.identity.product_id) {
                    debug!(device = %dir.display(), "Device found on USB bus");
                    return true;
                }
            }
        }
        false
    }

    /// sysfs directories of the matching USB device(s); used by the
    /// optimizer for the per-device power policy targets.
    pub fn usb_device_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let entries = match fs::read_dir(&self.usb_root) {
            Ok(e) => e,
            Err(_) => return dirs,
        };
        for ent in entries.flatten() {
            let dir = ent.path();
            let vendor = match read_trimmed(dir.join("idVendor")) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let product = match read_trimmed(dir.join("idProduct")) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if vendor.eq_ignore_ascii_case(&self.identity.vendor_id)
                && product.eq_ignore_ascii_case(&self.identity.product_id)
            {
                dirs.push(dir);
            }
        }
        dirs
    }
}
