use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Instant,
};

use sha2::{Digest, Sha256};
use tracing::warn;

/// Exit status the supervisor treats as "reboot me". A plain zero exit is a
/// shutdown; anything else is a crash that counts against the boot window.
pub const REBOOT_EXIT_CODE: i32 = 86;

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Stable per-device identifier: overridable for fleets, otherwise derived
/// from the hostname so the same machine always claims the same topics.
pub fn device_id() -> String {
    if let Ok(id) = std::env::var("SENSORNODE_DEVICE_ID") {
        if !id.is_empty() {
            return id;
        }
    }
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "sensornode-host".to_string());
    let digest = Sha256::digest(hostname.as_bytes());
    digest[..4].iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn reset_cause() -> String {
    std::env::var("SENSORNODE_RESET_CAUSE").unwrap_or_else(|_| "power_on".to_string())
}

/// Best-effort free memory reading for diagnostics.
pub fn free_memory_bytes() -> u64 {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

/// On-disk layout under one data directory: configuration, boot accounting,
/// the manual recovery marker, and the firmware image slots.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn from_env() -> Self {
        let root = std::env::var("SENSORNODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.sensornode"));
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn config_backup(&self) -> PathBuf {
        self.root.join("config.json.bak")
    }

    pub fn config_temp(&self) -> PathBuf {
        self.root.join("config.json.tmp")
    }

    pub fn boot_journal(&self) -> PathBuf {
        self.root.join("boot.json")
    }

    /// Presence of this file forces recovery mode on the next boot.
    pub fn failsafe_marker(&self) -> PathBuf {
        self.root.join("failsafe.flag")
    }

    pub fn firmware(&self) -> PathBuf {
        self.root.join("firmware.bin")
    }

    pub fn firmware_backup(&self) -> PathBuf {
        self.root.join("firmware.bin.bak")
    }

    pub fn firmware_staging(&self) -> PathBuf {
        self.root.join("firmware.tmp")
    }
}

/// Soft watchdog: the tick loop pets it once per iteration, and a gap past
/// the budget is loud in the logs. On the bench this only observes; a
/// hardware build wires the same call to the real timer.
pub struct Watchdog {
    budget_ms: u64,
    last_pet_ms: Option<u64>,
}

impl Watchdog {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget_ms,
            last_pet_ms: None,
        }
    }

    pub fn pet(&mut self, now_ms: u64) {
        if let Some(last) = self.last_pet_ms {
            let gap = now_ms.saturating_sub(last);
            if gap > self.budget_ms {
                warn!("watchdog budget exceeded: {gap}ms since last pet (budget {}ms)", self.budget_ms);
            }
        }
        self.last_pet_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn data_dir_paths_share_the_root() {
        let dir = DataDir::at("/tmp/node-data");
        assert_eq!(dir.config(), Path::new("/tmp/node-data/config.json"));
        assert_eq!(
            dir.firmware_backup(),
            Path::new("/tmp/node-data/firmware.bin.bak")
        );
        assert_eq!(
            dir.failsafe_marker(),
            Path::new("/tmp/node-data/failsafe.flag")
        );
    }

    #[test]
    fn device_id_is_stable_and_nonempty() {
        let a = device_id();
        let b = device_id();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
