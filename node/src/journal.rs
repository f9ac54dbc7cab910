use std::{fs, io::ErrorKind};

use anyhow::Context;
use tracing::{info, warn};

use sensornode_common::{
    boot::{self, BootDecision, BootJournal, BootPolicy},
    config::SystemConfig,
};

use crate::platform::DataDir;

/// Owns the persisted boot journal and the manual recovery marker.
///
/// Ordering is the whole point: the attempt is counted and flushed to disk
/// before the runtime touches the network, so a crash anywhere later still
/// leaves an accurate count for the next boot.
#[derive(Clone)]
pub struct BootManager {
    dir: DataDir,
    policy: BootPolicy,
}

impl BootManager {
    pub fn new(dir: DataDir, system: &SystemConfig) -> Self {
        Self {
            dir,
            policy: BootPolicy {
                window_secs: system.boot_window_secs,
                failure_threshold: system.boot_failure_threshold,
                success_uptime_secs: system.boot_success_secs,
            },
        }
    }

    pub fn policy(&self) -> &BootPolicy {
        &self.policy
    }

    /// Count this power-on, persist, and decide the startup mode.
    pub fn register_boot(&self, now_s: i64) -> anyhow::Result<(BootDecision, BootJournal)> {
        let mut journal = self.load_journal(now_s);
        let manual_marker = self.dir.failsafe_marker().exists();

        let decision = boot::register_boot(&mut journal, now_s, manual_marker, &self.policy);
        self.persist(&journal)
            .context("failed to persist boot journal")?;

        match decision {
            BootDecision::Normal => {
                info!(attempt = journal.attempt_count, "boot registered");
            }
            BootDecision::Failsafe(reason) => {
                warn!(
                    attempt = journal.attempt_count,
                    reason = reason.as_str(),
                    "entering failsafe mode"
                );
            }
        }
        Ok((decision, journal))
    }

    /// Called once the node has stayed up past the success threshold.
    pub fn mark_success(&self, journal: &mut BootJournal) -> anyhow::Result<()> {
        boot::mark_success(journal);
        self.persist(journal)?;
        self.clear_marker()?;
        info!("boot marked successful, failure counter reset");
        Ok(())
    }

    /// Operator reset from the recovery surface: forget the loop entirely.
    pub fn reset(&self, now_s: i64) -> anyhow::Result<BootJournal> {
        let journal = BootJournal::first_boot(now_s);
        self.persist(&journal)?;
        self.clear_marker()?;
        Ok(journal)
    }

    pub fn request_failsafe(&self) -> anyhow::Result<()> {
        fs::create_dir_all(self.dir.root())?;
        fs::write(self.dir.failsafe_marker(), b"requested\n")?;
        Ok(())
    }

    fn load_journal(&self, now_s: i64) -> BootJournal {
        match fs::read(self.dir.boot_journal()) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!("boot journal corrupt, starting fresh: {err}");
                BootJournal::first_boot(now_s)
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => BootJournal::first_boot(now_s),
            Err(err) => {
                warn!("boot journal unreadable, starting fresh: {err}");
                BootJournal::first_boot(now_s)
            }
        }
    }

    fn persist(&self, journal: &BootJournal) -> anyhow::Result<()> {
        fs::create_dir_all(self.dir.root())?;
        let payload = serde_json::to_vec_pretty(journal)?;
        let temp = self.dir.boot_journal().with_extension("json.tmp");
        {
            use std::io::Write;
            let mut file = fs::File::create(&temp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.dir.boot_journal())?;
        Ok(())
    }

    fn clear_marker(&self) -> anyhow::Result<()> {
        match fs::remove_file(self.dir.failsafe_marker()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sensornode_common::boot::FailsafeReason;
    use tempfile::TempDir;

    fn manager() -> (TempDir, BootManager) {
        let tmp = TempDir::new().unwrap();
        let manager = BootManager::new(DataDir::at(tmp.path()), &SystemConfig::default());
        (tmp, manager)
    }

    #[test]
    fn rapid_reboots_cross_into_failsafe() {
        let (_tmp, manager) = manager();

        let (first, _) = manager.register_boot(100).unwrap();
        assert_eq!(first, BootDecision::Normal);
        let (second, _) = manager.register_boot(110).unwrap();
        assert_eq!(second, BootDecision::Normal);
        let (third, _) = manager.register_boot(120).unwrap();
        assert_eq!(third, BootDecision::Failsafe(FailsafeReason::BootLoop));
    }

    #[test]
    fn counter_survives_process_restarts() {
        let (tmp, manager) = manager();
        manager.register_boot(100).unwrap();
        drop(manager);

        // A fresh manager over the same directory sees the stored attempt.
        let manager = BootManager::new(DataDir::at(tmp.path()), &SystemConfig::default());
        let (_, journal) = manager.register_boot(110).unwrap();
        assert_eq!(journal.attempt_count, 2);
    }

    #[test]
    fn manual_marker_forces_failsafe_on_next_boot() {
        let (_tmp, manager) = manager();
        manager.request_failsafe().unwrap();

        let (decision, _) = manager.register_boot(100).unwrap();
        assert_eq!(decision, BootDecision::Failsafe(FailsafeReason::ManualMarker));
    }

    #[test]
    fn mark_success_resets_and_clears_the_marker() {
        let (tmp, manager) = manager();
        manager.request_failsafe().unwrap();
        let (_, mut journal) = manager.register_boot(100).unwrap();

        manager.mark_success(&mut journal).unwrap();
        assert_eq!(journal.attempt_count, 0);
        assert!(!journal.failsafe_active);
        assert!(!tmp.path().join("failsafe.flag").exists());

        let (decision, _) = manager.register_boot(200).unwrap();
        assert_eq!(decision, BootDecision::Normal);
    }

    #[test]
    fn corrupt_journal_starts_fresh_instead_of_wedging() {
        let (tmp, manager) = manager();
        fs::create_dir_all(tmp.path()).unwrap();
        fs::write(tmp.path().join("boot.json"), b"]]not json").unwrap();

        let (decision, journal) = manager.register_boot(100).unwrap();
        assert_eq!(decision, BootDecision::Normal);
        assert_eq!(journal.attempt_count, 1);
    }

    #[test]
    fn operator_reset_forgets_the_loop() {
        let (_tmp, manager) = manager();
        for t in [100, 101, 102] {
            manager.register_boot(t).unwrap();
        }

        manager.reset(103).unwrap();
        let (decision, journal) = manager.register_boot(104).unwrap();
        assert_eq!(decision, BootDecision::Normal);
        assert_eq!(journal.attempt_count, 1);
    }
}
