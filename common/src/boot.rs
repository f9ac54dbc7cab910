use serde::{Deserialize, Serialize};

/// Persisted boot accounting. Mutated at exactly two points: the pre-startup
/// increment in [`register_boot`] and the post-success reset in
/// [`mark_success`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootJournal {
    pub attempt_count: u32,
    pub window_start: i64,
    pub failsafe_active: bool,
}

impl BootJournal {
    pub fn first_boot(now_s: i64) -> Self {
        Self {
            attempt_count: 0,
            window_start: now_s,
            failsafe_active: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BootPolicy {
    pub window_secs: i64,
    pub failure_threshold: u32,
    pub success_uptime_secs: u64,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            window_secs: 60,
            failure_threshold: 3,
            success_uptime_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeReason {
    BootLoop,
    ManualMarker,
}

impl FailsafeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BootLoop => "boot_loop",
            Self::ManualMarker => "manual_marker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    Normal,
    Failsafe(FailsafeReason),
}

/// Account for one power-on and decide the startup mode.
///
/// The caller must persist the journal immediately after this returns and
/// before any network activity (durable increment-before-use).
pub fn register_boot(
    journal: &mut BootJournal,
    now_s: i64,
    manual_marker: bool,
    policy: &BootPolicy,
) -> BootDecision {
    if now_s.saturating_sub(journal.window_start) > policy.window_secs {
        journal.attempt_count = 0;
        journal.window_start = now_s;
    }
    journal.attempt_count += 1;

    if manual_marker {
        journal.failsafe_active = true;
        return BootDecision::Failsafe(FailsafeReason::ManualMarker);
    }
    // A standing determination is sticky: window expiry restarts the counter
    // but only mark_success or an operator reset clears the flag.
    if journal.failsafe_active || journal.attempt_count >= policy.failure_threshold {
        journal.failsafe_active = true;
        return BootDecision::Failsafe(FailsafeReason::BootLoop);
    }
    BootDecision::Normal
}

/// The organic exit from a boot-loop determination: called once the device
/// has stayed up past the success threshold.
pub fn mark_success(journal: &mut BootJournal) {
    journal.attempt_count = 0;
    journal.failsafe_active = false;
}
