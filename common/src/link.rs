use crate::backoff::RetryBackoff;
use crate::config::WifiProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// What the radio driver reports when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    /// Progress of the association attempt started by the last
    /// [`LinkAction::Associate`].
    pub assoc: AssocStatus,
    /// Health of an established link; only meaningful while Connected.
    pub link_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocStatus {
    Idle,
    InProgress,
    Up,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    /// Start an association attempt against this profile.
    Associate(WifiProfile),
    /// Abandon the in-flight attempt (timeout expiry).
    AbortAssociate,
    Connected { ssid: String },
    Disconnected,
}

/// Reconnect state machine over a ranked profile list.
///
/// One poll per scheduler tick; never blocks. Failures rotate to the next
/// profile (wrapping) and back off exponentially with a cap; an involuntary
/// drop goes straight to Disconnected so the first retry is immediate.
pub struct ConnectivityEngine {
    profiles: Vec<WifiProfile>,
    state: LinkState,
    profile_index: usize,
    attempt_started_ms: u64,
    backoff_until_ms: u64,
    consecutive_failures: u32,
    attempt_timeout_ms: u64,
    backoff: RetryBackoff,
}

impl ConnectivityEngine {
    pub fn new(mut profiles: Vec<WifiProfile>, attempt_timeout_ms: u64, backoff: RetryBackoff) -> Self {
        profiles.sort_by_key(|profile| profile.priority);
        Self {
            profiles,
            state: LinkState::Disconnected,
            profile_index: 0,
            attempt_started_ms: 0,
            backoff_until_ms: 0,
            consecutive_failures: 0,
            attempt_timeout_ms,
            backoff,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn has_profiles(&self) -> bool {
        !self.profiles.is_empty()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn backoff_until_ms(&self) -> u64 {
        self.backoff_until_ms
    }

    pub fn current_profile(&self) -> Option<&WifiProfile> {
        self.profiles.get(self.profile_index)
    }

    pub fn poll(&mut self, now_ms: u64, report: LinkReport) -> Vec<LinkAction> {
        let mut actions = Vec::new();

        match self.state {
            LinkState::Disconnected => {
                if let Some(profile) = self.profiles.get(self.profile_index) {
                    self.state = LinkState::Connecting;
                    self.attempt_started_ms = now_ms;
                    actions.push(LinkAction::Associate(profile.clone()));
                }
                // No profiles: stay Disconnected; provisioning happens over
                // the configuration surface.
            }
            LinkState::Connecting => match report.assoc {
                AssocStatus::Up => {
                    let ssid = self
                        .current_profile()
                        .map(|profile| profile.ssid.clone())
                        .unwrap_or_default();
                    self.state = LinkState::Connected;
                    self.consecutive_failures = 0;
                    actions.push(LinkAction::Connected { ssid });
                }
                AssocStatus::Failed => self.record_failure(now_ms),
                AssocStatus::InProgress | AssocStatus::Idle => {
                    if now_ms.saturating_sub(self.attempt_started_ms) >= self.attempt_timeout_ms {
                        actions.push(LinkAction::AbortAssociate);
                        self.record_failure(now_ms);
                    }
                }
            },
            LinkState::Connected => {
                if !report.link_up {
                    // Involuntary drop: retry immediately, no backoff.
                    self.state = LinkState::Disconnected;
                    actions.push(LinkAction::Disconnected);
                }
            }
            LinkState::Backoff => {
                if now_ms >= self.backoff_until_ms {
                    self.state = LinkState::Disconnected;
                }
            }
        }

        actions
    }

    fn record_failure(&mut self, now_ms: u64) {
        self.consecutive_failures += 1;
        self.backoff_until_ms = now_ms + self.backoff.delay_ms(self.consecutive_failures);
        if !self.profiles.is_empty() {
            self.profile_index = (self.profile_index + 1) % self.profiles.len();
        }
        self.state = LinkState::Backoff;
    }
}
