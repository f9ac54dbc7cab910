use crate::backoff::RetryBackoff;
use crate::topics::Topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Transport-level view of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerReport {
    Down,
    Connecting,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the transport: connect with the retained "offline" last-will
    /// registered on the availability topic, then authenticate.
    Open,
    Close,
    /// (Re)issue the command/config/led/ota subscriptions.
    Resubscribe,
    /// Publish the retained "online" marker on the availability topic.
    AnnounceOnline,
}

/// Broker session state machine. Independent from the link machine, but may
/// only attempt Connecting while the link is Connected; a link drop forces
/// Disconnected immediately.
pub struct SessionEngine {
    state: SessionState,
    consecutive_failures: u32,
    backoff_until_ms: u64,
    attempt_started_ms: u64,
    attempt_timeout_ms: u64,
    backoff: RetryBackoff,
}

impl SessionEngine {
    pub fn new(attempt_timeout_ms: u64, backoff: RetryBackoff) -> Self {
        Self {
            state: SessionState::Disconnected,
            consecutive_failures: 0,
            backoff_until_ms: 0,
            attempt_started_ms: 0,
            attempt_timeout_ms,
            backoff,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn backoff_until_ms(&self) -> u64 {
        self.backoff_until_ms
    }

    pub fn poll(
        &mut self,
        now_ms: u64,
        link_connected: bool,
        report: BrokerReport,
    ) -> Vec<SessionAction> {
        if !link_connected {
            if self.state != SessionState::Disconnected {
                self.state = SessionState::Disconnected;
                return vec![SessionAction::Close];
            }
            return Vec::new();
        }

        match self.state {
            SessionState::Disconnected => {
                self.state = SessionState::Connecting;
                self.attempt_started_ms = now_ms;
                vec![SessionAction::Open]
            }
            SessionState::Connecting => match report {
                BrokerReport::Up => {
                    self.state = SessionState::Connected;
                    self.consecutive_failures = 0;
                    vec![SessionAction::Resubscribe, SessionAction::AnnounceOnline]
                }
                BrokerReport::Down => {
                    self.record_failure(now_ms);
                    vec![SessionAction::Close]
                }
                BrokerReport::Connecting => {
                    if now_ms.saturating_sub(self.attempt_started_ms) >= self.attempt_timeout_ms {
                        self.record_failure(now_ms);
                        vec![SessionAction::Close]
                    } else {
                        Vec::new()
                    }
                }
            },
            SessionState::Connected => {
                if report == BrokerReport::Down {
                    self.record_failure(now_ms);
                    vec![SessionAction::Close]
                } else {
                    Vec::new()
                }
            }
            SessionState::Backoff => {
                if now_ms >= self.backoff_until_ms {
                    self.state = SessionState::Disconnected;
                }
                Vec::new()
            }
        }
    }

    fn record_failure(&mut self, now_ms: u64) {
        self.consecutive_failures += 1;
        self.backoff_until_ms = now_ms + self.backoff.delay_ms(self.consecutive_failures);
        self.state = SessionState::Backoff;
    }
}

/// Message kinds the node reacts to, resolved by exact topic match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Command,
    ConfigUpdate,
    LedCommand,
    OtaRequest,
}

/// Fixed topic-to-handler mapping, registered at startup. Unmatched topics
/// are ignored, not errors.
pub fn classify(topics: &Topics, topic: &str) -> Option<Inbound> {
    if topic == topics.command() {
        Some(Inbound::Command)
    } else if topic == topics.config() {
        Some(Inbound::ConfigUpdate)
    } else if topic == topics.led_command() {
        Some(Inbound::LedCommand)
    } else if topic == topics.ota() {
        Some(Inbound::OtaRequest)
    } else {
        None
    }
}
