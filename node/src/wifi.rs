use sensornode_common::{
    config::WifiProfile,
    link::{AssocStatus, LinkReport},
    types::WifiScanEntry,
};
use tracing::debug;

/// Radio seam. The reconnect engine never talks to hardware directly; it
/// emits actions and reads this driver's report once per tick.
pub trait LinkDriver: Send {
    fn begin_associate(&mut self, profile: &WifiProfile);
    fn abort(&mut self);
    fn report(&mut self) -> LinkReport;
    fn rssi(&self) -> Option<i32>;
    fn scan(&mut self) -> Vec<WifiScanEntry>;
}

/// Bench driver backed by an environment list of "reachable" networks
/// (`SENSORNODE_WIFI_SSIDS`, comma separated). Association to a listed SSID
/// succeeds after a short simulated handshake; anything else fails.
pub struct HostLink {
    available: Vec<String>,
    target: Option<String>,
    polls_in_attempt: u32,
    connected_ssid: Option<String>,
}

const HANDSHAKE_POLLS: u32 = 3;

impl HostLink {
    pub fn from_env() -> Self {
        let available = std::env::var("SENSORNODE_WIFI_SSIDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|ssid| !ssid.is_empty())
            .map(str::to_string)
            .collect();
        Self::with_networks(available)
    }

    pub fn with_networks(available: Vec<String>) -> Self {
        Self {
            available,
            target: None,
            polls_in_attempt: 0,
            connected_ssid: None,
        }
    }
}

impl LinkDriver for HostLink {
    fn begin_associate(&mut self, profile: &WifiProfile) {
        debug!(ssid = %profile.ssid, "associating");
        self.target = Some(profile.ssid.clone());
        self.polls_in_attempt = 0;
        self.connected_ssid = None;
    }

    fn abort(&mut self) {
        self.target = None;
        self.polls_in_attempt = 0;
    }

    fn report(&mut self) -> LinkReport {
        if let Some(ssid) = self.connected_ssid.clone() {
            let still_up = self.available.contains(&ssid);
            if !still_up {
                self.connected_ssid = None;
            }
            return LinkReport {
                assoc: AssocStatus::Idle,
                link_up: still_up,
            };
        }

        let Some(target) = self.target.clone() else {
            return LinkReport {
                assoc: AssocStatus::Idle,
                link_up: false,
            };
        };

        self.polls_in_attempt += 1;
        if self.polls_in_attempt < HANDSHAKE_POLLS {
            return LinkReport {
                assoc: AssocStatus::InProgress,
                link_up: false,
            };
        }

        self.target = None;
        if self.available.contains(&target) {
            self.connected_ssid = Some(target);
            LinkReport {
                assoc: AssocStatus::Up,
                link_up: true,
            }
        } else {
            LinkReport {
                assoc: AssocStatus::Failed,
                link_up: false,
            }
        }
    }

    fn rssi(&self) -> Option<i32> {
        self.connected_ssid.as_ref().map(|_| -55)
    }

    fn scan(&mut self) -> Vec<WifiScanEntry> {
        self.available
            .iter()
            .enumerate()
            .map(|(i, ssid)| WifiScanEntry {
                ssid: ssid.clone(),
                rssi: -50 - (i as i32 * 5),
                channel: (1 + (i as u8 % 11)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(ssid: &str) -> WifiProfile {
        WifiProfile {
            ssid: ssid.to_string(),
            password: "pw".to_string(),
            priority: 1,
        }
    }

    #[test]
    fn reachable_network_comes_up_after_the_handshake() {
        let mut link = HostLink::with_networks(vec!["lab".to_string()]);
        link.begin_associate(&profile("lab"));

        assert_eq!(link.report().assoc, AssocStatus::InProgress);
        assert_eq!(link.report().assoc, AssocStatus::InProgress);
        let report = link.report();
        assert_eq!(report.assoc, AssocStatus::Up);
        assert!(report.link_up);
        assert_eq!(link.rssi(), Some(-55));
    }

    #[test]
    fn unreachable_network_fails() {
        let mut link = HostLink::with_networks(vec!["lab".to_string()]);
        link.begin_associate(&profile("nowhere"));

        link.report();
        link.report();
        assert_eq!(link.report().assoc, AssocStatus::Failed);
        assert_eq!(link.rssi(), None);
    }

    #[test]
    fn established_link_drops_when_the_network_disappears() {
        let mut link = HostLink::with_networks(vec!["lab".to_string()]);
        link.begin_associate(&profile("lab"));
        for _ in 0..HANDSHAKE_POLLS {
            link.report();
        }

        link.available.clear();
        let report = link.report();
        assert!(!report.link_up);
    }

    #[test]
    fn scan_lists_every_reachable_network() {
        let mut link = HostLink::with_networks(vec!["a".to_string(), "b".to_string()]);
        let entries = link.scan();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ssid, "a");
        assert!(entries[0].rssi > entries[1].rssi);
    }
}
