use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor { r: 0, g: 0, b: 0 };
    pub const WHITE: RgbColor = RgbColor { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn scaled(self, brightness: u8) -> Self {
        let factor = brightness as u16;
        Self {
            r: ((self.r as u16 * factor) / 255) as u8,
            g: ((self.g as u16 * factor) / 255) as u8,
            b: ((self.b as u16 * factor) / 255) as u8,
        }
    }
}

/// Periodic state report, published unretained on `<base>/state`.
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    pub temperature: f32,
    pub humidity: f32,
    pub rssi: Option<i32>,
    pub uptime: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Restart,
    ScanWifi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    pub action: CommandAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct WifiScanEntry {
    pub ssid: String,
    pub rssi: i32,
    pub channel: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub networks: Vec<WifiScanEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtaStatusPayload {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Read-only diagnostics served by the failsafe controller.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub device_id: String,
    pub firmware_version: String,
    pub reason: String,
    pub recovery_ssid: String,
    pub flagged_at: i64,
    pub reset_cause: String,
    pub free_memory: u64,
    pub boot_attempts: u32,
}
