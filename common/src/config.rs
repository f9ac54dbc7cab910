use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::led::LedEffect;
use crate::types::RgbColor;

pub const FIRMWARE_NAME: &str = "sensornode";
pub const FIRMWARE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub location: String,
    pub firmware_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: FIRMWARE_NAME.to_string(),
            location: "living_room".to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiProfile {
    pub ssid: String,
    pub password: String,
    #[serde(default = "default_priority")]
    pub priority: u16,
}

fn default_priority() -> u16 {
    999
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub profiles: Vec<WifiProfile>,
    pub connect_timeout_secs: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keepalive_secs: u64,
    pub discovery_enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: String::new(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            keepalive_secs: 60,
            discovery_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub read_interval_secs: u64,
    pub publish_interval_secs: u64,
    pub temp_offset: f32,
    pub humidity_offset: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            read_interval_secs: 10,
            publish_interval_secs: 30,
            temp_offset: 0.0,
            humidity_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub enabled: bool,
    pub count: u8,
    pub brightness: u8,
    pub effect: LedEffect,
    pub color: RgbColor,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 12,
            brightness: 128,
            effect: LedEffect::Solid,
            color: RgbColor::WHITE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    pub enabled: bool,
    pub max_image_bytes: u64,
    pub timeout_secs: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_image_bytes: 4 * 1024 * 1024,
            timeout_secs: 60,
        }
    }
}

/// Policy constants. These shape the boot-loop window, the reconnect
/// backoff curves, and the scheduler cadence; all are tunable at runtime
/// through the normal config-update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub boot_window_secs: i64,
    pub boot_failure_threshold: u32,
    pub boot_success_secs: u64,
    pub tick_ms: u64,
    pub watchdog_budget_ms: u64,
    pub link_backoff_base_ms: u64,
    pub link_backoff_max_ms: u64,
    pub session_backoff_base_ms: u64,
    pub session_backoff_max_ms: u64,
    pub session_connect_timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            boot_window_secs: 60,
            boot_failure_threshold: 3,
            boot_success_secs: 60,
            tick_ms: 100,
            watchdog_budget_ms: 30_000,
            link_backoff_base_ms: 5_000,
            link_backoff_max_ms: 60_000,
            session_backoff_base_ms: 5_000,
            session_backoff_max_ms: 60_000,
            session_connect_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
    pub led: LedConfig,
    pub ota: OtaConfig,
    pub system: SystemConfig,
}

impl NodeConfig {
    /// Apply a partial configuration mapping on top of this one.
    ///
    /// Keys present in `patch` overwrite the corresponding leaves; nested
    /// mappings merge recursively; everything else is untouched.
    pub fn merged_with(&self, patch: &Value) -> Result<NodeConfig, serde_json::Error> {
        let mut base = serde_json::to_value(self)?;
        deep_merge(&mut base, patch);
        let mut merged: NodeConfig = serde_json::from_value(base)?;
        merged.sanitize();
        Ok(merged)
    }

    pub fn sanitize(&mut self) {
        // Stable sort keeps list order as the tie-break for equal priorities.
        self.wifi.profiles.sort_by_key(|profile| profile.priority);
        self.wifi.connect_timeout_secs = self.wifi.connect_timeout_secs.clamp(1, 120);
        self.sensor.read_interval_secs = self.sensor.read_interval_secs.max(1);
        self.sensor.publish_interval_secs = self.sensor.publish_interval_secs.max(1);
        self.led.count = self.led.count.max(1);
        self.system.tick_ms = self.system.tick_ms.clamp(10, 1_000);
        self.system.boot_window_secs = self.system.boot_window_secs.max(1);
        self.system.boot_failure_threshold = self.system.boot_failure_threshold.max(2);
        self.system.boot_success_secs = self.system.boot_success_secs.max(1);
    }
}

/// Recursive merge of `patch` into `base`; non-object values replace.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) if base_value.is_object() && patch_value.is_object() => {
                        deep_merge(base_value, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
