use serde_json::{json, Value};

use crate::config::{FIRMWARE_NAME, FIRMWARE_VERSION};
use crate::topics::Topics;

/// Identity block shared by every discovery payload so Home Assistant groups
/// all entities under one device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
}

impl DeviceInfo {
    fn as_json(&self) -> Value {
        json!({
            "identifiers": [self.device_id],
            "name": self.name,
            "model": FIRMWARE_NAME,
            "sw_version": FIRMWARE_VERSION,
        })
    }
}

/// Discovery announcements, published retained after each broker connect.
/// Returns `(topic, payload)` pairs for the four sensors and the ring light.
pub fn discovery_messages(topics: &Topics, device: &DeviceInfo) -> Vec<(String, Value)> {
    let availability = topics.status();
    let state = topics.state();
    let device_json = device.as_json();

    let sensor = |kind: &str, name: &str, extra: Value| {
        let mut payload = json!({
            "name": format!("{} {name}", device.name),
            "unique_id": format!("{}_{kind}", device.device_id),
            "state_topic": state.clone(),
            "value_template": format!("{{{{ value_json.{kind} }}}}"),
            "availability_topic": availability.clone(),
            "device": device_json.clone(),
        });
        if let (Value::Object(map), Value::Object(extra)) = (&mut payload, extra) {
            map.extend(extra);
        }
        (
            format!("homeassistant/sensor/{}_{kind}/config", device.device_id),
            payload,
        )
    };

    let mut messages = vec![
        sensor(
            "temperature",
            "Temperature",
            json!({
                "device_class": "temperature",
                "unit_of_measurement": "\u{b0}C",
                "state_class": "measurement",
            }),
        ),
        sensor(
            "humidity",
            "Humidity",
            json!({
                "device_class": "humidity",
                "unit_of_measurement": "%",
                "state_class": "measurement",
            }),
        ),
        sensor(
            "rssi",
            "Signal",
            json!({
                "device_class": "signal_strength",
                "unit_of_measurement": "dBm",
                "entity_category": "diagnostic",
            }),
        ),
        sensor(
            "uptime",
            "Uptime",
            json!({
                "unit_of_measurement": "s",
                "entity_category": "diagnostic",
            }),
        ),
    ];

    messages.push((
        format!("homeassistant/light/{}_led/config", device.device_id),
        json!({
            "name": format!("{} LED Ring", device.name),
            "unique_id": format!("{}_led", device.device_id),
            "schema": "json",
            "command_topic": topics.led_command(),
            "state_topic": topics.led_state(),
            "availability_topic": availability,
            "brightness": true,
            "supported_color_modes": ["rgb"],
            "effect": true,
            "effect_list": [
                "solid",
                "rainbow",
                "breathing",
                "blink",
                "humidity_gauge",
                "temperature_gauge",
            ],
            "device": device_json.clone(),
        }),
    ));

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (Topics, DeviceInfo) {
        (
            Topics::new("lab", "node01"),
            DeviceInfo {
                device_id: "node01".to_string(),
                name: "Lab Node".to_string(),
            },
        )
    }

    #[test]
    fn announces_four_sensors_and_one_light() {
        let (topics, device) = setup();
        let messages = discovery_messages(&topics, &device);

        let topic_names: Vec<&str> = messages.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topic_names,
            vec![
                "homeassistant/sensor/node01_temperature/config",
                "homeassistant/sensor/node01_humidity/config",
                "homeassistant/sensor/node01_rssi/config",
                "homeassistant/sensor/node01_uptime/config",
                "homeassistant/light/node01_led/config",
            ]
        );
    }

    #[test]
    fn sensors_point_at_the_state_topic_with_availability() {
        let (topics, device) = setup();
        let messages = discovery_messages(&topics, &device);
        let (_, payload) = &messages[0];

        assert_eq!(payload["state_topic"], "home/lab/node01/state");
        assert_eq!(payload["availability_topic"], "home/lab/node01/status");
        assert_eq!(
            payload["value_template"],
            "{{ value_json.temperature }}"
        );
        assert_eq!(payload["device"]["identifiers"][0], "node01");
    }

    #[test]
    fn light_uses_the_json_schema_over_the_led_topics() {
        let (topics, device) = setup();
        let messages = discovery_messages(&topics, &device);
        let (_, payload) = messages.last().unwrap();

        assert_eq!(payload["schema"], "json");
        assert_eq!(payload["command_topic"], "home/lab/node01/led/command");
        assert_eq!(payload["state_topic"], "home/lab/node01/led/state");
        assert_eq!(payload["effect_list"][4], "humidity_gauge");
    }
}
