use sensornode_common::config::SensorConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
}

/// Environmental sensor seam; `None` means the read failed this cycle.
pub trait SensorDriver: Send {
    fn sample(&mut self) -> Option<Reading>;
}

/// Hardware integration point: replace with an SHT31/DHT22 driver on a real
/// board. The bench driver produces a slow, bounded drift so change-driven
/// publishes actually trigger during local runs.
pub struct HostSensor {
    tick: u64,
}

impl HostSensor {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl SensorDriver for HostSensor {
    fn sample(&mut self) -> Option<Reading> {
        self.tick = self.tick.wrapping_add(1);
        Some(Reading {
            temperature: 21.0 + ((self.tick % 12) as f32 * 0.1),
            humidity: 45.0 + ((self.tick % 8) as f32 * 0.5),
        })
    }
}

/// Apply configured calibration offsets to a raw reading.
pub fn calibrated(reading: Reading, config: &SensorConfig) -> Reading {
    Reading {
        temperature: reading.temperature + config.temp_offset,
        humidity: (reading.humidity + config.humidity_offset).clamp(0.0, 100.0),
    }
}

/// Change thresholds that trigger an immediate publish between the regular
/// reporting intervals.
pub fn is_significant_change(current: Reading, last_published: Reading) -> bool {
    (current.temperature - last_published.temperature).abs() >= 0.5
        || (current.humidity - last_published.humidity).abs() >= 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn offsets_shift_the_reading() {
        let config = SensorConfig {
            temp_offset: -1.5,
            humidity_offset: 3.0,
            ..SensorConfig::default()
        };
        let adjusted = calibrated(
            Reading {
                temperature: 22.0,
                humidity: 50.0,
            },
            &config,
        );
        assert_eq!(adjusted.temperature, 20.5);
        assert_eq!(adjusted.humidity, 53.0);
    }

    #[test]
    fn humidity_is_clamped_to_percent_range() {
        let config = SensorConfig {
            humidity_offset: 10.0,
            ..SensorConfig::default()
        };
        let adjusted = calibrated(
            Reading {
                temperature: 20.0,
                humidity: 95.0,
            },
            &config,
        );
        assert_eq!(adjusted.humidity, 100.0);
    }

    #[test]
    fn small_drift_is_not_significant() {
        let last = Reading {
            temperature: 21.0,
            humidity: 45.0,
        };
        let now = Reading {
            temperature: 21.4,
            humidity: 46.9,
        };
        assert!(!is_significant_change(now, last));
    }

    #[test]
    fn half_degree_jump_is_significant() {
        let last = Reading {
            temperature: 21.0,
            humidity: 45.0,
        };
        let now = Reading {
            temperature: 21.5,
            humidity: 45.0,
        };
        assert!(is_significant_change(now, last));
    }

    #[test]
    fn two_percent_humidity_jump_is_significant() {
        let last = Reading {
            temperature: 21.0,
            humidity: 45.0,
        };
        let now = Reading {
            temperature: 21.0,
            humidity: 47.0,
        };
        assert!(is_significant_change(now, last));
    }
}
