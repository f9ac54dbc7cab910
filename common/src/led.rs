use serde::{Deserialize, Serialize};

use crate::config::LedConfig;
use crate::types::RgbColor;

pub const STATE_ON: &str = "ON";
pub const STATE_OFF: &str = "OFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedEffect {
    Solid,
    Rainbow,
    Breathing,
    Blink,
    HumidityGauge,
    TemperatureGauge,
}

impl LedEffect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solid => "solid",
            Self::Rainbow => "rainbow",
            Self::Breathing => "breathing",
            Self::Blink => "blink",
            Self::HumidityGauge => "humidity_gauge",
            Self::TemperatureGauge => "temperature_gauge",
        }
    }
}

/// Inbound payload on `<base>/led/command`. Every field is optional;
/// unnamed fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedCommand {
    pub state: Option<String>,
    pub brightness: Option<u8>,
    pub color: Option<RgbColor>,
    pub effect: Option<LedEffect>,
}

/// Retained payload on `<base>/led/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedStatePayload {
    pub state: &'static str,
    pub brightness: u8,
    pub color: RgbColor,
    pub effect: &'static str,
}

/// Connectivity states the ring signals regardless of the configured effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOverride {
    LinkDown,
    BrokerDown,
    Failsafe,
}

impl StatusOverride {
    fn color(self) -> RgbColor {
        match self {
            Self::LinkDown => RgbColor { r: 0, g: 0, b: 255 },
            Self::BrokerDown => RgbColor { r: 255, g: 180, b: 0 },
            Self::Failsafe => RgbColor { r: 255, g: 0, b: 0 },
        }
    }
}

/// Frame-by-frame ring renderer. One `render` call per animation tick; the
/// frame counter drives the moving effects so the renderer itself stays
/// stateless between reconfigurations.
pub struct LedStrip {
    on: bool,
    brightness: u8,
    color: RgbColor,
    effect: LedEffect,
    frame: u32,
    humidity: Option<f64>,
    temperature: Option<f64>,
    status: Option<StatusOverride>,
}

impl LedStrip {
    pub fn from_config(config: &LedConfig) -> Self {
        Self {
            on: config.enabled,
            brightness: config.brightness,
            color: config.color,
            effect: config.effect,
            frame: 0,
            humidity: None,
            temperature: None,
            status: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn apply_command(&mut self, command: &LedCommand) {
        if let Some(state) = command.state.as_deref() {
            self.on = state.eq_ignore_ascii_case(STATE_ON);
        }
        if let Some(brightness) = command.brightness {
            self.brightness = brightness;
        }
        if let Some(color) = command.color {
            self.color = color;
        }
        if let Some(effect) = command.effect {
            self.effect = effect;
        }
    }

    /// Latest sensor readings for the gauge effects.
    pub fn set_gauge_data(&mut self, temperature: Option<f64>, humidity: Option<f64>) {
        self.temperature = temperature;
        self.humidity = humidity;
    }

    pub fn set_status(&mut self, status: Option<StatusOverride>) {
        self.status = status;
    }

    pub fn state_payload(&self) -> LedStatePayload {
        LedStatePayload {
            state: if self.on { STATE_ON } else { STATE_OFF },
            brightness: self.brightness,
            color: self.color,
            effect: self.effect.as_str(),
        }
    }

    /// Produce the next frame for a ring of `count` pixels.
    pub fn render(&mut self, count: usize) -> Vec<RgbColor> {
        let frame = self.frame;
        self.frame = self.frame.wrapping_add(1);

        if let Some(status) = self.status {
            return blink_frame(status.color().scaled(self.brightness), frame, count);
        }
        if !self.on {
            return vec![RgbColor::BLACK; count];
        }

        let color = self.color.scaled(self.brightness);
        match self.effect {
            LedEffect::Solid => vec![color; count],
            LedEffect::Blink => blink_frame(color, frame, count),
            LedEffect::Rainbow => (0..count)
                .map(|i| {
                    let pos = (i * 256 / count.max(1) + frame as usize * 4) % 256;
                    wheel(pos as u8).scaled(self.brightness)
                })
                .collect(),
            LedEffect::Breathing => {
                // Full sine period every 60 frames.
                let phase = (frame % 60) as f64 / 60.0 * std::f64::consts::TAU;
                let level = (phase.sin() + 1.0) / 2.0;
                let breathed = self.color.scaled((level * self.brightness as f64) as u8);
                vec![breathed; count]
            }
            LedEffect::HumidityGauge => {
                let fill = self.humidity.map(|h| h / 100.0).unwrap_or(0.0);
                gauge_frame(
                    fill,
                    RgbColor { r: 0, g: 120, b: 255 }.scaled(self.brightness),
                    count,
                )
            }
            LedEffect::TemperatureGauge => {
                // 0..40 C mapped onto the ring, cold blue through hot red.
                let temp = self.temperature.unwrap_or(0.0).clamp(0.0, 40.0);
                let fill = temp / 40.0;
                let hot = (fill * 255.0) as u8;
                let color = RgbColor {
                    r: hot,
                    g: 0,
                    b: 255 - hot,
                }
                .scaled(self.brightness);
                gauge_frame(fill, color, count)
            }
        }
    }
}

/// Classic 256-position color wheel: red to green to blue and back.
pub fn wheel(pos: u8) -> RgbColor {
    match pos {
        0..=84 => RgbColor {
            r: 255 - pos * 3,
            g: pos * 3,
            b: 0,
        },
        85..=169 => {
            let pos = pos - 85;
            RgbColor {
                r: 0,
                g: 255 - pos * 3,
                b: pos * 3,
            }
        }
        _ => {
            let pos = pos - 170;
            RgbColor {
                r: pos * 3,
                g: 0,
                b: 255 - pos * 3,
            }
        }
    }
}

// 5 frames on, 5 frames off.
fn blink_frame(color: RgbColor, frame: u32, count: usize) -> Vec<RgbColor> {
    if frame % 10 < 5 {
        vec![color; count]
    } else {
        vec![RgbColor::BLACK; count]
    }
}

fn gauge_frame(fill: f64, color: RgbColor, count: usize) -> Vec<RgbColor> {
    let lit = (fill.clamp(0.0, 1.0) * count as f64).round() as usize;
    (0..count)
        .map(|i| if i < lit { color } else { RgbColor::BLACK })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strip() -> LedStrip {
        let mut config = LedConfig::default();
        config.enabled = true;
        config.brightness = 255;
        config.color = RgbColor { r: 255, g: 0, b: 0 };
        LedStrip::from_config(&config)
    }

    #[test]
    fn solid_fills_every_pixel() {
        let mut strip = strip();
        let frame = strip.render(12);
        assert_eq!(frame.len(), 12);
        assert!(frame.iter().all(|&p| p == RgbColor { r: 255, g: 0, b: 0 }));
    }

    #[test]
    fn off_renders_black_without_an_override() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            state: Some("OFF".to_string()),
            ..LedCommand::default()
        });
        let frame = strip.render(12);
        assert!(frame.iter().all(|&p| p == RgbColor::BLACK));
    }

    #[test]
    fn blink_alternates_in_five_frame_bursts() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            effect: Some(LedEffect::Blink),
            ..LedCommand::default()
        });

        let mut lit = Vec::new();
        for _ in 0..20 {
            let frame = strip.render(4);
            lit.push(frame[0] != RgbColor::BLACK);
        }
        let expected: Vec<bool> = (0..20).map(|f| f % 10 < 5).collect();
        assert_eq!(lit, expected);
    }

    #[test]
    fn status_override_wins_even_when_off() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            state: Some("OFF".to_string()),
            ..LedCommand::default()
        });
        strip.set_status(Some(StatusOverride::Failsafe));

        let frame = strip.render(4);
        assert_eq!(frame[0], RgbColor { r: 255, g: 0, b: 0 });
    }

    #[test]
    fn humidity_gauge_lights_proportionally() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            effect: Some(LedEffect::HumidityGauge),
            ..LedCommand::default()
        });
        strip.set_gauge_data(None, Some(50.0));

        let frame = strip.render(12);
        let lit = frame.iter().filter(|&&p| p != RgbColor::BLACK).count();
        assert_eq!(lit, 6);
    }

    #[test]
    fn brightness_scales_the_output() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            brightness: Some(128),
            ..LedCommand::default()
        });
        let frame = strip.render(1);
        assert_eq!(frame[0].r, 128);
    }

    #[test]
    fn command_updates_are_reflected_in_the_state_payload() {
        let mut strip = strip();
        strip.apply_command(&LedCommand {
            state: Some("ON".to_string()),
            brightness: Some(64),
            color: Some(RgbColor { r: 1, g: 2, b: 3 }),
            effect: Some(LedEffect::Rainbow),
        });

        let payload = strip.state_payload();
        assert_eq!(payload.state, "ON");
        assert_eq!(payload.brightness, 64);
        assert_eq!(payload.color, RgbColor { r: 1, g: 2, b: 3 });
        assert_eq!(payload.effect, "rainbow");
    }

    #[test]
    fn wheel_endpoints_are_pure_colors() {
        assert_eq!(wheel(0), RgbColor { r: 255, g: 0, b: 0 });
        assert_eq!(wheel(85), RgbColor { r: 0, g: 255, b: 0 });
        assert_eq!(wheel(170), RgbColor { r: 0, g: 0, b: 255 });
    }
}
