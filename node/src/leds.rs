use sensornode_common::types::RgbColor;
use tracing::trace;

/// Pixel output seam; a hardware build drives the WS2812 chain here.
pub trait LedOutput: Send {
    fn write(&mut self, frame: &[RgbColor]);
}

/// Bench output: logs only when the frame actually changes so animated
/// effects do not flood the trace log.
pub struct HostLedOutput {
    last_frame: Vec<RgbColor>,
}

impl HostLedOutput {
    pub fn new() -> Self {
        Self {
            last_frame: Vec::new(),
        }
    }
}

impl LedOutput for HostLedOutput {
    fn write(&mut self, frame: &[RgbColor]) {
        if frame == self.last_frame.as_slice() {
            return;
        }
        self.last_frame = frame.to_vec();
        if let Some(first) = frame.first() {
            trace!(
                pixels = frame.len(),
                r = first.r,
                g = first.g,
                b = first.b,
                "led frame"
            );
        }
    }
}
