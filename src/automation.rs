//! Pan automation: the slow left/right rotation of the 8D effect.

use std::f64::consts::TAU;

/// `pan(clock) = sin(2π · f · clock / sample_rate)`.
///
/// The clock is reduced modulo one rotation period before the phase is
/// formed, so precision does not degrade on long renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanAutomation {
    rotation_hz: f64,
    sample_rate: f64,
}

impl PanAutomation {
    pub fn new(rotation_hz: f64, sample_rate: f64) -> Self {
        Self {
            rotation_hz,
            sample_rate,
        }
    }

    /// Frames in one full rotation, or `None` when the rotation is stopped.
    pub fn period_frames(&self) -> Option<f64> {
        (self.rotation_hz > 0.0 && self.sample_rate > 0.0)
            .then(|| self.sample_rate / self.rotation_hz)
    }

    /// Pan position in `[-1, 1]` at `clock` frames into the render.
    pub fn pan_at(&self, clock: u64) -> f32 {
        let Some(period) = self.period_frames() else {
            return 0.0;
        };
        let reduced = (clock as f64) % period;
        let value = (TAU * reduced / period).sin();
        (value as f32).clamp(-1.0, 1.0)
    }
}
