//! Stereo pan parameter and equal-power pan law.

use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Single-slot, last-value-wins pan parameter shared between the render
/// loop (writer) and the mixer node (reader).
///
/// Values are clamped to `[-1.0, 1.0]` on write.
#[derive(Debug, Clone, Default)]
pub struct PanHandle {
    bits: Arc<AtomicU32>,
}

impl PanHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pan: f32) {
        let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
        self.bits.store(pan.to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Equal-power gains `(left, right)` for `pan` in `[-1, 1]`.
#[inline]
pub fn equal_power_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Positions of the left and right input channels for a stereo `pan`.
///
/// At centre the channels stay hard left and hard right. Moving towards one
/// side slides the far channel across until both sit on that side.
#[inline]
pub fn stereo_positions(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    ((2.0 * pan - 1.0).max(-1.0), (2.0 * pan + 1.0).min(1.0))
}

/// Move a stereo block to `pan`, keeping its width at centre.
///
/// Each input channel is placed with the equal-power law at its own
/// position from [`stereo_positions`].
pub fn pan_stereo(left: &mut [f32], right: &mut [f32], pan: f32) {
    let (pos_l, pos_r) = stereo_positions(pan);
    let (ll, lr) = equal_power_gains(pos_l);
    let (rl, rr) = equal_power_gains(pos_r);
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let (in_l, in_r) = (*l, *r);
        *l = in_l * ll + in_r * rl;
        *r = in_l * lr + in_r * rr;
    }
}
