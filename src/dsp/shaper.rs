//! Waveshaping distortion.
//!
//! Transfer function `y = (1 + k) x / (1 + k |x|)` with `k = amount * 50`.
//! At amount 0 the curve is the identity; as `k` grows it bends toward a
//! hard knee while keeping `f(±1) = ±1`, so full-scale input stays full-scale.

use crate::params::DISTORTION;

/// Drive multiplier applied to the [0, 1] amount.
const DRIVE_SCALE: f64 = 50.0;

#[inline]
pub fn shape(x: f64, k: f64) -> f64 {
    (1.0 + k) * x / (1.0 + k * x.abs())
}

#[derive(Debug, Clone)]
pub struct WaveShaper {
    amount: f64,
    k: f64,
}

impl WaveShaper {
    pub fn new(amount: f64) -> Self {
        let mut shaper = WaveShaper { amount: 0.0, k: 0.0 };
        shaper.set_amount(amount);
        shaper
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = DISTORTION.clamp(amount);
        self.k = self.amount * DRIVE_SCALE;
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    #[inline]
    pub fn process(&self, x: f64) -> f64 {
        if self.k == 0.0 { x } else { shape(x, self.k) }
    }
}
