//! Anti-aliased oscillators using PolyBLEP, plus wavetable playback for
//! custom (user-drawn) waveforms.

use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::spectrum::Wavetable;

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    /// Band-limited reconstruction of the user-supplied single cycle.
    Custom,
}

/// A band-limited oscillator with anti-aliasing (PolyBLEP).
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    pub frequency: f64,
    pub detune: f64, // in cents
    phase: f64,
    sample_rate: f64,
    table: Option<Arc<Wavetable>>,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency: 440.0,
            detune: 0.0,
            phase: 0.0,
            sample_rate,
            table: None,
        }
    }

    /// Oscillator reading from a precomputed wavetable.
    pub fn with_table(table: Arc<Wavetable>, sample_rate: f64) -> Self {
        Oscillator {
            table: Some(table),
            ..Oscillator::new(Waveform::Custom, sample_rate)
        }
    }

    /// Effective frequency accounting for detune plus a modulation offset (cents).
    fn effective_freq(&self, mod_cents: f64) -> f64 {
        self.frequency * (2.0_f64).powf((self.detune + mod_cents) / 1200.0)
    }

    /// Phase increment per sample.
    fn phase_inc(&self, mod_cents: f64) -> f64 {
        self.effective_freq(mod_cents) / self.sample_rate
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        self.next_sample_modulated(0.0)
    }

    /// Generate the next sample with an extra pitch offset in cents.
    pub fn next_sample_modulated(&mut self, mod_cents: f64) -> f64 {
        let inc = self.phase_inc(mod_cents);
        let sample = match self.waveform {
            Waveform::Sine => self.sine(),
            Waveform::Sawtooth => self.sawtooth(inc),
            Waveform::Square => self.square(inc),
            Waveform::Triangle => self.triangle(),
            // No table yet: stay silent rather than guess a shape.
            Waveform::Custom => self.table.as_ref().map_or(0.0, |t| t.read(self.phase)),
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        sample
    }

    fn sine(&self) -> f64 {
        (2.0 * PI * self.phase).sin()
    }

    /// Naive sawtooth: rises from -1 to +1, then drops.
    /// PolyBLEP corrects the discontinuity at the wrap.
    fn sawtooth(&self, inc: f64) -> f64 {
        let naive = 2.0 * self.phase - 1.0;
        naive - poly_blep(self.phase, inc)
    }

    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }

    /// Piecewise linear, -1→+1 in [0, 0.5], +1→-1 in [0.5, 1].
    fn triangle(&self) -> f64 {
        if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        }
    }

    /// Swap the wavetable without resetting phase.
    pub fn set_table(&mut self, table: Arc<Wavetable>) {
        self.table = Some(table);
    }

    pub fn table(&self) -> Option<&Arc<Wavetable>> {
        self.table.as_ref()
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) anti-aliasing correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// White noise in [-1, 1) from a seeded generator, so renders repeat exactly.
#[derive(Debug, Clone)]
pub struct Noise {
    rng: SmallRng,
}

impl Noise {
    pub fn new(seed: u64) -> Self {
        Noise {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn next_sample(&mut self) -> f64 {
        self.rng.gen_range(-1.0..1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrum::build_spectrum;

    #[test]
    fn sine_zero_at_start() {
        let mut osc = Oscillator::new(Waveform::Sine, 44100.0);
        osc.frequency = 440.0;
        let sample = osc.next_sample();
        assert!(sample.abs() < 1e-10, "Sine should start near 0, got {sample}");
    }

    #[test]
    fn shapes_stay_in_range() {
        for waveform in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Sawtooth,
            Waveform::Triangle,
        ] {
            let mut osc = Oscillator::new(waveform, 44100.0);
            osc.frequency = 440.0;
            for _ in 0..44100 {
                let s = osc.next_sample();
                assert!(s.abs() <= 1.5, "{waveform:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn detune_shifts_frequency() {
        let mut osc1 = Oscillator::new(Waveform::Sine, 44100.0);
        osc1.frequency = 440.0;

        let mut osc2 = Oscillator::new(Waveform::Sine, 44100.0);
        osc2.frequency = 440.0;
        osc2.detune = 1200.0; // +1 octave

        let inc1 = osc1.phase_inc(0.0);
        let inc2 = osc2.phase_inc(0.0);
        assert!(
            (inc2 - 2.0 * inc1).abs() < 1e-10,
            "1200 cents detune should double frequency"
        );
    }

    #[test]
    fn modulation_adds_to_detune() {
        let mut osc = Oscillator::new(Waveform::Sine, 48000.0);
        osc.frequency = 220.0;
        osc.detune = 600.0;
        let inc = osc.phase_inc(600.0);
        assert!((inc - 440.0 / 48000.0).abs() < 1e-12);
    }

    #[test]
    fn custom_without_table_is_silent() {
        let mut osc = Oscillator::new(Waveform::Custom, 44100.0);
        assert!((0..100).all(|_| osc.next_sample() == 0.0));
    }

    #[test]
    fn custom_table_plays_the_drawn_shape() {
        let cycle: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 256.0).sin())
            .collect();
        let spectrum = build_spectrum(&cycle, 441.0, 44100.0);
        let mut osc = Oscillator::with_table(Arc::new(Wavetable::from_spectrum(&spectrum)), 44100.0);
        osc.frequency = 441.0;

        // 100 samples per cycle: a quarter period in should be the positive peak.
        for _ in 0..25 {
            osc.next_sample();
        }
        let peak = osc.next_sample();
        assert!((peak - 1.0).abs() < 0.01, "expected sine peak, got {peak}");
    }

    #[test]
    fn noise_is_deterministic_per_seed() {
        let mut a = Noise::new(7);
        let mut b = Noise::new(7);
        for _ in 0..64 {
            let (x, y) = (a.next_sample(), b.next_sample());
            assert_eq!(x, y);
            assert!((-1.0..1.0).contains(&x));
        }
    }
}
