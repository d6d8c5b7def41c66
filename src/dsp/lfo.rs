//! Low-frequency modulation shared by every voice.
//!
//! One sine LFO feeds three depth-scaled taps: vibrato (cents, into every
//! generator's pitch), filter modulation (cents, into the shared filter) and
//! tremolo (into the voice mixer gain). Voices read the current tap values
//! each sample, so a depth change reaches every sounding voice immediately,
//! including voices started before the change.

use std::f64::consts::PI;

use super::pitch::semitones_from_a440;
use crate::params::{FILTER_CUTOFF, FILTER_LFO_DEPTH, LEVEL, LFO_RATE, VIBRATO_DEPTH};

/// Sine low-frequency oscillator.
#[derive(Debug, Clone)]
pub struct Lfo {
    rate: f64,
    phase: f64,
    sample_rate: f64,
}

impl Lfo {
    pub fn new(rate: f64, sample_rate: f64) -> Self {
        Lfo {
            rate: LFO_RATE.clamp(rate),
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = LFO_RATE.clamp(rate);
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Next LFO value in [-1, 1].
    pub fn next_sample(&mut self) -> f64 {
        let value = (2.0 * PI * self.phase).sin();
        self.phase += self.rate / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        value
    }
}

/// Per-sample modulation values handed to voices and the tone chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationFrame {
    /// Pitch offset in cents for every generator.
    pub vibrato_cents: f64,
    /// Cutoff offset in cents for the shared filter.
    pub filter_cents: f64,
    /// Gain of the voice mixer.
    pub tremolo_gain: f64,
}

impl ModulationFrame {
    pub const NEUTRAL: ModulationFrame = ModulationFrame {
        vibrato_cents: 0.0,
        filter_cents: 0.0,
        tremolo_gain: 1.0,
    };
}

/// The shared LFO and its three taps.
#[derive(Debug, Clone)]
pub struct ModulationRouter {
    lfo: Lfo,
    vibrato_depth: f64,
    filter_depth: f64,
    tremolo_depth: f64,
}

impl ModulationRouter {
    pub fn new(rate: f64, sample_rate: f64) -> Self {
        ModulationRouter {
            lfo: Lfo::new(rate, sample_rate),
            vibrato_depth: 0.0,
            filter_depth: 0.0,
            tremolo_depth: 0.0,
        }
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.lfo.set_rate(rate);
    }

    /// Vibrato depth in cents [0, 200].
    pub fn set_vibrato_depth(&mut self, cents: f64) {
        self.vibrato_depth = VIBRATO_DEPTH.clamp(cents);
    }

    /// Filter modulation depth in cents [0, 4800].
    pub fn set_filter_depth(&mut self, cents: f64) {
        self.filter_depth = FILTER_LFO_DEPTH.clamp(cents);
    }

    /// Tremolo depth [0, 1].
    pub fn set_tremolo_depth(&mut self, depth: f64) {
        self.tremolo_depth = LEVEL.clamp(depth);
    }

    /// Advance the LFO one sample and return the scaled taps.
    pub fn next_frame(&mut self) -> ModulationFrame {
        let value = self.lfo.next_sample();
        ModulationFrame {
            vibrato_cents: value * self.vibrato_depth,
            filter_cents: value * self.filter_depth,
            tremolo_gain: tremolo_gain(self.tremolo_depth, value),
        }
    }
}

/// Mixer gain for tremolo `depth` at LFO value `lfo`: biased to
/// `1 - depth/2` and swinging `±depth/2` around it.
pub fn tremolo_gain(depth: f64, lfo: f64) -> f64 {
    let half = depth * 0.5;
    1.0 - half + half * lfo
}

/// Filter base cutoff for a voice at `frequency`:
/// `cutoff * 2^(keytrack * semitones_from_a440(frequency) / 12)`,
/// clamped to [20, 20000] Hz.
pub fn keytracked_cutoff(cutoff: f64, keytrack: f64, frequency: f64) -> f64 {
    let semitones = if frequency > 0.0 {
        semitones_from_a440(frequency)
    } else {
        0.0
    };
    FILTER_CUTOFF.clamp(cutoff * (2.0_f64).powf(keytrack * semitones / 12.0))
}
