//! ADSR Envelope generator.
//!
//! `idle → attack → decay → sustain → release → idle`, all segments linear.
//! The output rests at 0; callers map that onto their own rest value (silence
//! for amplitude, the un-modulated base cutoff for the filter).

use crate::params::Adsr;

/// Shortest ramp the envelope will schedule, in seconds.
pub const MIN_RAMP_SECONDS: f64 = 0.001;

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR Envelope with linear attack/decay/release ramps.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0, 1], relative to the trigger peak.
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,

    stage: Stage,
    level: f64,
    peak: f64,
    sample_rate: f64,
    stage_samples: usize,
    stage_counter: usize,
    /// Level at the start of the current ramp.
    start_level: f64,
    /// Level at the end of the current ramp.
    target: f64,
}

impl Envelope {
    pub fn new(sample_rate: f64) -> Self {
        Envelope::with_adsr(sample_rate, Adsr::default())
    }

    pub fn with_adsr(sample_rate: f64, adsr: Adsr) -> Self {
        Envelope {
            attack: adsr.attack,
            decay: adsr.decay,
            sustain: adsr.sustain,
            release: adsr.release,
            stage: Stage::Idle,
            level: 0.0,
            peak: 1.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
            target: 0.0,
        }
    }

    /// Ramp length in samples, never shorter than [`MIN_RAMP_SECONDS`].
    fn ramp_samples(&self, seconds: f64) -> usize {
        let seconds = if seconds.is_finite() { seconds } else { 0.0 };
        ((seconds.max(MIN_RAMP_SECONDS) * self.sample_rate).round() as usize).max(1)
    }

    fn begin_ramp(&mut self, stage: Stage, target: f64, seconds: f64) {
        self.stage = stage;
        self.start_level = self.level;
        self.target = target;
        self.stage_samples = self.ramp_samples(seconds);
        self.stage_counter = 0;
    }

    /// Trigger the envelope: ramp from the current level to `peak`, then
    /// down to `peak * sustain`, then hold.
    pub fn trigger(&mut self, peak: f64) {
        self.peak = peak.max(0.0);
        self.begin_ramp(Stage::Attack, self.peak, self.attack);
    }

    /// Release the envelope from its current level down to rest.
    pub fn release(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.begin_ramp(Stage::Release, 0.0, self.release);
    }

    /// Generate the next envelope sample.
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Sustain => self.level = self.peak * self.sustain,
            Stage::Attack | Stage::Decay | Stage::Release => {
                self.stage_counter += 1;
                let t = self.stage_counter as f64 / self.stage_samples as f64;
                self.level = self.start_level + (self.target - self.start_level) * t;
                if self.stage_counter >= self.stage_samples {
                    self.level = self.target;
                    self.advance_stage();
                }
            }
        }
        self.level
    }

    fn advance_stage(&mut self) {
        match self.stage {
            Stage::Attack => {
                let sustain = self.peak * self.sustain;
                self.begin_ramp(Stage::Decay, sustain, self.decay);
            }
            Stage::Decay => self.stage = Stage::Sustain,
            Stage::Release => {
                self.stage = Stage::Idle;
                self.level = 0.0;
            }
            Stage::Idle | Stage::Sustain => {}
        }
    }

    /// Returns true if the envelope has finished (idle after release).
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Peak requested by the last trigger.
    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Samples a release started now would take to reach rest.
    pub fn release_samples(&self) -> usize {
        self.ramp_samples(self.release)
    }
}

/// `lerp(1, velocity, sensitivity)`: full scale at sensitivity 0, the raw
/// velocity at sensitivity 1.
pub fn velocity_scale(velocity: f64, sensitivity: f64) -> f64 {
    1.0 + (velocity - 1.0) * sensitivity
}
