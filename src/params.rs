//! Global parameter set for the synthesis engine.
//!
//! Every numeric field has a documented range. Values outside it are
//! clamped on the way in, never rejected; NaN falls to the lower bound.

use serde::{Deserialize, Serialize};

use crate::dsp::oscillator::Waveform;

/// Inclusive numeric range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Range { min, max }
    }

    /// Clamp `value` into the range. NaN maps to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

pub const BASE_FREQUENCY: Range = Range::new(20.0, 20000.0);
pub const MASTER_GAIN: Range = Range::new(0.0, 1.0);
pub const FILTER_CUTOFF: Range = Range::new(20.0, 20000.0);
pub const FILTER_RESONANCE: Range = Range::new(0.0001, 40.0);
pub const DISTORTION: Range = Range::new(0.0, 1.0);
pub const ENVELOPE_TIME: Range = Range::new(0.0, 10.0);
pub const LEVEL: Range = Range::new(0.0, 1.0);
pub const FILTER_ENV_DEPTH: Range = Range::new(0.0, 10000.0);
pub const LFO_RATE: Range = Range::new(0.1, 30.0);
pub const VIBRATO_DEPTH: Range = Range::new(0.0, 200.0);
pub const FILTER_LFO_DEPTH: Range = Range::new(0.0, 4800.0);
pub const UNISON_COUNT: Range = Range::new(1.0, 7.0);
pub const UNISON_DETUNE: Range = Range::new(0.0, 100.0);
pub const DELAY_TIME: Range = Range::new(0.0, 2.0);
pub const DELAY_FEEDBACK: Range = Range::new(0.0, 0.95);
pub const REVERB_SIZE: Range = Range::new(0.1, 6.0);
pub const MAX_VOICES: Range = Range::new(1.0, 32.0);

/// Attack/decay/sustain/release settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Adsr {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

impl Adsr {
    pub fn clamped(self) -> Self {
        Adsr {
            attack: ENVELOPE_TIME.clamp(self.attack),
            decay: ENVELOPE_TIME.clamp(self.decay),
            sustain: LEVEL.clamp(self.sustain),
            release: ENVELOPE_TIME.clamp(self.release),
        }
    }
}

/// The full engine parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthParams {
    pub waveform: Waveform,
    /// Frequency of the legacy drone voice, in Hz.
    pub base_frequency: f64,
    pub master_gain: f64,
    pub filter_cutoff: f64,
    pub filter_resonance: f64,
    /// Waveshaper drive [0, 1]; 0 is linear.
    pub distortion: f64,
    pub amp_envelope: Adsr,
    pub filter_envelope: Adsr,
    /// Filter envelope depth in Hz added on top of the keytracked cutoff.
    pub filter_env_depth: f64,
    pub amp_velocity_sensitivity: f64,
    pub filter_velocity_sensitivity: f64,
    pub keytrack: f64,
    pub lfo_rate: f64,
    /// Vibrato depth in cents.
    pub vibrato_depth: f64,
    /// Shared-filter LFO depth in cents.
    pub filter_lfo_depth: f64,
    pub tremolo_depth: f64,
    pub unison_count: usize,
    /// Spread of unison detune in cents, either side of center.
    pub unison_detune: f64,
    pub stereo_spread: f64,
    pub delay_time: f64,
    pub delay_feedback: f64,
    pub delay_mix: f64,
    /// Reverb impulse length in seconds.
    pub reverb_size: f64,
    pub reverb_mix: f64,
    pub max_voices: usize,
    pub noise_level: f64,
}

impl Default for SynthParams {
    fn default() -> Self {
        SynthParams {
            waveform: Waveform::Sawtooth,
            base_frequency: 220.0,
            master_gain: 0.5,
            filter_cutoff: 12000.0,
            filter_resonance: 1.0,
            distortion: 0.0,
            amp_envelope: Adsr::default(),
            filter_envelope: Adsr {
                attack: 0.01,
                decay: 0.2,
                sustain: 0.5,
                release: 0.3,
            },
            filter_env_depth: 0.0,
            amp_velocity_sensitivity: 1.0,
            filter_velocity_sensitivity: 0.5,
            keytrack: 0.0,
            lfo_rate: 5.0,
            vibrato_depth: 0.0,
            filter_lfo_depth: 0.0,
            tremolo_depth: 0.0,
            unison_count: 1,
            unison_detune: 10.0,
            stereo_spread: 0.5,
            delay_time: 0.3,
            delay_feedback: 0.35,
            delay_mix: 0.0,
            reverb_size: 2.0,
            reverb_mix: 0.0,
            max_voices: 16,
            noise_level: 0.0,
        }
    }
}

/// A single parameter change. Each variant is one setter of the
/// parameter API; applying it clamps and is idempotent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    Waveform(Waveform),
    BaseFrequency(f64),
    MasterGain(f64),
    FilterCutoff(f64),
    FilterResonance(f64),
    Distortion(f64),
    AmpEnvelope(Adsr),
    FilterEnvelope(Adsr),
    FilterEnvDepth(f64),
    AmpVelocitySensitivity(f64),
    FilterVelocitySensitivity(f64),
    Keytrack(f64),
    LfoRate(f64),
    VibratoDepth(f64),
    FilterLfoDepth(f64),
    TremoloDepth(f64),
    UnisonCount(usize),
    UnisonDetune(f64),
    StereoSpread(f64),
    DelayTime(f64),
    DelayFeedback(f64),
    DelayMix(f64),
    ReverbSize(f64),
    ReverbMix(f64),
    MaxVoices(usize),
    NoiseLevel(f64),
}

fn clamp_count(value: usize, range: Range) -> usize {
    value.clamp(range.min as usize, range.max as usize)
}

impl SynthParams {
    /// Parse a (possibly partial) JSON parameter set. Missing fields take
    /// their defaults and out-of-range values are clamped.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let params: SynthParams = serde_json::from_str(json)?;
        Ok(params.clamped())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Return a copy with every field clamped to its range.
    pub fn clamped(&self) -> Self {
        let mut out = self.clone();
        for param in self.as_params() {
            out.apply(param);
        }
        out
    }

    fn as_params(&self) -> [Param; 26] {
        [
            Param::Waveform(self.waveform),
            Param::BaseFrequency(self.base_frequency),
            Param::MasterGain(self.master_gain),
            Param::FilterCutoff(self.filter_cutoff),
            Param::FilterResonance(self.filter_resonance),
            Param::Distortion(self.distortion),
            Param::AmpEnvelope(self.amp_envelope),
            Param::FilterEnvelope(self.filter_envelope),
            Param::FilterEnvDepth(self.filter_env_depth),
            Param::AmpVelocitySensitivity(self.amp_velocity_sensitivity),
            Param::FilterVelocitySensitivity(self.filter_velocity_sensitivity),
            Param::Keytrack(self.keytrack),
            Param::LfoRate(self.lfo_rate),
            Param::VibratoDepth(self.vibrato_depth),
            Param::FilterLfoDepth(self.filter_lfo_depth),
            Param::TremoloDepth(self.tremolo_depth),
            Param::UnisonCount(self.unison_count),
            Param::UnisonDetune(self.unison_detune),
            Param::StereoSpread(self.stereo_spread),
            Param::DelayTime(self.delay_time),
            Param::DelayFeedback(self.delay_feedback),
            Param::DelayMix(self.delay_mix),
            Param::ReverbSize(self.reverb_size),
            Param::ReverbMix(self.reverb_mix),
            Param::MaxVoices(self.max_voices),
            Param::NoiseLevel(self.noise_level),
        ]
    }

    /// Apply one parameter change, clamping it into range.
    pub fn apply(&mut self, param: Param) {
        match param {
            Param::Waveform(w) => self.waveform = w,
            Param::BaseFrequency(v) => self.base_frequency = BASE_FREQUENCY.clamp(v),
            Param::MasterGain(v) => self.master_gain = MASTER_GAIN.clamp(v),
            Param::FilterCutoff(v) => self.filter_cutoff = FILTER_CUTOFF.clamp(v),
            Param::FilterResonance(v) => self.filter_resonance = FILTER_RESONANCE.clamp(v),
            Param::Distortion(v) => self.distortion = DISTORTION.clamp(v),
            Param::AmpEnvelope(adsr) => self.amp_envelope = adsr.clamped(),
            Param::FilterEnvelope(adsr) => self.filter_envelope = adsr.clamped(),
            Param::FilterEnvDepth(v) => self.filter_env_depth = FILTER_ENV_DEPTH.clamp(v),
            Param::AmpVelocitySensitivity(v) => self.amp_velocity_sensitivity = LEVEL.clamp(v),
            Param::FilterVelocitySensitivity(v) => {
                self.filter_velocity_sensitivity = LEVEL.clamp(v)
            }
            Param::Keytrack(v) => self.keytrack = LEVEL.clamp(v),
            Param::LfoRate(v) => self.lfo_rate = LFO_RATE.clamp(v),
            Param::VibratoDepth(v) => self.vibrato_depth = VIBRATO_DEPTH.clamp(v),
            Param::FilterLfoDepth(v) => self.filter_lfo_depth = FILTER_LFO_DEPTH.clamp(v),
            Param::TremoloDepth(v) => self.tremolo_depth = LEVEL.clamp(v),
            Param::UnisonCount(n) => self.unison_count = clamp_count(n, UNISON_COUNT),
            Param::UnisonDetune(v) => self.unison_detune = UNISON_DETUNE.clamp(v),
            Param::StereoSpread(v) => self.stereo_spread = LEVEL.clamp(v),
            Param::DelayTime(v) => self.delay_time = DELAY_TIME.clamp(v),
            Param::DelayFeedback(v) => self.delay_feedback = DELAY_FEEDBACK.clamp(v),
            Param::DelayMix(v) => self.delay_mix = LEVEL.clamp(v),
            Param::ReverbSize(v) => self.reverb_size = REVERB_SIZE.clamp(v),
            Param::ReverbMix(v) => self.reverb_mix = LEVEL.clamp(v),
            Param::MaxVoices(n) => self.max_voices = clamp_count(n, MAX_VOICES),
            Param::NoiseLevel(v) => self.noise_level = LEVEL.clamp(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut p = SynthParams::default();
        p.apply(Param::FilterCutoff(99999.0));
        p.apply(Param::FilterResonance(0.0));
        p.apply(Param::DelayFeedback(1.5));
        p.apply(Param::UnisonCount(12));
        p.apply(Param::MaxVoices(0));
        p.apply(Param::LfoRate(-3.0));

        assert_eq!(p.filter_cutoff, 20000.0);
        assert_eq!(p.filter_resonance, 0.0001);
        assert_eq!(p.delay_feedback, 0.95);
        assert_eq!(p.unison_count, 7);
        assert_eq!(p.max_voices, 1);
        assert_eq!(p.lfo_rate, 0.1);
    }

    #[test]
    fn nan_falls_to_lower_bound() {
        let mut p = SynthParams::default();
        p.apply(Param::MasterGain(f64::NAN));
        p.apply(Param::VibratoDepth(f64::NAN));
        assert_eq!(p.master_gain, 0.0);
        assert_eq!(p.vibrato_depth, 0.0);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut a = SynthParams::default();
        a.apply(Param::ReverbSize(9.0));
        let once = a.clone();
        a.apply(Param::ReverbSize(9.0));
        assert_eq!(a, once);
        assert_eq!(a.reverb_size, 6.0);
    }

    #[test]
    fn envelope_fields_clamp_independently() {
        let mut p = SynthParams::default();
        p.apply(Param::AmpEnvelope(Adsr {
            attack: -1.0,
            decay: 0.2,
            sustain: 3.0,
            release: 40.0,
        }));
        assert_eq!(p.amp_envelope.attack, 0.0);
        assert_eq!(p.amp_envelope.decay, 0.2);
        assert_eq!(p.amp_envelope.sustain, 1.0);
        assert_eq!(p.amp_envelope.release, 10.0);
    }

    #[test]
    fn partial_json_fills_defaults_and_clamps() {
        let p = SynthParams::from_json(
            r#"{ "waveform": "square", "filterCutoff": 5.0, "unisonCount": 3 }"#,
        )
        .unwrap();
        assert_eq!(p.waveform, Waveform::Square);
        assert_eq!(p.filter_cutoff, 20.0);
        assert_eq!(p.unison_count, 3);
        assert_eq!(p.master_gain, SynthParams::default().master_gain);
    }

    #[test]
    fn json_roundtrip_preserves_values() {
        let mut p = SynthParams::default();
        p.apply(Param::Keytrack(0.5));
        p.apply(Param::Waveform(Waveform::Custom));
        let json = p.to_json().unwrap();
        let back = SynthParams::from_json(&json).unwrap();
        assert_eq!(back, p);
    }
}
