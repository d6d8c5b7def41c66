//! Voice: one sounding note: generator(s), per-voice lowpass, and the
//! amplitude and filter envelopes.
//!
//! A synthesized voice stacks 1–7 unison oscillators, detuned and panned
//! symmetrically around center. A sampled voice reads a decoded buffer at a
//! pitch-shifted rate. Percussive voices are sampled one-shots that skip the
//! filter and envelopes and retire when the buffer runs out.

use std::f64::consts::{FRAC_PI_4, SQRT_2};
use std::sync::Arc;

use super::envelope::{Envelope, velocity_scale};
use super::filter::BiquadFilter;
use super::lfo::keytracked_cutoff;
use super::oscillator::{Noise, Oscillator, Waveform};
use super::pitch::cents_to_ratio;
use super::sampler::SamplePlayer;
use super::spectrum::Wavetable;
use crate::params::{FILTER_CUTOFF, SynthParams};

/// Caller-supplied voice identity; defaults to the note number.
pub type VoiceId = u32;

/// Samples between per-voice filter coefficient updates.
pub const CONTROL_INTERVAL: usize = 16;

/// Fixed Q of the per-voice lowpass; resonance lives on the shared filter.
const VOICE_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Synthesized,
    Sampled,
    Percussive,
}

/// Identity and timing of a note-on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteStart {
    pub id: VoiceId,
    pub note: u8,
    /// Velocity [0, 1].
    pub velocity: f64,
    /// Engine frame at which the voice started; steal ordering uses it.
    pub started_at: u64,
    /// Seed for the voice's noise generator.
    pub seed: u64,
}

/// Values shared by every voice for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceContext {
    pub vibrato_cents: f64,
    pub noise_level: f64,
}

/// One unison layer.
#[derive(Debug, Clone)]
struct UnisonOscillator {
    osc: Oscillator,
    gain_l: f64,
    gain_r: f64,
}

#[derive(Debug, Clone)]
enum VoiceSource {
    Synth(Vec<UnisonOscillator>),
    Sample(SamplePlayer),
}

/// Detune (cents) and pan [-1, 1] of unison layer `index` out of `count`.
pub fn unison_offset(index: usize, count: usize, detune: f64, spread: f64) -> (f64, f64) {
    if count <= 1 {
        return (0.0, 0.0);
    }
    let position = 2.0 * index as f64 / (count - 1) as f64 - 1.0;
    (position * detune, position * spread)
}

/// Equal-power pan gains, normalized so center is unity on both sides.
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos() * SQRT_2, angle.sin() * SQRT_2)
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub id: VoiceId,
    pub note: u8,
    pub kind: VoiceKind,
    /// Source frequency in Hz; keytracking follows it.
    pub frequency: f64,
    pub started_at: u64,

    source: VoiceSource,
    filter_l: BiquadFilter,
    filter_r: BiquadFilter,
    amp_env: Envelope,
    filter_env: Envelope,
    base_cutoff: f64,
    /// Cutoff most recently applied to the per-voice filter.
    cutoff: f64,
    /// Filter envelope depth in Hz after velocity scaling.
    filter_env_amount: f64,
    /// Flat gain of percussive one-shots.
    percussive_gain: f64,
    noise: Noise,
    control_counter: usize,
    released: bool,
    finished: bool,
}

impl Voice {
    /// A synthesized voice. `table` is required for [`Waveform::Custom`]
    /// and ignored otherwise.
    pub fn synthesized(
        start: NoteStart,
        frequency: f64,
        params: &SynthParams,
        table: Option<Arc<Wavetable>>,
        sample_rate: f64,
    ) -> Self {
        let count = params.unison_count.max(1);
        let norm = 1.0 / (count as f64).sqrt();
        let layers = (0..count)
            .map(|i| {
                let (detune, pan) =
                    unison_offset(i, count, params.unison_detune, params.stereo_spread);
                let mut osc = match (&table, params.waveform) {
                    (Some(table), Waveform::Custom) => {
                        Oscillator::with_table(Arc::clone(table), sample_rate)
                    }
                    (_, waveform) => Oscillator::new(waveform, sample_rate),
                };
                osc.frequency = frequency;
                osc.detune = detune;
                let (gain_l, gain_r) = pan_gains(pan);
                UnisonOscillator {
                    osc,
                    gain_l: gain_l * norm,
                    gain_r: gain_r * norm,
                }
            })
            .collect();

        Voice::with_source(
            start,
            VoiceKind::Synthesized,
            frequency,
            VoiceSource::Synth(layers),
            params,
            sample_rate,
        )
    }

    /// A voice playing a sample. Percussive voices are one-shots.
    pub fn sampled(
        start: NoteStart,
        frequency: f64,
        player: SamplePlayer,
        percussive: bool,
        params: &SynthParams,
        sample_rate: f64,
    ) -> Self {
        let kind = if percussive {
            VoiceKind::Percussive
        } else {
            VoiceKind::Sampled
        };
        Voice::with_source(
            start,
            kind,
            frequency,
            VoiceSource::Sample(player),
            params,
            sample_rate,
        )
    }

    fn with_source(
        start: NoteStart,
        kind: VoiceKind,
        frequency: f64,
        source: VoiceSource,
        params: &SynthParams,
        sample_rate: f64,
    ) -> Self {
        let velocity = start.velocity.clamp(0.0, 1.0);
        let amp_peak = velocity_scale(velocity, params.amp_velocity_sensitivity);
        let base_cutoff = keytracked_cutoff(params.filter_cutoff, params.keytrack, frequency);

        let mut amp_env = Envelope::with_adsr(sample_rate, params.amp_envelope);
        let mut filter_env = Envelope::with_adsr(sample_rate, params.filter_envelope);
        amp_env.trigger(amp_peak);
        filter_env.trigger(1.0);

        Voice {
            id: start.id,
            note: start.note,
            kind,
            frequency,
            started_at: start.started_at,
            source,
            filter_l: BiquadFilter::lowpass(sample_rate, base_cutoff, VOICE_Q),
            filter_r: BiquadFilter::lowpass(sample_rate, base_cutoff, VOICE_Q),
            amp_env,
            filter_env,
            base_cutoff,
            cutoff: base_cutoff,
            filter_env_amount: params.filter_env_depth
                * velocity_scale(velocity, params.filter_velocity_sensitivity),
            percussive_gain: amp_peak,
            noise: Noise::new(start.seed),
            control_counter: 0,
            released: false,
            finished: false,
        }
    }

    /// Begin the release tail. Percussive voices ignore note-off.
    pub fn release(&mut self) {
        if self.kind == VoiceKind::Percussive || self.released {
            return;
        }
        self.released = true;
        self.amp_env.release();
        self.filter_env.release();
    }

    /// Move a synthesized voice to a new pitch without retriggering.
    /// Custom-waveform layers switch to `table`, the one built for the new
    /// pitch.
    pub fn retune(&mut self, frequency: f64, table: Option<Arc<Wavetable>>) {
        self.frequency = frequency;
        if let VoiceSource::Synth(layers) = &mut self.source {
            for layer in layers {
                layer.osc.frequency = frequency;
                if let (Some(table), Waveform::Custom) = (&table, layer.osc.waveform) {
                    layer.osc.set_table(Arc::clone(table));
                }
            }
        }
    }

    /// Wavetable of a custom-waveform voice.
    pub fn wavetable(&self) -> Option<&Arc<Wavetable>> {
        match &self.source {
            VoiceSource::Synth(layers) => layers.first().and_then(|layer| layer.osc.table()),
            VoiceSource::Sample(_) => None,
        }
    }

    /// Recompute the keytracked base cutoff after a cutoff or keytrack change.
    pub fn set_filter_base(&mut self, cutoff: f64, keytrack: f64) {
        self.base_cutoff = keytracked_cutoff(cutoff, keytrack, self.frequency);
    }

    pub fn base_cutoff(&self) -> f64 {
        self.base_cutoff
    }

    /// Per-voice filter cutoff as of the last control update.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Filter envelope depth in Hz, after velocity scaling.
    pub fn filter_env_amount(&self) -> f64 {
        self.filter_env_amount
    }

    /// Peak of the amplitude envelope set at note-on.
    pub fn amp_peak(&self) -> f64 {
        self.amp_env.peak()
    }

    /// Held voices are sounding and not yet released.
    pub fn is_held(&self) -> bool {
        !self.released && !self.finished && self.kind != VoiceKind::Percussive
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Samples the release tail takes once started.
    pub fn release_samples(&self) -> usize {
        self.amp_env.release_samples()
    }

    /// Render one stereo frame.
    pub fn next_frame(&mut self, ctx: &VoiceContext) -> (f64, f64) {
        if self.finished {
            return (0.0, 0.0);
        }

        if self.kind == VoiceKind::Percussive {
            let (l, r) = match &mut self.source {
                VoiceSource::Sample(player) => {
                    let frame = player.next_frame();
                    if player.is_finished() {
                        self.finished = true;
                    }
                    frame
                }
                VoiceSource::Synth(_) => (0.0, 0.0),
            };
            return (l * self.percussive_gain, r * self.percussive_gain);
        }

        let env = self.filter_env.next_sample();
        if self.control_counter == 0 {
            self.cutoff = FILTER_CUTOFF.clamp(self.base_cutoff + env * self.filter_env_amount);
            self.filter_l.set_frequency(self.cutoff);
            self.filter_r.set_frequency(self.cutoff);
        }
        self.control_counter = (self.control_counter + 1) % CONTROL_INTERVAL;

        let (mut l, mut r) = match &mut self.source {
            VoiceSource::Synth(layers) => {
                let mut acc = (0.0, 0.0);
                for layer in layers.iter_mut() {
                    let s = layer.osc.next_sample_modulated(ctx.vibrato_cents);
                    acc.0 += s * layer.gain_l;
                    acc.1 += s * layer.gain_r;
                }
                acc
            }
            VoiceSource::Sample(player) => {
                let frame = player.next_frame_modulated(cents_to_ratio(ctx.vibrato_cents));
                if player.is_finished() {
                    self.finished = true;
                }
                frame
            }
        };

        if ctx.noise_level > 0.0 && matches!(self.source, VoiceSource::Synth(_)) {
            let n = self.noise.next_sample() * ctx.noise_level;
            l += n;
            r += n;
        }

        let amp = self.amp_env.next_sample();
        if self.released && self.amp_env.is_finished() {
            self.finished = true;
        }

        (
            self.filter_l.process(l) * amp,
            self.filter_r.process(r) * amp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::sampler::SampleBuffer;
    use crate::dsp::spectrum::WavetableSet;
    use crate::params::Adsr;
    use approx::assert_relative_eq;

    const SR: f64 = 44100.0;
    const CTX: VoiceContext = VoiceContext {
        vibrato_cents: 0.0,
        noise_level: 0.0,
    };

    fn start(id: VoiceId, velocity: f64) -> NoteStart {
        NoteStart {
            id,
            note: 69,
            velocity,
            started_at: 0,
            seed: 1,
        }
    }

    fn short_params() -> SynthParams {
        SynthParams {
            amp_envelope: Adsr {
                attack: 0.001,
                decay: 0.001,
                sustain: 0.5,
                release: 0.01,
            },
            ..SynthParams::default()
        }
    }

    fn peak_of(voice: &mut Voice, samples: usize) -> f64 {
        (0..samples).fold(0.0_f64, |p, _| {
            let (l, r) = voice.next_frame(&CTX);
            p.max(l.abs()).max(r.abs())
        })
    }

    #[test]
    fn voice_produces_sound() {
        let mut v = Voice::synthesized(start(69, 0.8), 440.0, &short_params(), None, SR);
        assert!(peak_of(&mut v, 4410) > 0.001, "Voice should produce non-zero output");
    }

    #[test]
    fn voice_retires_after_release() {
        let params = short_params();
        let mut v = Voice::synthesized(start(69, 1.0), 440.0, &params, None, SR);
        for _ in 0..500 {
            v.next_frame(&CTX);
        }

        v.release();
        assert!(!v.is_held());
        for _ in 0..v.release_samples() {
            v.next_frame(&CTX);
        }
        assert!(v.is_finished());
        assert_eq!(v.next_frame(&CTX), (0.0, 0.0));
    }

    #[test]
    fn unison_offsets_are_symmetric() {
        assert_eq!(unison_offset(0, 1, 20.0, 1.0), (0.0, 0.0));
        assert_eq!(unison_offset(0, 3, 20.0, 0.5), (-20.0, -0.5));
        assert_eq!(unison_offset(1, 3, 20.0, 0.5), (0.0, 0.0));
        assert_eq!(unison_offset(2, 3, 20.0, 0.5), (20.0, 0.5));
    }

    #[test]
    fn center_pan_is_unity() {
        let (l, r) = pan_gains(0.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-12);
        assert_relative_eq!(r, 1.0, epsilon = 1e-12);
        let (l, r) = pan_gains(-1.0);
        assert_relative_eq!(l, SQRT_2, epsilon = 1e-12);
        assert!(r.abs() < 1e-12);
    }

    #[test]
    fn unison_layers_are_gain_compensated() {
        let params = SynthParams {
            unison_count: 4,
            stereo_spread: 0.0,
            ..short_params()
        };
        let v = Voice::synthesized(start(1, 1.0), 440.0, &params, None, SR);
        let VoiceSource::Synth(layers) = &v.source else {
            panic!("expected synth source");
        };
        assert_eq!(layers.len(), 4);
        for layer in layers {
            assert_relative_eq!(layer.gain_l, 0.5, epsilon = 1e-12);
            assert_relative_eq!(layer.gain_r, 0.5, epsilon = 1e-12);
        }
        assert_relative_eq!(layers[0].osc.detune, -10.0, epsilon = 1e-12);
        assert_relative_eq!(layers[3].osc.detune, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn amp_velocity_sensitivity_sets_peak() {
        let mut params = short_params();
        params.amp_velocity_sensitivity = 0.0;
        for velocity in [0.1, 0.5, 1.0] {
            let v = Voice::synthesized(start(1, velocity), 440.0, &params, None, SR);
            assert_eq!(v.amp_peak(), 1.0);
        }

        params.amp_velocity_sensitivity = 1.0;
        for velocity in [0.1, 0.5, 1.0] {
            let v = Voice::synthesized(start(1, velocity), 440.0, &params, None, SR);
            assert_relative_eq!(v.amp_peak(), velocity, epsilon = 1e-12);
        }
    }

    #[test]
    fn keytracked_base_cutoff_follows_pitch() {
        let params = SynthParams {
            filter_cutoff: 1000.0,
            keytrack: 1.0,
            ..short_params()
        };
        let a4 = Voice::synthesized(start(69, 1.0), 440.0, &params, None, SR);
        let a5 = Voice::synthesized(start(81, 1.0), 880.0, &params, None, SR);
        assert_relative_eq!(a5.base_cutoff(), 2.0 * a4.base_cutoff(), epsilon = 1e-9);
    }

    #[test]
    fn filter_envelope_amount_follows_velocity_sensitivity() {
        let mut params = SynthParams {
            filter_env_depth: 1000.0,
            ..short_params()
        };
        params.filter_velocity_sensitivity = 0.0;
        for velocity in [0.1, 0.5, 1.0] {
            let v = Voice::synthesized(start(1, velocity), 440.0, &params, None, SR);
            assert_relative_eq!(v.filter_env_amount(), 1000.0, epsilon = 1e-9);
        }

        params.filter_velocity_sensitivity = 1.0;
        for velocity in [0.1, 0.5, 1.0] {
            let v = Voice::synthesized(start(1, velocity), 440.0, &params, None, SR);
            assert_relative_eq!(v.filter_env_amount(), 1000.0 * velocity, epsilon = 1e-9);
        }
    }

    #[test]
    fn filter_envelope_peaks_above_base_and_returns() {
        let params = SynthParams {
            filter_cutoff: 500.0,
            keytrack: 0.0,
            filter_env_depth: 1000.0,
            filter_velocity_sensitivity: 0.0,
            filter_envelope: Adsr {
                attack: 0.005,
                decay: 0.005,
                sustain: 1.0,
                release: 0.005,
            },
            amp_envelope: Adsr {
                attack: 0.001,
                decay: 0.001,
                sustain: 1.0,
                release: 0.1,
            },
            ..SynthParams::default()
        };
        let mut v = Voice::synthesized(start(69, 1.0), 440.0, &params, None, SR);
        assert_relative_eq!(v.base_cutoff(), 500.0, epsilon = 1e-9);

        let mut highest = 0.0_f64;
        for _ in 0..2000 {
            v.next_frame(&CTX);
            highest = highest.max(v.cutoff());
        }
        assert!(highest <= 1500.0 + 1e-9);
        assert_relative_eq!(v.cutoff(), 1500.0, epsilon = 1e-9);

        v.release();
        // Filter release is 0.005 s; the amp tail keeps the voice alive.
        for _ in 0..(0.005 * SR) as usize + 2 * CONTROL_INTERVAL {
            v.next_frame(&CTX);
        }
        assert!(!v.is_finished());
        assert_relative_eq!(v.cutoff(), 500.0, epsilon = 1e-9);
    }

    #[test]
    fn retune_swaps_custom_table() {
        let cycle: Vec<f32> = (0..256).map(|i| if i < 128 { 1.0 } else { -1.0 }).collect();
        let set = WavetableSet::new(&cycle, SR);
        let params = SynthParams {
            waveform: Waveform::Custom,
            unison_count: 3,
            ..short_params()
        };
        let mut v = Voice::synthesized(start(1, 1.0), 100.0, &params, Some(set.table_for(100.0)), SR);
        assert_eq!(v.wavetable().map(|t| t.harmonic_count()), Some(64));

        v.retune(5000.0, Some(set.table_for(5000.0)));
        let VoiceSource::Synth(layers) = &v.source else {
            panic!("expected synth source");
        };
        for layer in layers {
            let table = layer.osc.table().expect("custom layer keeps a table");
            assert!(Arc::ptr_eq(table, &set.table_for(5000.0)));
            assert_eq!(table.harmonic_count(), 4);
        }
    }

    #[test]
    fn retune_leaves_builtin_shapes_without_table() {
        let mut v = Voice::synthesized(start(1, 1.0), 220.0, &short_params(), None, SR);
        let set = WavetableSet::new(&[0.0, 1.0, 0.0, -1.0], SR);
        v.retune(440.0, Some(set.table_for(440.0)));
        assert!(v.wavetable().is_none());
        assert_eq!(v.frequency, 440.0);
    }

    #[test]
    fn percussive_voice_ignores_release_and_self_retires() {
        let buffer = Arc::new(SampleBuffer::mono(vec![0.5; 200], 44100));
        let player = SamplePlayer::new(buffer, 36, 36, SR);
        let mut v = Voice::sampled(start(36, 1.0), 65.4, player, true, &short_params(), SR);

        v.release();
        assert!(!v.is_released());
        assert!(!v.is_held());

        let (l, _) = v.next_frame(&CTX);
        assert_eq!(l, 0.5);
        for _ in 0..199 {
            v.next_frame(&CTX);
        }
        assert!(v.is_finished());
    }

    #[test]
    fn sampled_voice_is_enveloped_and_filtered() {
        let buffer = Arc::new(SampleBuffer::mono(vec![1.0; 44100], 44100));
        let player = SamplePlayer::new(buffer, 60, 60, SR);
        let mut v = Voice::sampled(start(60, 1.0), 261.6, player, false, &short_params(), SR);
        assert!(v.is_held());
        // First frame sits at the bottom of the attack ramp.
        let (l, _) = v.next_frame(&CTX);
        assert!(l < 0.1, "attack should start near silence, got {l}");
    }

    #[test]
    fn retune_moves_every_layer() {
        let params = SynthParams {
            unison_count: 3,
            ..short_params()
        };
        let mut v = Voice::synthesized(start(0, 1.0), 220.0, &params, None, SR);
        v.retune(330.0, None);
        let VoiceSource::Synth(layers) = &v.source else {
            panic!("expected synth source");
        };
        assert!(layers.iter().all(|l| l.osc.frequency == 330.0));
    }
}
