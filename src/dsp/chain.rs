//! Tone-shaping chain applied to the voice mix.
//!
//! `mix × tremolo → shared lowpass → waveshaper → master gain`, with the
//! delay and reverb sends tapped after the shaper and added back in
//! parallel.

use super::delay::Delay;
use super::filter::BiquadFilter;
use super::lfo::ModulationFrame;
use super::pitch::cents_to_ratio;
use super::reverb::ConvolutionReverb;
use super::shaper::WaveShaper;
use super::voice::CONTROL_INTERVAL;
use crate::params::{DELAY_TIME, FILTER_CUTOFF, FILTER_RESONANCE, LEVEL, MASTER_GAIN, SynthParams};

pub struct ToneChain {
    filter_l: BiquadFilter,
    filter_r: BiquadFilter,
    cutoff: f64,
    shaper: WaveShaper,
    delay: Delay,
    delay_mix: f64,
    reverb: ConvolutionReverb,
    reverb_mix: f64,
    master_gain: f64,
    /// Sends are bypassed entirely, e.g. for offline renders.
    sends_enabled: bool,
    control_counter: usize,
    sample_rate: f64,
}

impl ToneChain {
    pub fn new(params: &SynthParams, sample_rate: f64) -> Self {
        let cutoff = FILTER_CUTOFF.clamp(params.filter_cutoff);
        let q = FILTER_RESONANCE.clamp(params.filter_resonance);
        ToneChain {
            filter_l: BiquadFilter::lowpass(sample_rate, cutoff, q),
            filter_r: BiquadFilter::lowpass(sample_rate, cutoff, q),
            cutoff,
            shaper: WaveShaper::new(params.distortion),
            delay: Delay::with_params(
                sample_rate,
                DELAY_TIME.max,
                params.delay_time,
                params.delay_feedback,
            ),
            delay_mix: LEVEL.clamp(params.delay_mix),
            reverb: ConvolutionReverb::new(params.reverb_size, sample_rate),
            reverb_mix: LEVEL.clamp(params.reverb_mix),
            master_gain: MASTER_GAIN.clamp(params.master_gain),
            sends_enabled: true,
            control_counter: 0,
            sample_rate,
        }
    }

    /// Chain with delay and reverb switched off.
    pub fn dry(params: &SynthParams, sample_rate: f64) -> Self {
        let mut chain = ToneChain::new(params, sample_rate);
        chain.sends_enabled = false;
        chain
    }

    pub fn set_cutoff(&mut self, cutoff: f64) {
        self.cutoff = FILTER_CUTOFF.clamp(cutoff);
        self.control_counter = 0;
    }

    pub fn set_resonance(&mut self, q: f64) {
        let q = FILTER_RESONANCE.clamp(q);
        self.filter_l.set_q(q);
        self.filter_r.set_q(q);
    }

    pub fn set_distortion(&mut self, amount: f64) {
        self.shaper.set_amount(amount);
    }

    pub fn set_delay_time(&mut self, seconds: f64) {
        self.delay.set_delay_time(seconds);
    }

    pub fn set_delay_feedback(&mut self, feedback: f64) {
        self.delay.set_feedback(feedback);
    }

    pub fn set_delay_mix(&mut self, mix: f64) {
        self.delay_mix = LEVEL.clamp(mix);
    }

    /// Swap in a reverb with a freshly generated impulse.
    pub fn set_reverb(&mut self, reverb: ConvolutionReverb) {
        self.reverb = reverb;
    }

    /// Rebuild the impulse for a new size. Allocates; call off the audio
    /// thread or accept the cost.
    pub fn set_reverb_size(&mut self, seconds: f64) {
        self.reverb = ConvolutionReverb::new(seconds, self.sample_rate);
    }

    pub fn reverb_size(&self) -> f64 {
        self.reverb.size()
    }

    pub fn set_reverb_mix(&mut self, mix: f64) {
        let mix = LEVEL.clamp(mix);
        if self.reverb_mix == 0.0 && mix > 0.0 {
            self.reverb.clear();
        }
        self.reverb_mix = mix;
    }

    pub fn set_master_gain(&mut self, gain: f64) {
        self.master_gain = MASTER_GAIN.clamp(gain);
    }

    /// Process one stereo frame of the voice mix.
    pub fn process(&mut self, left: f64, right: f64, modulation: &ModulationFrame) -> (f64, f64) {
        if self.control_counter == 0 {
            let cutoff = FILTER_CUTOFF.clamp(self.cutoff * cents_to_ratio(modulation.filter_cents));
            self.filter_l.set_frequency(cutoff);
            self.filter_r.set_frequency(cutoff);
        }
        self.control_counter = (self.control_counter + 1) % CONTROL_INTERVAL;

        let l = left * modulation.tremolo_gain;
        let r = right * modulation.tremolo_gain;

        let mut l = self.shaper.process(self.filter_l.process(l));
        let mut r = self.shaper.process(self.filter_r.process(r));

        if self.sends_enabled {
            let (dl, dr) = self.delay.process(l as f32, r as f32);
            let (wl, wr) = if self.reverb_mix > 0.0 {
                self.reverb.process(l as f32, r as f32)
            } else {
                (0.0, 0.0)
            };
            l += dl as f64 * self.delay_mix + wl as f64 * self.reverb_mix;
            r += dr as f64 * self.delay_mix + wr as f64 * self.reverb_mix;
        }

        (l * self.master_gain, r * self.master_gain)
    }
}

impl std::fmt::Debug for ToneChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneChain")
            .field("cutoff", &self.cutoff)
            .field("distortion", &self.shaper.amount())
            .field("delay_mix", &self.delay_mix)
            .field("reverb", &self.reverb)
            .field("reverb_mix", &self.reverb_mix)
            .field("master_gain", &self.master_gain)
            .field("sends_enabled", &self.sends_enabled)
            .finish_non_exhaustive()
    }
}
