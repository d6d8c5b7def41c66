//! Synth: the engine that owns every voice and shared node.
//!
//! Note events and parameter changes are plain method calls on one owning
//! struct. The real-time wrapper in [`crate::realtime`] feeds them in at the
//! top of each block; the offline renderer calls them directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::chain::ToneChain;
use super::lfo::ModulationRouter;
use super::oscillator::Waveform;
use super::pitch::{A4_HZ, midi_to_frequency};
use super::sampler::{SampleBuffer, SamplePlayer};
use super::spectrum::{Wavetable, WavetableSet};
use super::voice::{NoteStart, Voice, VoiceContext, VoiceId};
use super::voices::VoiceManager;
use crate::decode::{DefaultDecoder, SampleDecoder};
use crate::error::{EngineError, LoadError};
use crate::instrument::{InstrumentDefinition, InstrumentId, InstrumentRegistry, Resolved};
use crate::params::{Param, SynthParams};

/// Voice id reserved for the legacy drone.
pub const DRONE_ID: VoiceId = VoiceId::MAX;

/// A note-on waiting for its sample to finish loading.
#[derive(Debug, Clone, PartialEq)]
struct DeferredNote {
    id: VoiceId,
    note: u8,
    velocity: f64,
    sample: String,
}

#[derive(Debug)]
pub struct Synth {
    sample_rate: f64,
    params: SynthParams,
    voices: VoiceManager,
    router: ModulationRouter,
    chain: ToneChain,
    instruments: InstrumentRegistry,
    deferred: Vec<DeferredNote>,
    /// Prebuilt tables for the custom waveform.
    custom_tables: Option<Arc<WavetableSet>>,
    /// Frames rendered so far; voices are stamped with it at note-on.
    frame: u64,
    next_seed: u64,
}

impl Synth {
    pub fn new(sample_rate: f64) -> Self {
        Synth::with_params(SynthParams::default(), sample_rate)
    }

    pub fn with_params(params: SynthParams, sample_rate: f64) -> Self {
        let params = params.clamped();
        Synth::build(ToneChain::new(&params, sample_rate), params, sample_rate)
    }

    /// An engine for isolated offline renders: delay and reverb sends off.
    pub fn offline(params: SynthParams, sample_rate: f64) -> Self {
        let params = params.clamped();
        Synth::build(ToneChain::dry(&params, sample_rate), params, sample_rate)
    }

    fn build(chain: ToneChain, params: SynthParams, sample_rate: f64) -> Self {
        let mut router = ModulationRouter::new(params.lfo_rate, sample_rate);
        router.set_vibrato_depth(params.vibrato_depth);
        router.set_filter_depth(params.filter_lfo_depth);
        router.set_tremolo_depth(params.tremolo_depth);

        Synth {
            sample_rate,
            voices: VoiceManager::new(params.max_voices),
            router,
            chain,
            instruments: InstrumentRegistry::new(),
            deferred: Vec::new(),
            custom_tables: None,
            frame: 0,
            next_seed: 1,
            params,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn params(&self) -> &SynthParams {
        &self.params
    }

    /// Live voices, not counting the drone.
    pub fn voice_count(&self) -> usize {
        self.voices.count()
    }

    pub fn voices(&self) -> &VoiceManager {
        &self.voices
    }

    pub fn has_drone(&self) -> bool {
        self.voices.has_drone()
    }

    /// Note-ons waiting on a sample load.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn instruments(&self) -> &InstrumentRegistry {
        &self.instruments
    }

    /// Frames rendered since construction.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn next_start(&mut self, id: VoiceId, note: u8, velocity: f64) -> NoteStart {
        let seed = self.next_seed;
        self.next_seed = self.next_seed.wrapping_add(1);
        NoteStart {
            id,
            note,
            velocity,
            started_at: self.frame,
            seed,
        }
    }

    /// Start a note. `id` defaults to the note number.
    ///
    /// A held note with the same id on a sustaining instrument is left alone.
    /// A note on an instrument whose sample is still loading is deferred
    /// until the load completes.
    pub fn note_on(&mut self, note: u8, velocity: f64, id: Option<VoiceId>) {
        let id = id.unwrap_or(note as VoiceId);
        let velocity = if velocity.is_finite() {
            velocity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let frequency = midi_to_frequency(note as i32, A4_HZ);

        match self.instruments.resolve(note) {
            Resolved::Synth => {
                if self.voices.is_sustaining(id) {
                    return;
                }
                let table = self.wavetable_for(frequency);
                let start = self.next_start(id, note, velocity);
                let voice =
                    Voice::synthesized(start, frequency, &self.params, table, self.sample_rate);
                self.voices.insert(voice);
            }
            Resolved::Sample {
                buffer,
                root_note,
                percussive,
            } => {
                if !percussive && self.voices.is_sustaining(id) {
                    return;
                }
                let player = SamplePlayer::new(buffer, note, root_note, self.sample_rate);
                let start = self.next_start(id, note, velocity);
                let voice = Voice::sampled(
                    start,
                    frequency,
                    player,
                    percussive,
                    &self.params,
                    self.sample_rate,
                );
                self.voices.insert(voice);
            }
            Resolved::Pending(sample) => {
                debug!(id, note, sample = %sample, "deferring note-on until sample loads");
                self.deferred.retain(|d| d.id != id);
                self.deferred.push(DeferredNote {
                    id,
                    note,
                    velocity,
                    sample,
                });
            }
            Resolved::Unavailable => {
                debug!(id, note, instrument = self.instruments.selected(), "instrument has no playable sample");
            }
        }
    }

    /// Release the note for `id`, or cancel it if it is still deferred.
    pub fn note_off(&mut self, id: VoiceId) {
        self.deferred.retain(|d| d.id != id);
        self.voices.note_off(id);
    }

    pub fn all_notes_off(&mut self) {
        self.deferred.clear();
        self.voices.all_notes_off();
    }

    /// Start the single sustained tone at the base frequency.
    pub fn start_drone(&mut self) {
        let frequency = self.params.base_frequency;
        let table = self.wavetable_for(frequency);
        let start = self.next_start(DRONE_ID, 69, 1.0);
        let voice = Voice::synthesized(start, frequency, &self.params, table, self.sample_rate);
        self.voices.start_drone(voice);
    }

    pub fn stop_drone(&mut self) {
        self.voices.stop_drone();
    }

    /// Apply one parameter change. Values are clamped; changes that affect
    /// sounding voices reach them immediately.
    pub fn set_param(&mut self, param: Param) {
        self.params.apply(param);
        let p = &self.params;
        match param {
            Param::BaseFrequency(_) => {
                let (frequency, cutoff, keytrack) = (p.base_frequency, p.filter_cutoff, p.keytrack);
                let table = self.wavetable_for(frequency);
                if let Some(drone) = self.voices.drone_mut() {
                    drone.retune(frequency, table);
                    drone.set_filter_base(cutoff, keytrack);
                }
            }
            Param::FilterCutoff(_) | Param::Keytrack(_) => {
                let (cutoff, keytrack) = (p.filter_cutoff, p.keytrack);
                self.chain.set_cutoff(cutoff);
                self.voices
                    .for_each_mut(|voice| voice.set_filter_base(cutoff, keytrack));
            }
            Param::FilterResonance(_) => self.chain.set_resonance(p.filter_resonance),
            Param::Distortion(_) => self.chain.set_distortion(p.distortion),
            Param::MasterGain(_) => self.chain.set_master_gain(p.master_gain),
            Param::LfoRate(_) => self.router.set_rate(p.lfo_rate),
            Param::VibratoDepth(_) => self.router.set_vibrato_depth(p.vibrato_depth),
            Param::FilterLfoDepth(_) => self.router.set_filter_depth(p.filter_lfo_depth),
            Param::TremoloDepth(_) => self.router.set_tremolo_depth(p.tremolo_depth),
            Param::DelayTime(_) => self.chain.set_delay_time(p.delay_time),
            Param::DelayFeedback(_) => self.chain.set_delay_feedback(p.delay_feedback),
            Param::DelayMix(_) => self.chain.set_delay_mix(p.delay_mix),
            Param::ReverbSize(_) => {
                if p.reverb_size != self.chain.reverb_size() {
                    self.chain.set_reverb_size(p.reverb_size);
                }
            }
            Param::ReverbMix(_) => self.chain.set_reverb_mix(p.reverb_mix),
            Param::MaxVoices(_) => self.voices.set_max_voices(p.max_voices),
            // Read at the next note-on.
            Param::Waveform(_)
            | Param::AmpEnvelope(_)
            | Param::FilterEnvelope(_)
            | Param::FilterEnvDepth(_)
            | Param::AmpVelocitySensitivity(_)
            | Param::FilterVelocitySensitivity(_)
            | Param::UnisonCount(_)
            | Param::UnisonDetune(_)
            | Param::StereoSpread(_)
            | Param::NoiseLevel(_) => {}
        }
    }

    /// Install a prebuilt reverb, e.g. one generated off the audio thread.
    pub fn set_reverb(&mut self, reverb: super::reverb::ConvolutionReverb) {
        self.params.reverb_size = reverb.size();
        self.chain.set_reverb(reverb);
    }

    /// Replace the single-cycle custom waveform, building its tables here.
    /// Real-time hosts build them on the control thread instead and use
    /// [`Synth::set_custom_wavetables`].
    pub fn set_custom_waveform(&mut self, cycle: &[f32]) {
        self.custom_tables = Some(Arc::new(WavetableSet::new(cycle, self.sample_rate)));
    }

    /// Install tables built for this engine's sample rate.
    pub fn set_custom_wavetables(&mut self, tables: Arc<WavetableSet>) {
        if tables.sample_rate() != self.sample_rate {
            warn!(
                tables = tables.sample_rate(),
                engine = self.sample_rate,
                "custom wavetables built for another sample rate; ignored"
            );
            return;
        }
        self.custom_tables = Some(tables);
    }

    pub fn custom_wavetables(&self) -> Option<&Arc<WavetableSet>> {
        self.custom_tables.as_ref()
    }

    /// Band-limited table for `frequency`, when the custom waveform is active.
    fn wavetable_for(&self, frequency: f64) -> Option<Arc<Wavetable>> {
        if self.params.waveform != Waveform::Custom {
            return None;
        }
        self.custom_tables
            .as_ref()
            .map(|tables| tables.table_for(frequency))
    }

    pub fn select_instrument(&mut self, id: &str) -> Result<(), EngineError> {
        Ok(self.instruments.select(id)?)
    }

    pub fn add_instrument(&mut self, id: impl Into<InstrumentId>, definition: InstrumentDefinition) {
        self.instruments.insert(id, definition);
    }

    /// Decode `bytes` and register them as a new sampled instrument.
    pub fn register_sample_instrument(
        &mut self,
        bytes: &[u8],
        root_note: u8,
    ) -> Result<InstrumentId, EngineError> {
        self.register_sample_instrument_with(&DefaultDecoder, bytes, root_note)
    }

    pub fn register_sample_instrument_with(
        &mut self,
        decoder: &dyn SampleDecoder,
        bytes: &[u8],
        root_note: u8,
    ) -> Result<InstrumentId, EngineError> {
        let audio = decoder.decode(bytes)?;
        Ok(self.register_sample_buffer(Arc::new(SampleBuffer::from(audio)), root_note))
    }

    /// Register an already decoded buffer as a new sampled instrument.
    pub fn register_sample_buffer(&mut self, buffer: Arc<SampleBuffer>, root_note: u8) -> InstrumentId {
        let id = self.instruments.next_user_id();
        self.add_sampled_instrument(id.clone(), buffer, root_note);
        id
    }

    /// Register a buffer under a caller-chosen id.
    pub fn add_sampled_instrument(&mut self, id: InstrumentId, buffer: Arc<SampleBuffer>, root_note: u8) {
        self.instruments.complete_load(id.clone(), Ok(buffer));
        self.instruments.insert(
            id.clone(),
            InstrumentDefinition::Sampled {
                sample: id,
                root_note,
            },
        );
    }

    pub fn register_drum_kit(
        &mut self,
        id: impl Into<InstrumentId>,
        map: BTreeMap<u8, String>,
        fallback: impl Into<String>,
    ) {
        self.instruments.insert(
            id,
            InstrumentDefinition::DrumKit {
                map,
                fallback: fallback.into(),
            },
        );
    }

    /// Mark a sample key as loading; notes that need it will be deferred.
    pub fn begin_sample_load(&mut self, key: impl Into<String>) {
        self.instruments.begin_load(key);
    }

    /// Record a finished load and retry the note-ons that waited on it, once.
    pub fn finish_sample_load(&mut self, key: &str, result: Result<Arc<SampleBuffer>, LoadError>) {
        self.instruments.complete_load(key, result);

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|d| d.sample == key);
        self.deferred = waiting;
        for note in ready {
            self.note_on(note.note, note.velocity, Some(note.id));
        }
    }

    /// Render one stereo frame.
    #[inline]
    pub fn next_frame(&mut self) -> (f64, f64) {
        let modulation = self.router.next_frame();
        let ctx = VoiceContext {
            vibrato_cents: modulation.vibrato_cents,
            noise_level: self.params.noise_level,
        };
        let (l, r) = self.voices.next_frame(&ctx);
        self.frame += 1;
        self.chain.process(l, r, &modulation)
    }

    /// Render a block into separate channel buffers, then retire finished
    /// voices. Renders `min(left.len(), right.len())` frames.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let (fl, fr) = self.next_frame();
            *l = fl as f32;
            *r = fr as f32;
        }
        self.voices.retire_finished();
    }

    /// Render into an interleaved buffer of `channels` channels. Mono gets
    /// the average of both sides; channels past the second are left silent.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in out.chunks_exact_mut(channels) {
            let (l, r) = self.next_frame();
            match frame {
                [mono] => *mono = (0.5 * (l + r)) as f32,
                [left, right, rest @ ..] => {
                    *left = l as f32;
                    *right = r as f32;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
        self.voices.retire_finished();
    }
}
