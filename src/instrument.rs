//! Instrument registry.
//!
//! Instruments are immutable descriptors keyed by id. Sample-backed
//! instruments name their buffers by sample key; the buffers themselves load
//! asynchronously and sit in the registry as `Pending`, `Ready` or `Failed`.
//! Selecting an instrument is a configuration change and never touches
//! sounding voices.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::dsp::sampler::SampleBuffer;
use crate::error::LoadError;

pub type InstrumentId = String;

/// Id of the built-in synthesizer instrument.
pub const SYNTH_INSTRUMENT: &str = "synth";

/// Id given to the `index`th user-imported sample.
pub fn user_sample_id(index: u32) -> InstrumentId {
    format!("user-sample-{index}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentDefinition {
    /// Synthesize from the current waveform and envelope parameters.
    Synth,
    /// Play one sample, pitch-shifted from `root_note`.
    Sampled { sample: String, root_note: u8 },
    /// One-shot samples per note, with a fallback for unmapped notes.
    DrumKit {
        map: BTreeMap<u8, String>,
        fallback: String,
    },
}

#[derive(Debug, Clone)]
pub enum LoadState {
    Pending,
    Ready(Arc<SampleBuffer>),
    Failed(LoadError),
}

/// How a note on the selected instrument should sound.
#[derive(Debug, Clone)]
pub enum Resolved {
    Synth,
    Sample {
        buffer: Arc<SampleBuffer>,
        root_note: u8,
        percussive: bool,
    },
    /// The sample is still loading; defer the note.
    Pending(String),
    /// The sample failed or was never registered; the note is silent.
    Unavailable,
}

#[derive(Debug)]
pub struct InstrumentRegistry {
    instruments: HashMap<InstrumentId, InstrumentDefinition>,
    samples: HashMap<String, LoadState>,
    selected: InstrumentId,
    next_user_id: u32,
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        InstrumentRegistry::new()
    }
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        let mut instruments = HashMap::new();
        instruments.insert(SYNTH_INSTRUMENT.to_string(), InstrumentDefinition::Synth);
        InstrumentRegistry {
            instruments,
            samples: HashMap::new(),
            selected: SYNTH_INSTRUMENT.to_string(),
            next_user_id: 1,
        }
    }

    /// Add or replace an instrument definition.
    pub fn insert(&mut self, id: impl Into<InstrumentId>, definition: InstrumentDefinition) {
        self.instruments.insert(id.into(), definition);
    }

    pub fn get(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instruments.contains_key(id)
    }

    /// Generate the id for the next user-imported sample instrument.
    pub fn next_user_id(&mut self) -> InstrumentId {
        let id = user_sample_id(self.next_user_id);
        self.next_user_id += 1;
        id
    }

    /// Index the next generated user id will carry.
    pub fn peek_user_index(&self) -> u32 {
        self.next_user_id
    }

    pub fn select(&mut self, id: &str) -> Result<(), LoadError> {
        if !self.instruments.contains_key(id) {
            return Err(LoadError::UnknownInstrument(id.to_string()));
        }
        self.selected = id.to_string();
        Ok(())
    }

    pub fn selected(&self) -> &str {
        &self.selected
    }

    /// Mark a sample as loading.
    pub fn begin_load(&mut self, key: impl Into<String>) {
        self.samples.insert(key.into(), LoadState::Pending);
    }

    /// Record the outcome of a load.
    pub fn complete_load(&mut self, key: impl Into<String>, result: Result<Arc<SampleBuffer>, LoadError>) {
        let key = key.into();
        let state = match result {
            Ok(buffer) => LoadState::Ready(buffer),
            Err(e) => {
                warn!(sample = %key, error = %e, "sample failed to load; instrument stays silent");
                LoadState::Failed(e)
            }
        };
        self.samples.insert(key, state);
    }

    pub fn load_state(&self, key: &str) -> Option<&LoadState> {
        self.samples.get(key)
    }

    /// Resolve `note` against the selected instrument.
    pub fn resolve(&self, note: u8) -> Resolved {
        let Some(definition) = self.instruments.get(&self.selected) else {
            return Resolved::Unavailable;
        };
        match definition {
            InstrumentDefinition::Synth => Resolved::Synth,
            InstrumentDefinition::Sampled { sample, root_note } => {
                self.resolve_sample(sample, *root_note, false)
            }
            InstrumentDefinition::DrumKit { map, fallback } => {
                let key = map.get(&note).unwrap_or(fallback);
                // Drum hits play at their recorded pitch.
                self.resolve_sample(key, note, true)
            }
        }
    }

    fn resolve_sample(&self, key: &str, root_note: u8, percussive: bool) -> Resolved {
        match self.samples.get(key) {
            Some(LoadState::Ready(buffer)) => Resolved::Sample {
                buffer: Arc::clone(buffer),
                root_note,
                percussive,
            },
            Some(LoadState::Pending) => Resolved::Pending(key.to_string()),
            Some(LoadState::Failed(_)) | None => Resolved::Unavailable,
        }
    }
}
