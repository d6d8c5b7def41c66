//! Voice Manager: polyphony cap, stealing and retirement.
//!
//! Live voices sit in a slot arena. A side map from caller id to slot tracks
//! which voice a note-off should release; released and percussive voices
//! drop out of it but keep sounding until their tails finish. The legacy
//! drone lives outside the arena: it never counts toward the cap and is
//! never stolen.

use std::collections::HashMap;

use slotmap::{DefaultKey, SlotMap};
use tracing::debug;

use super::voice::{Voice, VoiceContext, VoiceId};
use crate::params::MAX_VOICES;

pub type VoiceKey = DefaultKey;

#[derive(Debug)]
struct Entry {
    voice: Voice,
    /// Insertion order; breaks ties between voices started on the same frame.
    order: u64,
}

#[derive(Debug)]
pub struct VoiceManager {
    voices: SlotMap<VoiceKey, Entry>,
    held: HashMap<VoiceId, VoiceKey>,
    drone: Option<Voice>,
    max_voices: usize,
    next_order: u64,
}

impl VoiceManager {
    pub fn new(max_voices: usize) -> Self {
        let max_voices = clamp_voices(max_voices);
        let capacity = MAX_VOICES.max as usize;
        VoiceManager {
            voices: SlotMap::with_capacity(capacity),
            held: HashMap::with_capacity(capacity * 2),
            drone: None,
            max_voices,
            next_order: 0,
        }
    }

    /// Live voices, excluding the drone.
    pub fn count(&self) -> usize {
        self.voices.len()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Lower or raise the cap. Lowering steals the oldest voices until the
    /// count fits.
    pub fn set_max_voices(&mut self, max_voices: usize) {
        self.max_voices = clamp_voices(max_voices);
        while self.voices.len() > self.max_voices {
            if self.steal_oldest().is_none() {
                break;
            }
        }
    }

    /// True when `id` has a held voice: a sustaining note that has not been
    /// released.
    pub fn is_sustaining(&self, id: VoiceId) -> bool {
        self.held
            .get(&id)
            .and_then(|key| self.voices.get(*key))
            .is_some_and(|entry| entry.voice.is_held())
    }

    /// Add a voice, stealing the oldest ones first if the cap is reached.
    pub fn insert(&mut self, voice: Voice) -> VoiceKey {
        while self.voices.len() >= self.max_voices {
            if self.steal_oldest().is_none() {
                break;
            }
        }

        let id = voice.id;
        let held = voice.is_held();
        let order = self.next_order;
        self.next_order += 1;
        let key = self.voices.insert(Entry { voice, order });
        if held {
            self.held.insert(id, key);
        }
        key
    }

    /// Remove the voice with the earliest start, returning it.
    pub fn steal_oldest(&mut self) -> Option<Voice> {
        let key = self
            .voices
            .iter()
            .min_by_key(|(_, entry)| (entry.voice.started_at, entry.order))
            .map(|(key, _)| key)?;
        let entry = self.voices.remove(key)?;
        if self.held.get(&entry.voice.id) == Some(&key) {
            self.held.remove(&entry.voice.id);
        }
        debug!(
            id = entry.voice.id,
            note = entry.voice.note,
            started_at = entry.voice.started_at,
            "stealing voice"
        );
        Some(entry.voice)
    }

    /// Release the held voice for `id`. Returns false if there was none.
    pub fn note_off(&mut self, id: VoiceId) -> bool {
        let Some(key) = self.held.remove(&id) else {
            return false;
        };
        match self.voices.get_mut(key) {
            Some(entry) => {
                entry.voice.release();
                true
            }
            None => false,
        }
    }

    /// Release every voice and the drone.
    pub fn all_notes_off(&mut self) {
        for (_, entry) in self.voices.iter_mut() {
            entry.voice.release();
        }
        self.held.clear();
        if let Some(drone) = &mut self.drone {
            drone.release();
        }
    }

    /// Install a new drone, replacing any previous one.
    pub fn start_drone(&mut self, voice: Voice) {
        self.drone = Some(voice);
    }

    pub fn stop_drone(&mut self) -> bool {
        match &mut self.drone {
            Some(drone) if !drone.is_released() => {
                drone.release();
                true
            }
            _ => false,
        }
    }

    pub fn drone(&self) -> Option<&Voice> {
        self.drone.as_ref()
    }

    pub fn drone_mut(&mut self) -> Option<&mut Voice> {
        self.drone.as_mut()
    }

    pub fn has_drone(&self) -> bool {
        self.drone.is_some()
    }

    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.values().map(|entry| &entry.voice)
    }

    /// Every voice including the drone.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Voice)) {
        for entry in self.voices.values_mut() {
            f(&mut entry.voice);
        }
        if let Some(drone) = &mut self.drone {
            f(drone);
        }
    }

    /// Sum one frame of every voice and the drone.
    pub fn next_frame(&mut self, ctx: &VoiceContext) -> (f64, f64) {
        let mut out = (0.0, 0.0);
        for entry in self.voices.values_mut() {
            let (l, r) = entry.voice.next_frame(ctx);
            out.0 += l;
            out.1 += r;
        }
        if let Some(drone) = &mut self.drone {
            let (l, r) = drone.next_frame(ctx);
            out.0 += l;
            out.1 += r;
        }
        out
    }

    /// Drop voices whose tails have finished.
    pub fn retire_finished(&mut self) {
        self.voices.retain(|_, entry| !entry.voice.is_finished());
        let voices = &self.voices;
        self.held.retain(|_, key| voices.contains_key(*key));
        if self.drone.as_ref().is_some_and(Voice::is_finished) {
            self.drone = None;
        }
    }
}

fn clamp_voices(max_voices: usize) -> usize {
    max_voices.clamp(MAX_VOICES.min as usize, MAX_VOICES.max as usize)
}
