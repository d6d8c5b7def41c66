//! Pitch helpers: MIDI note numbers, frequencies and cents.

/// Reference pitch of A4 (MIDI 69) in Hz.
pub const A4_HZ: f64 = 440.0;

/// Convert a MIDI note number to frequency using the given tuning pitch.
///
/// `tuning_pitch * 2^((midi - 69) / 12)`
pub fn midi_to_frequency(midi: i32, tuning_pitch: f64) -> f64 {
    tuning_pitch * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

/// Signed distance of `frequency` from A440, in semitones.
pub fn semitones_from_a440(frequency: f64) -> f64 {
    12.0 * (frequency / A4_HZ).log2()
}

/// Frequency ratio of an interval given in cents.
pub fn cents_to_ratio(cents: f64) -> f64 {
    (2.0_f64).powf(cents / 1200.0)
}
