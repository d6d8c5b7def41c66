//! DSP: the synthesis engine and its building blocks.
//!
//! Everything here is plain Rust with no I/O, so the same code runs in a
//! native audio callback, an AudioWorklet via WASM, and the offline renderer.

pub mod chain;
pub mod delay;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod oscillator;
pub mod pitch;
pub mod renderer;
pub mod reverb;
pub mod sampler;
pub mod shaper;
pub mod spectrum;
pub mod voice;
pub mod voices;
