pub mod capture;
pub mod decode;
pub mod dsp;
pub mod error;
pub mod instrument;
#[cfg(feature = "loader")]
pub mod loader;
pub mod params;
pub mod realtime;

use crate::dsp::renderer::{RenderedNote, render_note};
use crate::params::SynthParams;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the polyvoice-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Render one isolated note from a JSON parameter set. Missing fields take
/// their defaults and out-of-range values are clamped.
pub fn render_note_json(
    params_json: &str,
    note: u8,
    duration: f64,
    sample_rate: u32,
) -> Result<RenderedNote, serde_json::Error> {
    let params = SynthParams::from_json(params_json)?;
    Ok(render_note(&params, note, duration, sample_rate))
}

/// WASM-exposed: render one note to a mono 16-bit WAV byte array.
#[wasm_bindgen]
pub fn render_note_wav(
    params_json: &str,
    note: u8,
    duration: f64,
    sample_rate: u32,
) -> Result<Vec<u8>, JsValue> {
    let rendered = render_note_json(params_json, note, duration, sample_rate)
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(rendered.wav)
}

/// WASM-exposed: render one note to mono f32 samples.
/// Returns the raw audio buffer for AudioWorklet playback.
#[wasm_bindgen]
pub fn render_note_samples(
    params_json: &str,
    note: u8,
    duration: f64,
    sample_rate: u32,
) -> Result<Vec<f32>, JsValue> {
    let rendered = render_note_json(params_json, note, duration, sample_rate)
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(rendered.samples)
}

/// WASM-exposed: the harmonic spectrum of a drawn single cycle, limited to
/// what `frequency` can carry below Nyquist.
#[wasm_bindgen]
pub fn custom_spectrum(buffer: &[f32], frequency: f64, sample_rate: f64) -> Result<JsValue, JsValue> {
    let spectrum = dsp::spectrum::build_spectrum(buffer, frequency, sample_rate);
    serde_wasm_bindgen::to_value(&spectrum).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: the default parameter set as JSON.
#[wasm_bindgen]
pub fn default_params_json() -> Result<String, JsValue> {
    SynthParams::default()
        .to_json()
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_render_applies_defaults_and_clamps() {
        let rendered = render_note_json(r#"{"masterGain": 4.0}"#, 69, 0.5, 8000).unwrap();
        assert_eq!(rendered.samples.len(), 4000);
        assert_eq!(rendered.wav.len(), 44 + 8000);
        assert!(rendered.samples.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(render_note_json("{not json", 60, 1.0, 8000).is_err());
    }
}
