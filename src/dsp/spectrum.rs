//! Fourier analysis of a drawn single-cycle waveform and its band-limited
//! reconstruction.
//!
//! The harmonic count depends on the pitch the wave will be played at:
//! nothing above Nyquist is ever generated, so a spectrum (and the wavetable
//! built from it) belongs to one fundamental frequency. A [`WavetableSet`]
//! prebuilds every table a cycle can need so playback only looks one up.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::Serialize;

/// Upper bound on reconstructed harmonics regardless of pitch.
pub const MAX_HARMONICS: usize = 64;

/// Samples in one reconstructed wavetable cycle.
pub const TABLE_SIZE: usize = 2048;

/// Cosine/sine coefficient pairs. Index 0 is the DC term; its sine is always 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    pub cosine: Vec<f64>,
    pub sine: Vec<f64>,
}

impl Spectrum {
    /// Number of harmonics above DC.
    pub fn harmonic_count(&self) -> usize {
        self.cosine.len().saturating_sub(1)
    }
}

/// Harmonics that fit a buffer of `len` samples played at `frequency`.
///
/// `min(64, len / 2, nyquist / frequency)`. A non-positive or non-finite
/// frequency only applies the first two bounds.
pub fn harmonic_limit(len: usize, frequency: f64, sample_rate: f64) -> usize {
    let by_buffer = MAX_HARMONICS.min(len / 2);
    let nyquist = sample_rate / 2.0;
    if frequency > 0.0 && frequency.is_finite() && nyquist.is_finite() {
        let by_nyquist = (nyquist / frequency).floor().max(0.0);
        by_buffer.min(by_nyquist as usize)
    } else {
        by_buffer
    }
}

/// Compute the discrete Fourier series of `buffer` for playback at `frequency`.
///
/// Coefficient `k` is scaled by `2 / M` (M = buffer length). Samples are
/// clamped to [-1, 1] and non-finite samples read as silence, so the result
/// never holds NaN or infinity.
pub fn build_spectrum(buffer: &[f32], frequency: f64, sample_rate: f64) -> Spectrum {
    analyze(buffer, harmonic_limit(buffer.len(), frequency, sample_rate))
}

/// First `harmonics` coefficients of `buffer`, from one forward FFT.
fn analyze(buffer: &[f32], harmonics: usize) -> Spectrum {
    let m = buffer.len();
    if m == 0 {
        return Spectrum {
            cosine: vec![0.0],
            sine: vec![0.0],
        };
    }

    let mut bins: Vec<Complex<f64>> = buffer
        .iter()
        .map(|&x| {
            let x = if x.is_finite() { x.clamp(-1.0, 1.0) as f64 } else { 0.0 };
            Complex::new(x, 0.0)
        })
        .collect();
    FftPlanner::new().plan_fft_forward(m).process(&mut bins);

    // X[k] = sum x cos - i sum x sin, so the sine term is -Im.
    let scale = 2.0 / m as f64;
    let kept = &bins[..=harmonics.min(m / 2)];
    let cosine = kept.iter().map(|c| c.re * scale).collect();
    let sine = kept
        .iter()
        .enumerate()
        .map(|(k, c)| if k == 0 { 0.0 } else { -c.im * scale })
        .collect();

    Spectrum { cosine, sine }
}

/// Add harmonic `k` of `spectrum` to an unnormalized cycle.
fn accumulate_harmonic(samples: &mut [f64], spectrum: &Spectrum, k: usize) {
    let (c, s) = (spectrum.cosine[k], spectrum.sine[k]);
    for (i, out) in samples.iter_mut().enumerate() {
        let angle = 2.0 * PI * i as f64 / TABLE_SIZE as f64 * k as f64;
        *out += c * angle.cos() + s * angle.sin();
    }
}

/// One band-limited cycle rendered from a [`Spectrum`], peak-normalized.
#[derive(Debug, Clone)]
pub struct Wavetable {
    samples: Vec<f64>,
    harmonics: usize,
}

impl Wavetable {
    /// Sum the harmonics into a table. The DC term is dropped so the voice
    /// stays centered, and the cycle is normalized to a peak of 1.
    pub fn from_spectrum(spectrum: &Spectrum) -> Self {
        let mut samples = vec![0.0; TABLE_SIZE];
        for k in 1..spectrum.cosine.len() {
            accumulate_harmonic(&mut samples, spectrum, k);
        }
        Wavetable::normalized(samples, spectrum.harmonic_count())
    }

    fn normalized(mut samples: Vec<f64>, harmonics: usize) -> Self {
        let peak = samples.iter().fold(0.0_f64, |p, s| p.max(s.abs()));
        if peak > 1e-9 {
            samples.iter_mut().for_each(|s| *s /= peak);
        }
        Wavetable { samples, harmonics }
    }

    /// Harmonics summed into this table.
    pub fn harmonic_count(&self) -> usize {
        self.harmonics
    }

    /// Read the table at `phase` in [0, 1) with linear interpolation.
    pub fn read(&self, phase: f64) -> f64 {
        let pos = phase.rem_euclid(1.0) * TABLE_SIZE as f64;
        let idx = pos as usize % TABLE_SIZE;
        let next = (idx + 1) % TABLE_SIZE;
        let frac = pos - pos.floor();
        self.samples[idx] * (1.0 - frac) + self.samples[next] * frac
    }
}

/// Every band-limited table one custom cycle needs at one sample rate.
///
/// A table depends only on how many harmonics fit below Nyquist, so the set
/// holds one table per harmonic count. Building it is the expensive part;
/// [`WavetableSet::table_for`] only clones an `Arc`.
#[derive(Debug, Clone)]
pub struct WavetableSet {
    /// Indexed by harmonic count.
    tables: Vec<Arc<Wavetable>>,
    cycle_len: usize,
    sample_rate: f64,
}

impl WavetableSet {
    pub fn new(cycle: &[f32], sample_rate: f64) -> Self {
        let max = harmonic_limit(cycle.len(), 0.0, sample_rate);
        let spectrum = analyze(cycle, max);

        let mut samples = vec![0.0; TABLE_SIZE];
        let mut tables = Vec::with_capacity(spectrum.cosine.len());
        tables.push(Arc::new(Wavetable::normalized(samples.clone(), 0)));
        for k in 1..spectrum.cosine.len() {
            accumulate_harmonic(&mut samples, &spectrum, k);
            tables.push(Arc::new(Wavetable::normalized(samples.clone(), k)));
        }

        WavetableSet {
            tables,
            cycle_len: cycle.len(),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of distinct tables held.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The table for playback at `frequency`.
    pub fn table_for(&self, frequency: f64) -> Arc<Wavetable> {
        let harmonics = harmonic_limit(self.cycle_len, frequency, self.sample_rate);
        let index = harmonics.min(self.tables.len().saturating_sub(1));
        Arc::clone(&self.tables[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn saw_cycle(len: usize) -> Vec<f32> {
        (0..len).map(|i| 2.0 * i as f32 / len as f32 - 1.0).collect()
    }

    #[test]
    fn harmonic_count_respects_nyquist_and_cap() {
        let cycle = saw_cycle(512);
        for &f in &[20.0, 55.0, 440.0, 1000.0, 5000.0, 11025.0, 20000.0, 30000.0] {
            let s = build_spectrum(&cycle, f, 44100.0);
            let by_nyquist = (22050.0_f64 / f).floor() as usize;
            assert!(s.harmonic_count() <= by_nyquist, "f={f}");
            assert!(s.harmonic_count() <= MAX_HARMONICS, "f={f}");
            assert!(s.cosine.iter().chain(&s.sine).all(|c| c.is_finite()));
        }
    }

    #[test]
    fn low_notes_get_the_full_harmonic_budget() {
        let s = build_spectrum(&saw_cycle(512), 55.0, 44100.0);
        assert_eq!(s.harmonic_count(), 64);
    }

    #[test]
    fn tiny_buffers_do_not_produce_nan() {
        for len in 0..4 {
            let buffer = vec![0.5_f32; len];
            let s = build_spectrum(&buffer, 440.0, 44100.0);
            assert!(s.harmonic_count() <= 1, "len={len}");
            assert!(s.cosine.iter().chain(&s.sine).all(|c| c.is_finite()));
        }
    }

    #[test]
    fn non_finite_input_reads_as_silence() {
        let buffer = vec![f32::NAN, f32::INFINITY, 0.0, -1.0, 1.0, 0.0, 0.0, 0.0];
        let s = build_spectrum(&buffer, 440.0, 44100.0);
        assert!(s.cosine.iter().chain(&s.sine).all(|c| c.is_finite()));
    }

    #[test]
    fn dc_sine_is_zero_and_scaled_by_two_over_m() {
        let buffer = vec![0.25_f32; 16];
        let s = build_spectrum(&buffer, 100.0, 44100.0);
        assert_eq!(s.sine[0], 0.0);
        assert_abs_diff_eq!(s.cosine[0], 0.5, epsilon = 1e-12);
        for k in 1..=s.harmonic_count() {
            assert_abs_diff_eq!(s.cosine[k], 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(s.sine[k], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn pure_sine_lands_in_first_harmonic() {
        let buffer: Vec<f32> = (0..64)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 64.0).sin())
            .collect();
        let s = build_spectrum(&buffer, 440.0, 44100.0);
        assert_abs_diff_eq!(s.sine[1], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s.cosine[1], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s.sine[2], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn wavetable_is_normalized() {
        let s = build_spectrum(&saw_cycle(256), 220.0, 44100.0);
        let table = Wavetable::from_spectrum(&s);
        let peak = (0..TABLE_SIZE)
            .map(|i| table.read(i as f64 / TABLE_SIZE as f64).abs())
            .fold(0.0, f64::max);
        assert_abs_diff_eq!(peak, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fft_analysis_matches_direct_sum() {
        let cycle: Vec<f32> = (0..100)
            .map(|i| ((i * i) % 17) as f32 / 8.5 - 1.0)
            .collect();
        let s = build_spectrum(&cycle, 100.0, 44100.0);
        let m = cycle.len() as f64;
        for k in 0..=s.harmonic_count() {
            let (mut re, mut im) = (0.0, 0.0);
            for (j, &x) in cycle.iter().enumerate() {
                let angle = 2.0 * PI * (k * j) as f64 / m;
                re += x as f64 * angle.cos();
                im += x as f64 * angle.sin();
            }
            assert_abs_diff_eq!(s.cosine[k], re * 2.0 / m, epsilon = 1e-9);
            if k > 0 {
                assert_abs_diff_eq!(s.sine[k], im * 2.0 / m, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn set_picks_the_table_that_fits_below_nyquist() {
        let cycle = saw_cycle(2048);
        let set = WavetableSet::new(&cycle, 44100.0);
        assert_eq!(set.len(), MAX_HARMONICS + 1);
        for &f in &[8.0, 100.0, 440.0, 2000.0, 5000.0, 12000.0, 30000.0] {
            let expected = build_spectrum(&cycle, f, 44100.0).harmonic_count();
            assert_eq!(set.table_for(f).harmonic_count(), expected, "f={f}");
        }
    }

    #[test]
    fn set_tables_match_direct_reconstruction() {
        let cycle = saw_cycle(256);
        let set = WavetableSet::new(&cycle, 44100.0);
        let direct = Wavetable::from_spectrum(&build_spectrum(&cycle, 880.0, 44100.0));
        let table = set.table_for(880.0);
        for i in 0..64 {
            let phase = i as f64 / 64.0;
            assert_abs_diff_eq!(table.read(phase), direct.read(phase), epsilon = 1e-9);
        }
    }

    #[test]
    fn same_band_shares_one_table() {
        let set = WavetableSet::new(&saw_cycle(512), 44100.0);
        assert!(Arc::ptr_eq(&set.table_for(30.0), &set.table_for(40.0)));
        assert!(!Arc::ptr_eq(&set.table_for(440.0), &set.table_for(4400.0)));
    }

    #[test]
    fn empty_cycle_set_is_silent() {
        let set = WavetableSet::new(&[], 44100.0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.table_for(440.0).read(0.25), 0.0);
    }

    #[test]
    fn silent_cycle_gives_silent_table() {
        let s = build_spectrum(&[0.0; 32], 220.0, 44100.0);
        let table = Wavetable::from_spectrum(&s);
        assert_eq!(table.read(0.3), 0.0);
    }
}
