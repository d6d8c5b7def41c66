//! Reverb send: convolution against a synthetic decaying-noise impulse.
//!
//! The impulse is white noise under an exponential energy decay, one
//! independently seeded noise stream per channel. Convolution is uniformly
//! partitioned overlap-save in the frequency domain, so a six-second tail
//! costs a handful of complex multiplies per sample instead of a
//! quarter-million taps.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::params::REVERB_SIZE;

/// Partition length in samples; also the latency of the wet signal.
pub const PARTITION: usize = 512;

/// Natural-log decay across the impulse: about -60 dB at the tail.
const DECAY: f64 = 6.9;

/// Seed of the left impulse channel; the right uses the next seed.
pub const DEFAULT_SEED: u64 = 0x5EED_0F_2E7B;

/// Build a stereo decaying-noise impulse response `seconds` long.
///
/// Each channel is normalized to unit energy.
pub fn synthetic_impulse(seconds: f64, sample_rate: f64, seed: u64) -> [Vec<f32>; 2] {
    let len = ((REVERB_SIZE.clamp(seconds) * sample_rate).round() as usize).max(1);
    let channel = |seed: u64| {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut ir: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f64 / len as f64;
                (rng.gen_range(-1.0..1.0) * (-DECAY * t).exp()) as f32
            })
            .collect();
        let energy: f32 = ir.iter().map(|s| s * s).sum();
        if energy > 0.0 {
            let norm = energy.sqrt().recip();
            ir.iter_mut().for_each(|s| *s *= norm);
        }
        ir
    };
    [channel(seed), channel(seed.wrapping_add(1))]
}

/// Uniformly partitioned overlap-save convolver for one channel.
pub struct Convolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Spectra of the zero-padded impulse partitions.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Frequency-domain delay line of past input blocks.
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,
    /// `[previous block | current block]` of input.
    history: Vec<f32>,
    output: Vec<f32>,
    fill: usize,
    work: Vec<Complex<f32>>,
    acc: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    pub fn new(impulse: &[f32], block: usize, planner: &mut FftPlanner<f32>) -> Self {
        let block = block.max(1);
        let size = 2 * block;
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        let zero = Complex::new(0.0, 0.0);

        let mut partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(block)
            .map(|chunk| {
                let mut buf = vec![zero; size];
                for (slot, &s) in buf.iter_mut().zip(chunk) {
                    *slot = Complex::new(s, 0.0);
                }
                fft.process(&mut buf);
                buf
            })
            .collect();
        if partitions.is_empty() {
            partitions.push(vec![zero; size]);
        }

        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        Convolver {
            block,
            fdl: vec![vec![zero; size]; partitions.len()],
            fdl_pos: 0,
            partitions,
            history: vec![0.0; size],
            output: vec![0.0; block],
            fill: 0,
            work: vec![zero; size],
            acc: vec![zero; size],
            scratch: vec![zero; scratch_len],
            fft,
            ifft,
        }
    }

    /// Push one input sample, return one output sample `block` samples late.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.history[self.block + self.fill] = input;
        let out = self.output[self.fill];
        self.fill += 1;
        if self.fill == self.block {
            self.flush();
            self.fill = 0;
        }
        out
    }

    fn flush(&mut self) {
        let size = 2 * self.block;
        for (w, &h) in self.work.iter_mut().zip(&self.history) {
            *w = Complex::new(h, 0.0);
        }
        self.fft.process_with_scratch(&mut self.work, &mut self.scratch);
        self.fdl[self.fdl_pos].copy_from_slice(&self.work);

        let count = self.partitions.len();
        self.acc.fill(Complex::new(0.0, 0.0));
        for (j, h) in self.partitions.iter().enumerate() {
            let x = &self.fdl[(self.fdl_pos + count - j) % count];
            for ((a, &xv), &hv) in self.acc.iter_mut().zip(x).zip(h) {
                *a += xv * hv;
            }
        }
        self.ifft.process_with_scratch(&mut self.acc, &mut self.scratch);

        let scale = 1.0 / size as f32;
        for (o, a) in self.output.iter_mut().zip(&self.acc[self.block..]) {
            *o = a.re * scale;
        }

        self.history.copy_within(self.block..size, 0);
        self.fdl_pos = (self.fdl_pos + 1) % count;
    }

    pub fn clear(&mut self) {
        let zero = Complex::new(0.0, 0.0);
        self.fdl.iter_mut().for_each(|b| b.fill(zero));
        self.history.fill(0.0);
        self.output.fill(0.0);
        self.fill = 0;
    }
}

/// Stereo convolution reverb producing only the wet signal.
pub struct ConvolutionReverb {
    left: Convolver,
    right: Convolver,
    size: f64,
}

impl ConvolutionReverb {
    /// Build a reverb with a `size`-second synthetic impulse.
    pub fn new(size: f64, sample_rate: f64) -> Self {
        ConvolutionReverb::with_seed(size, sample_rate, DEFAULT_SEED)
    }

    pub fn with_seed(size: f64, sample_rate: f64, seed: u64) -> Self {
        let size = REVERB_SIZE.clamp(size);
        let [ir_l, ir_r] = synthetic_impulse(size, sample_rate, seed);
        let mut planner = FftPlanner::new();
        ConvolutionReverb {
            left: Convolver::new(&ir_l, PARTITION, &mut planner),
            right: Convolver::new(&ir_r, PARTITION, &mut planner),
            size,
        }
    }

    /// Impulse length in seconds.
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Feed the mid of a stereo pair, return the stereo wet signal.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mid = 0.5 * (left + right);
        (self.left.process(mid), self.right.process(mid))
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
        let mut y = vec![0.0; x.len()];
        for n in 0..x.len() {
            for (k, &hk) in h.iter().enumerate() {
                if k <= n {
                    y[n] += hk * x[n - k];
                }
            }
        }
        y
    }

    #[test]
    fn convolver_matches_direct_convolution() {
        let block = 8;
        let h: Vec<f32> = (0..21).map(|i| ((i * 7 % 5) as f32 - 2.0) * 0.1).collect();
        let x: Vec<f32> = (0..64).map(|i| ((i * 3 % 11) as f32 - 5.0) * 0.05).collect();

        let mut planner = FftPlanner::new();
        let mut conv = Convolver::new(&h, block, &mut planner);
        let mut input = x.clone();
        input.extend(std::iter::repeat_n(0.0, block));
        let out: Vec<f32> = input.iter().map(|&s| conv.process(s)).collect();

        let expected = direct_convolution(&x, &h);
        for n in 0..x.len() {
            assert!(
                (out[n + block] - expected[n]).abs() < 1e-4,
                "sample {n}: {} vs {}",
                out[n + block],
                expected[n]
            );
        }
    }

    #[test]
    fn impulse_channels_differ_and_decay() {
        let [l, r] = synthetic_impulse(1.0, 8000.0, 3);
        assert_eq!(l.len(), 8000);
        assert_ne!(l, r);

        let head: f32 = l[..800].iter().map(|s| s * s).sum();
        let tail: f32 = l[7200..].iter().map(|s| s * s).sum();
        assert!(tail < head * 0.01, "energy should decay: head {head} tail {tail}");

        let energy: f32 = r.iter().map(|s| s * s).sum();
        assert!((energy - 1.0).abs() < 1e-3);
    }

    #[test]
    fn impulse_is_deterministic_per_seed() {
        assert_eq!(synthetic_impulse(0.2, 8000.0, 9), synthetic_impulse(0.2, 8000.0, 9));
    }

    #[test]
    fn size_is_clamped() {
        assert_eq!(ConvolutionReverb::new(0.0, 8000.0).size(), 0.1);
        assert_eq!(ConvolutionReverb::new(60.0, 8000.0).size(), 6.0);
    }

    #[test]
    fn reverb_produces_a_tail_after_an_impulse() {
        let mut reverb = ConvolutionReverb::new(0.5, 8000.0);
        reverb.process(1.0, 1.0);
        let mut energy = 0.0;
        for _ in 0..4000 {
            let (l, r) = reverb.process(0.0, 0.0);
            assert!(l.is_finite() && r.is_finite());
            energy += l * l + r * r;
        }
        assert!(energy > 0.1, "expected a reverb tail, energy {energy}");
    }
}
