//! Delay send: stereo feedback delay line.

use crate::params::{DELAY_FEEDBACK, DELAY_TIME};

/// A stereo feedback delay producing only the wet signal; the tone chain
/// adds it back onto the dry bus at the send level.
///
/// The buffer holds `max_delay_seconds` of audio; the delay time can change
/// while running. Feedback is capped below 1 so echoes always die out.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,

    /// Delay time in seconds.
    delay_time: f64,
    /// Feedback amount [0, 0.95].
    feedback: f64,
}

impl Delay {
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds) as usize + 1;
        Self {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            delay_time: 0.5,
            feedback: 0.3,
        }
    }

    pub fn with_params(sample_rate: f64, max_delay_seconds: f64, delay_time: f64, feedback: f64) -> Self {
        let mut d = Self::new(sample_rate, max_delay_seconds);
        d.set_delay_time(delay_time);
        d.set_feedback(feedback);
        d
    }

    pub fn set_delay_time(&mut self, seconds: f64) {
        self.delay_time = DELAY_TIME.clamp(seconds);
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback = DELAY_FEEDBACK.clamp(feedback);
    }

    /// Process a stereo sample pair, returning the delayed (wet) output.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let buffer_len = self.buffer_l.len();
        let delay_samples = ((self.delay_time * self.sample_rate) as usize).clamp(1, buffer_len - 1);

        let read_pos = if self.write_pos >= delay_samples {
            self.write_pos - delay_samples
        } else {
            buffer_len - (delay_samples - self.write_pos)
        };

        let delayed_l = self.buffer_l[read_pos];
        let delayed_r = self.buffer_r[read_pos];

        self.buffer_l[self.write_pos] = left + delayed_l * self.feedback as f32;
        self.buffer_r[self.write_pos] = right + delayed_r * self.feedback as f32;

        self.write_pos = (self.write_pos + 1) % buffer_len;

        (delayed_l, delayed_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_outputs_delayed_signal() {
        let sample_rate = 44100.0;
        let delay_time = 0.01; // 10ms = 441 samples
        let mut delay = Delay::with_params(sample_rate, 1.0, delay_time, 0.0);

        delay.process(1.0, 1.0);

        let delay_samples = (delay_time * sample_rate) as usize;
        for _ in 1..delay_samples {
            let (out_l, _) = delay.process(0.0, 0.0);
            assert!(out_l.abs() < 1e-6);
        }

        let (out_l, out_r) = delay.process(0.0, 0.0);
        assert!((out_l - 1.0).abs() < 1e-6);
        assert!((out_r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_delay_feedback() {
        let sample_rate = 1000.0;
        let delay_time = 0.01; // 10 samples
        let mut delay = Delay::with_params(sample_rate, 1.0, delay_time, 0.5);

        delay.process(1.0, 1.0);

        let delay_samples = (delay_time * sample_rate) as usize;
        for _ in 1..delay_samples {
            delay.process(0.0, 0.0);
        }

        let (first_echo, _) = delay.process(0.0, 0.0);
        assert!((first_echo - 1.0).abs() < 1e-6);

        for _ in 1..delay_samples {
            delay.process(0.0, 0.0);
        }

        let (second_echo, _) = delay.process(0.0, 0.0);
        assert!((second_echo - 0.5).abs() < 1e-6);
    }

    #[test]
    fn feedback_is_capped_below_unity() {
        let mut delay = Delay::with_params(1000.0, 1.0, 0.005, 4.0);
        assert_eq!(delay.feedback, 0.95);

        delay.process(1.0, 1.0);
        let mut last = 0.0_f32;
        for _ in 0..5000 {
            let (l, _) = delay.process(0.0, 0.0);
            if l != 0.0 {
                last = l;
            }
        }
        assert!(last < 0.01, "echoes must decay, last echo {last}");
    }

    #[test]
    fn zero_delay_time_reads_one_sample_back() {
        let mut delay = Delay::with_params(1000.0, 1.0, 0.0, 0.0);
        delay.process(1.0, 1.0);
        let (l, _) = delay.process(0.0, 0.0);
        assert_eq!(l, 1.0);
    }
}
