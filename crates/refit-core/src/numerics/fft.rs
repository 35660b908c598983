use crate::common::FrequencyWindow;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Forward real-to-half-spectrum FFT of a fixed length, unnormalized
/// (`X[f] = sum_n x[n] exp(-2 pi i f n / N)`).
#[derive(Clone)]
pub struct WaveformFft {
    len: usize,
    plan: Arc<dyn Fft<f64>>,
}

impl WaveformFft {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let plan = planner.plan_fft_forward(len);
        Self { len, plan }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bins returned by [`WaveformFft::forward`] (DC through Nyquist).
    pub fn spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    /// Transforms `samples`; shorter inputs are zero-padded and longer ones
    /// truncated to the planned length.
    pub fn forward(&self, samples: &[f64]) -> Vec<Complex64> {
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.len];
        for (slot, &sample) in buffer.iter_mut().zip(samples) {
            slot.re = sample;
        }
        self.plan.process(&mut buffer);
        buffer.truncate(self.spectrum_len());
        buffer
    }
}

impl Debug for WaveformFft {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformFft").field("len", &self.len).finish()
    }
}

/// Interleaves real and imaginary parts of the bins in `window`, dropping the
/// imaginary part of the terminal bin. Bins past the end of `spectrum` read as
/// zero.
pub fn interleave_window(spectrum: &[Complex64], window: FrequencyWindow) -> Vec<f64> {
    let mut interleaved = Vec::with_capacity(window.template_len());
    for bin in window.min..=window.max {
        let value = spectrum.get(bin).copied().unwrap_or_default();
        interleaved.push(value.re);
        if bin != window.max {
            interleaved.push(value.im);
        }
    }
    interleaved
}

#[cfg(test)]
mod tests {
    use super::{WaveformFft, interleave_window};
    use crate::common::FrequencyWindow;
    use num_complex::Complex64;
    use std::f64::consts::PI;

    #[test]
    fn forward_returns_half_spectrum_of_a_cosine() {
        let fft = WaveformFft::new(16);
        let samples: Vec<f64> = (0..16)
            .map(|n| (2.0 * PI * 3.0 * n as f64 / 16.0).cos())
            .collect();

        let spectrum = fft.forward(&samples);
        assert_eq!(spectrum.len(), 9);
        for (bin, value) in spectrum.iter().enumerate() {
            let expected = if bin == 3 { 8.0 } else { 0.0 };
            assert!((value.re - expected).abs() < 1.0e-12, "bin {bin}: {value}");
            assert!(value.im.abs() < 1.0e-12, "bin {bin}: {value}");
        }
    }

    #[test]
    fn forward_uses_negative_exponent_convention() {
        let fft = WaveformFft::new(8);
        let samples: Vec<f64> = (0..8)
            .map(|n| (2.0 * PI * n as f64 / 8.0).sin())
            .collect();
        let spectrum = fft.forward(&samples);
        assert!((spectrum[1].im + 4.0).abs() < 1.0e-12, "{}", spectrum[1]);
    }

    #[test]
    fn interleave_drops_terminal_imaginary_part() {
        let spectrum: Vec<Complex64> = (0..6)
            .map(|bin| Complex64::new(bin as f64, -(bin as f64)))
            .collect();
        let window = FrequencyWindow { min: 2, max: 4 };

        let interleaved = interleave_window(&spectrum, window);
        assert_eq!(interleaved, vec![2.0, -2.0, 3.0, -3.0, 4.0]);
        assert_eq!(interleaved.len(), window.template_len());
    }
}
