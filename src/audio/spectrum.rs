use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub const FFT_LENGTH: usize = 2048;

/// Collects windowed samples one at a time and transforms them in place
/// each time the 2048-sample buffer fills.
pub struct SpectrumAccumulator {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    position: usize,
}

impl SpectrumAccumulator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_LENGTH);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft,
            window: hann_window(FFT_LENGTH),
            buffer: vec![Complex::new(0.0, 0.0); FFT_LENGTH],
            scratch,
            magnitudes: vec![0.0; FFT_LENGTH],
            position: 0,
        }
    }

    /// Adds one sample. Returns the magnitude spectrum when this sample
    /// completed the buffer.
    pub fn push(&mut self, sample: f32) -> Option<&[f32]> {
        self.buffer[self.position] = Complex::new(sample * self.window[self.position], 0.0);
        self.position += 1;
        if self.position < FFT_LENGTH {
            return None;
        }

        self.position = 0;
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Forward transform scaled by 1/N so magnitudes stay in sample units.
        let scale = 1.0 / FFT_LENGTH as f32;
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *magnitude = bin.norm() * scale;
        }

        Some(&self.magnitudes)
    }
}

impl Default for SpectrumAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
