use std::sync::{Arc, Mutex};

use crossbeam::atomic::AtomicCell;
use triple_buffer::TripleBuffer;

use super::spectrum::{SpectrumAccumulator, FFT_LENGTH};

/// Low band averaged into the bass level, in Hz (inclusive).
const BASS_START_HZ: usize = 30;
const BASS_END_HZ: usize = 100;
const BASS_STEP_HZ: usize = 10;

/// Bin magnitudes are scaled by this before clamping to 1.0.
const BASS_GAIN: f32 = 100.0;

/// Magnitudes of one transformed buffer.
pub type SpectrumData = [f32; FFT_LENGTH];

/// State shared between the capture callback and the control thread.
struct Shared {
    sound_level: AtomicCell<f32>,
    bass_level: AtomicCell<f32>,
    bass_tracking: AtomicCell<bool>,
    sample_rate: AtomicCell<u32>,
    channels: AtomicCell<u32>,
    /// Consumer end of the spectrum handoff. Replaced by each new processor.
    spectrum: Mutex<triple_buffer::Output<SpectrumData>>,
}

/// Reader side of the analyzer. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct AudioLevels {
    shared: Arc<Shared>,
}

impl AudioLevels {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let (_, output) = TripleBuffer::new(&[0.0; FFT_LENGTH]).split();
        Self {
            shared: Arc::new(Shared {
                sound_level: AtomicCell::new(0.0),
                bass_level: AtomicCell::new(0.0),
                bass_tracking: AtomicCell::new(false),
                sample_rate: AtomicCell::new(sample_rate),
                channels: AtomicCell::new(channels as u32),
                spectrum: Mutex::new(output),
            }),
        }
    }

    /// Records the format of a freshly opened stream.
    pub fn set_format(&self, sample_rate: u32, channels: u16) {
        self.shared.sample_rate.store(sample_rate);
        self.shared.channels.store(channels as u32);
    }

    /// Callback-side processor feeding this reader. Spectra published by an
    /// earlier processor are no longer seen.
    pub fn processor(&self) -> BlockProcessor {
        let (input, output) = TripleBuffer::new(&[0.0; FFT_LENGTH]).split();
        *lock(&self.shared.spectrum) = output;

        BlockProcessor {
            shared: self.shared.clone(),
            spectrum: SpectrumAccumulator::new(),
            input,
        }
    }

    /// Turns the FFT path on or off. Off means no transform work at all and
    /// `bass_level` keeps returning its last value. A spectrum published
    /// before the switch is discarded.
    pub fn set_bass_tracking(&self, enabled: bool) {
        self.shared.bass_tracking.store(enabled);
        let _ = lock(&self.shared.spectrum).update();
    }

    /// Peak absolute sample of the most recent block.
    pub fn sound_level(&self) -> f32 {
        self.shared.sound_level.load()
    }

    /// Recomputes from the latest spectrum when a new one was published and
    /// the consumer is free; otherwise returns the previous value.
    pub fn bass_level(&self) -> f32 {
        let shared = &self.shared;
        if shared.bass_tracking.load() {
            if let Ok(mut output) = shared.spectrum.try_lock() {
                if output.updated() {
                    let level = bass_from_spectrum(
                        output.read(),
                        shared.sample_rate.load(),
                        shared.channels.load(),
                    );
                    shared.bass_level.store(level);
                }
            }
        }
        shared.bass_level.load()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owned by the audio callback. Consumes interleaved blocks.
pub struct BlockProcessor {
    shared: Arc<Shared>,
    spectrum: SpectrumAccumulator,
    input: triple_buffer::Input<SpectrumData>,
}

impl BlockProcessor {
    pub fn process(&mut self, samples: &[f32]) {
        let tracking = self.shared.bass_tracking.load();
        let mut peak = 0.0f32;

        for &sample in samples {
            peak = peak.max(sample.abs());

            if tracking {
                if let Some(magnitudes) = self.spectrum.push(sample) {
                    let mut frame = [0.0; FFT_LENGTH];
                    frame.copy_from_slice(magnitudes);
                    self.input.write(frame);
                }
            }
        }

        self.shared.sound_level.store(peak);
    }
}

/// Bin holding `frequency` for an interleaved stream. Integer arithmetic:
/// the buffer mixes channels, so each bin spans `channels` times the
/// nominal resolution.
pub fn frequency_index(frequency: usize, sample_rate: u32, channels: u32) -> usize {
    let hz_per_bin = (sample_rate as usize / FFT_LENGTH / channels.max(1) as usize).max(1);
    frequency / hz_per_bin
}

/// Mean of the clamped, scaled magnitudes at 30, 40, ..., 100 Hz. Always in [0, 1].
pub fn bass_from_spectrum(spectrum: &[f32], sample_rate: u32, channels: u32) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }

    let last = spectrum.len() - 1;
    let mut total = 0.0f32;
    let mut count = 0usize;
    for frequency in (BASS_START_HZ..=BASS_END_HZ).step_by(BASS_STEP_HZ) {
        let index = frequency_index(frequency, sample_rate, channels).min(last);
        // max() first so NaN collapses to 0.
        total += (spectrum[index] * BASS_GAIN).max(0.0).min(1.0);
        count += 1;
    }

    total / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_level_is_block_peak() {
        let levels = AudioLevels::new(44_100, 2);
        let mut processor = levels.processor();

        processor.process(&[0.1, -0.7, 0.3, 0.0]);
        assert_eq!(levels.sound_level(), 0.7);

        // Reset per block, not a running max.
        processor.process(&[0.2, -0.05]);
        assert_eq!(levels.sound_level(), 0.2);

        processor.process(&[]);
        assert_eq!(levels.sound_level(), 0.0);
    }

    #[test]
    fn refeeding_into_fresh_processor_gives_same_peak() {
        let block = [0.25, -0.9, 0.5, 0.125];
        let first = AudioLevels::new(48_000, 2);
        let second = AudioLevels::new(48_000, 2);
        first.processor().process(&block);
        second.processor().process(&block);
        assert_eq!(first.sound_level(), second.sound_level());
    }

    #[test]
    fn frequency_index_uses_integer_bin_width() {
        // 44100 / 2048 = 21, / 2 = 10 Hz per bin.
        assert_eq!(frequency_index(30, 44_100, 2), 3);
        assert_eq!(frequency_index(100, 44_100, 2), 10);
        // 48000 / 2048 = 23, / 2 = 11 Hz per bin.
        assert_eq!(frequency_index(30, 48_000, 2), 2);
        // Tiny rates would divide by zero without the floor of one.
        assert_eq!(frequency_index(30, 8_000, 8), 30);
    }

    #[test]
    fn frequency_index_is_monotonic() {
        for &(rate, channels) in &[(44_100, 2), (48_000, 2), (96_000, 1), (22_050, 6)] {
            let mut previous = 0;
            for frequency in 0..2_000 {
                let index = frequency_index(frequency, rate, channels);
                assert!(index >= previous, "{rate} Hz x{channels} at {frequency}");
                previous = index;
            }
        }
    }

    #[test]
    fn bass_level_stays_in_unit_range() {
        let spectra: Vec<Vec<f32>> = vec![
            vec![0.0; FFT_LENGTH],
            vec![1e9; FFT_LENGTH],
            vec![-3.0; FFT_LENGTH],
            vec![f32::NAN; FFT_LENGTH],
            vec![f32::INFINITY; FFT_LENGTH],
            (0..FFT_LENGTH).map(|i| i as f32 * 0.0013).collect(),
            vec![0.5; 3],
        ];
        for spectrum in spectra {
            let level = bass_from_spectrum(&spectrum, 44_100, 2);
            assert!((0.0..=1.0).contains(&level), "level {level}");
        }
        assert_eq!(bass_from_spectrum(&[], 44_100, 2), 0.0);
    }

    #[test]
    fn bass_averages_eight_points() {
        let mut spectrum = vec![0.0; FFT_LENGTH];
        // 10 Hz per bin: 30..=100 Hz hit bins 3..=10. Saturate half of them.
        for bin in 3..=6 {
            spectrum[bin] = 0.5;
        }
        let level = bass_from_spectrum(&spectrum, 44_100, 2);
        assert!((level - 0.5).abs() < 1e-6);
    }

    fn low_sine(sample_rate: u32, samples: usize) -> Vec<f32> {
        // Centered on bin 2 (about 43 Hz at 44.1 kHz).
        let frequency = 2.0 * sample_rate as f32 / FFT_LENGTH as f32;
        (0..samples)
            .map(|n| {
                0.5 * (2.0 * std::f32::consts::PI * frequency * n as f32 / sample_rate as f32)
                    .sin()
            })
            .collect()
    }

    #[test]
    fn tracks_bass_once_buffer_fills() {
        let levels = AudioLevels::new(44_100, 1);
        levels.set_bass_tracking(true);
        let mut processor = levels.processor();

        processor.process(&low_sine(44_100, FFT_LENGTH - 1));
        assert_eq!(levels.bass_level(), 0.0);

        processor.process(&low_sine(44_100, 1));
        let level = levels.bass_level();
        assert!(level > 0.5 && level <= 1.0, "bass {level}");
    }

    #[test]
    fn disabled_tracking_freezes_bass_level() {
        let levels = AudioLevels::new(44_100, 1);
        levels.set_bass_tracking(true);
        let mut processor = levels.processor();
        processor.process(&low_sine(44_100, FFT_LENGTH));
        let tracked = levels.bass_level();
        assert!(tracked > 0.0);

        levels.set_bass_tracking(false);
        processor.process(&vec![0.0; FFT_LENGTH * 2]);
        assert_eq!(levels.bass_level(), tracked);
    }

    #[test]
    fn spectrum_published_before_disable_is_never_read() {
        let levels = AudioLevels::new(44_100, 1);
        levels.set_bass_tracking(true);
        let mut processor = levels.processor();
        processor.process(&low_sine(44_100, FFT_LENGTH));

        levels.set_bass_tracking(false);
        assert_eq!(levels.bass_level(), 0.0);

        // Re-enabling does not resurrect the discarded spectrum.
        levels.set_bass_tracking(true);
        assert_eq!(levels.bass_level(), 0.0);
    }

    #[test]
    fn new_processor_drops_spectra_from_the_previous_one() {
        let levels = AudioLevels::new(44_100, 1);
        levels.set_bass_tracking(true);
        let mut old = levels.processor();
        old.process(&low_sine(44_100, FFT_LENGTH));

        let mut fresh = levels.processor();
        assert_eq!(levels.bass_level(), 0.0);

        fresh.process(&low_sine(44_100, FFT_LENGTH));
        assert!(levels.bass_level() > 0.5);
    }

    #[test]
    fn silence_without_tracking_does_no_fft() {
        let levels = AudioLevels::new(44_100, 2);
        let mut processor = levels.processor();
        processor.process(&low_sine(44_100, FFT_LENGTH * 3));
        assert_eq!(levels.bass_level(), 0.0);
        assert!(levels.sound_level() > 0.49);
    }
}
