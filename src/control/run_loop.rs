use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::payload::{brightness_payload, color_payload};
use super::smoothing::{ControlState, Smoothing};
use crate::audio::capture::AudioAnalyzer;
use crate::audio::levels::AudioLevels;
use crate::ble::transport::LedWriter;
use crate::report::Reporter;
use crate::screen::color::{PaletteCode, ScreenProbe};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(50);
pub const DEFAULT_COLOR_EVERY: u32 = 10;

/// Where the brightness reading comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioSensitivity {
    #[default]
    Bass,
    Level,
}

impl AudioSensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioSensitivity::Bass => "bass",
            AudioSensitivity::Level => "level",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "bass" => Some(AudioSensitivity::Bass),
            "level" => Some(AudioSensitivity::Level),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorSensitivity {
    #[default]
    Screen,
    Off,
}

impl ColorSensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorSensitivity::Screen => "screen",
            ColorSensitivity::Off => "off",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "screen" => Some(ColorSensitivity::Screen),
            "off" => Some(ColorSensitivity::Off),
            _ => None,
        }
    }
}

pub trait LevelSource {
    fn sound_level(&self) -> f32;
    fn bass_level(&self) -> f32;
    fn set_bass_tracking(&self, enabled: bool);
}

pub trait ColorProbe: Send + Sync + 'static {
    fn sample(&self) -> Result<PaletteCode>;
}

/// Fire-and-forget destination for hex payloads.
pub trait CommandSink: Send + Sync + 'static {
    fn send(&self, hex: String);
}

impl LevelSource for AudioLevels {
    fn sound_level(&self) -> f32 {
        AudioLevels::sound_level(self)
    }

    fn bass_level(&self) -> f32 {
        AudioLevels::bass_level(self)
    }

    fn set_bass_tracking(&self, enabled: bool) {
        AudioLevels::set_bass_tracking(self, enabled)
    }
}

impl LevelSource for AudioAnalyzer {
    fn sound_level(&self) -> f32 {
        self.levels().sound_level()
    }

    fn bass_level(&self) -> f32 {
        self.levels().bass_level()
    }

    fn set_bass_tracking(&self, enabled: bool) {
        self.levels().set_bass_tracking(enabled)
    }
}

impl ColorProbe for ScreenProbe {
    fn sample(&self) -> Result<PaletteCode> {
        ScreenProbe::sample(self)
    }
}

impl CommandSink for LedWriter {
    fn send(&self, hex: String) {
        self.spawn_write(hex);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LoopSettings {
    pub period: Duration,
    pub color_every: u32,
    pub audio: AudioSensitivity,
    pub color: ColorSensitivity,
    pub smoothing: Smoothing,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            color_every: DEFAULT_COLOR_EVERY,
            audio: AudioSensitivity::default(),
            color: ColorSensitivity::default(),
            smoothing: Smoothing::default(),
        }
    }
}

/// Turns audio levels into brightness frames and, every few ticks, the
/// screen color into a color frame.
pub struct ControlLoop<L: LevelSource, P: ColorProbe, S: CommandSink> {
    levels: L,
    probe: Arc<P>,
    sink: Arc<S>,
    settings: LoopSettings,
    state: ControlState,
    ticks: u64,
    reporter: Reporter,
}

impl<L: LevelSource, P: ColorProbe, S: CommandSink> ControlLoop<L, P, S> {
    pub fn new(levels: L, probe: P, sink: S, settings: LoopSettings, reporter: Reporter) -> Self {
        levels.set_bass_tracking(settings.audio == AudioSensitivity::Bass);

        Self {
            levels,
            probe: Arc::new(probe),
            sink: Arc::new(sink),
            state: ControlState::new(settings.smoothing),
            settings,
            ticks: 0,
            reporter,
        }
    }

    /// Current reading scaled to [0, 100].
    fn raw_level(&self) -> i32 {
        let level = match self.settings.audio {
            AudioSensitivity::Bass => self.levels.bass_level(),
            AudioSensitivity::Level => self.levels.sound_level(),
        };
        // NaN casts to 0.
        (level * 100.0).clamp(0.0, 100.0) as i32
    }

    /// One iteration: brightness now, color every `color_every` ticks.
    pub fn tick(&mut self) {
        let brightness = self.state.advance(self.raw_level());
        self.sink.send(brightness_payload(brightness.clamp(0, 100) as u8));

        self.ticks += 1;
        let every = self.settings.color_every.max(1) as u64;
        if self.settings.color == ColorSensitivity::Screen && self.ticks % every == 0 {
            self.spawn_color_job();
        }
    }

    fn spawn_color_job(&self) {
        let probe = self.probe.clone();
        let sink = self.sink.clone();
        let reporter = self.reporter.clone();
        rayon::spawn(move || match probe.sample() {
            Ok(code) => sink.send(color_payload(code)),
            Err(err) => reporter.warn(format!("Screen sampling failed: {:#}", err)),
        });
    }

    /// Ticks until `running` goes false, then releases the level source.
    pub fn run(mut self, running: &AtomicBool) {
        self.reporter.ok("Control loop running, press Ctrl-C to stop");
        let period = self.settings.period;
        let mut next = Instant::now();

        while running.load(Ordering::Acquire) {
            self.tick();

            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Late: resume the cadence from now.
                next = now;
            }
        }

        log::info!("Control loop stopped after {} tick(s)", self.ticks);
        drop(self.levels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;

    struct FixedLevels {
        sound: f32,
        bass: f32,
        tracking: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl FixedLevels {
        fn new(sound: f32, bass: f32) -> Self {
            Self {
                sound,
                bass,
                tracking: Arc::new(AtomicBool::new(false)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl LevelSource for FixedLevels {
        fn sound_level(&self) -> f32 {
            self.sound
        }

        fn bass_level(&self) -> f32 {
            self.bass
        }

        fn set_bass_tracking(&self, enabled: bool) {
            self.tracking.store(enabled, Ordering::SeqCst);
        }
    }

    impl Drop for FixedLevels {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct FixedColor(Option<PaletteCode>);

    impl ColorProbe for FixedColor {
        fn sample(&self) -> Result<PaletteCode> {
            self.0.ok_or_else(|| anyhow::anyhow!("no display"))
        }
    }

    struct ChannelSink(Mutex<Sender<String>>);

    impl CommandSink for ChannelSink {
        fn send(&self, hex: String) {
            if let Ok(tx) = self.0.lock() {
                let _ = tx.send(hex);
            }
        }
    }

    fn sink() -> (ChannelSink, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (ChannelSink(Mutex::new(tx)), rx)
    }

    fn collect(rx: &Receiver<String>, wait: Duration) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(hex) = rx.recv_timeout(wait) {
            seen.push(hex);
        }
        seen
    }

    fn settings(audio: AudioSensitivity, color: ColorSensitivity) -> LoopSettings {
        LoopSettings {
            period: Duration::from_millis(1),
            audio,
            color,
            ..LoopSettings::default()
        }
    }

    #[test]
    fn ticks_send_brightness_and_periodic_color() {
        let (sink, rx) = sink();
        let mut control = ControlLoop::new(
            FixedLevels::new(0.42, 0.0),
            FixedColor(Some(PaletteCode::Green)),
            sink,
            settings(AudioSensitivity::Level, ColorSensitivity::Screen),
            Reporter::new(),
        );
        for _ in 0..20 {
            control.tick();
        }

        let seen = collect(&rx, Duration::from_millis(500));
        let brightness = seen.iter().filter(|h| h.starts_with("7e0001")).count();
        let colors: Vec<_> = seen.iter().filter(|h| h.starts_with("7e0003")).collect();
        assert_eq!(brightness, 20);
        assert!(seen.iter().any(|h| h == "7e00012A00000000ef"));
        assert_eq!(colors, vec!["7e00038203000000ef", "7e00038203000000ef"]);
    }

    #[test]
    fn color_off_sends_brightness_only() {
        let (sink, rx) = sink();
        let mut control = ControlLoop::new(
            FixedLevels::new(1.0, 0.0),
            FixedColor(Some(PaletteCode::Red)),
            sink,
            settings(AudioSensitivity::Level, ColorSensitivity::Off),
            Reporter::new(),
        );
        for _ in 0..30 {
            control.tick();
        }

        let seen = collect(&rx, Duration::from_millis(200));
        assert_eq!(seen.len(), 30);
        assert!(seen.iter().all(|h| h == "7e00016400000000ef"));
    }

    #[test]
    fn bass_mode_enables_tracking_and_reads_bass() {
        let levels = FixedLevels::new(0.9, 0.05);
        let tracking = levels.tracking.clone();
        let (sink, rx) = sink();
        let mut control = ControlLoop::new(
            levels,
            FixedColor(None),
            sink,
            settings(AudioSensitivity::Bass, ColorSensitivity::Off),
            Reporter::new(),
        );
        assert!(tracking.load(Ordering::SeqCst));

        control.tick();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "7e00010500000000ef");
    }

    #[test]
    fn level_mode_disables_tracking() {
        let levels = FixedLevels::new(0.0, 0.0);
        levels.tracking.store(true, Ordering::SeqCst);
        let tracking = levels.tracking.clone();
        let (sink, _rx) = sink();
        let _control = ControlLoop::new(
            levels,
            FixedColor(None),
            sink,
            settings(AudioSensitivity::Level, ColorSensitivity::Off),
            Reporter::new(),
        );
        assert!(!tracking.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_color_sample_is_skipped() {
        let (sink, rx) = sink();
        let mut control = ControlLoop::new(
            FixedLevels::new(0.0, 0.0),
            FixedColor(None),
            sink,
            settings(AudioSensitivity::Level, ColorSensitivity::Screen),
            Reporter::new(),
        );
        for _ in 0..10 {
            control.tick();
        }

        let seen = collect(&rx, Duration::from_millis(300));
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|h| h.starts_with("7e0001")));
    }

    /// Clears the running flag once enough frames went out.
    struct StoppingSink {
        running: Arc<AtomicBool>,
        sent: Mutex<usize>,
        limit: usize,
    }

    impl CommandSink for StoppingSink {
        fn send(&self, _hex: String) {
            if let Ok(mut sent) = self.sent.lock() {
                *sent += 1;
                if *sent >= self.limit {
                    self.running.store(false, Ordering::Release);
                }
            }
        }
    }

    #[test]
    fn cancellation_stops_loop_and_releases_levels() {
        let running = Arc::new(AtomicBool::new(true));
        let levels = FixedLevels::new(0.5, 0.0);
        let released = levels.released.clone();
        let control = ControlLoop::new(
            levels,
            FixedColor(None),
            StoppingSink {
                running: running.clone(),
                sent: Mutex::new(0),
                limit: 5,
            },
            settings(AudioSensitivity::Level, ColorSensitivity::Off),
            Reporter::new(),
        );

        control.run(&running);
        assert!(!running.load(Ordering::Acquire));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn sensitivity_names_parse_back() {
        for audio in [AudioSensitivity::Bass, AudioSensitivity::Level] {
            assert_eq!(AudioSensitivity::parse(audio.as_str()), Some(audio));
        }
        for color in [ColorSensitivity::Screen, ColorSensitivity::Off] {
            assert_eq!(ColorSensitivity::parse(color.as_str()), Some(color));
        }
        assert_eq!(AudioSensitivity::parse("treble"), None);
    }
}
