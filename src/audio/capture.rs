use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use super::levels::AudioLevels;
use crate::report::Reporter;

/// How often the supervisor checks whether the default output device moved.
const DEVICE_POLL: Duration = Duration::from_secs(1);

enum Signal {
    Stop,
    StreamError { generation: u64, message: String },
}

/// Loopback capture of the default output device.
///
/// The `cpal::Stream` is not `Send`, so a supervisor thread owns it for its
/// whole life. That thread re-opens the stream whenever the default output
/// device changes or the stream reports an error, and releases it when the
/// analyzer is dropped.
pub struct AudioAnalyzer {
    levels: AudioLevels,
    control: Sender<Signal>,
    supervisor: Option<JoinHandle<()>>,
}

impl AudioAnalyzer {
    /// Opens the stream and starts capturing. Failing to open the device
    /// here is fatal for the caller.
    pub fn start(reporter: Reporter) -> Result<Self> {
        let levels = AudioLevels::new(0, 0);
        let (control_tx, control_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let supervisor = thread::Builder::new()
            .name("loopback-capture".into())
            .spawn({
                let levels = levels.clone();
                let errors = control_tx.clone();
                let reporter = reporter.clone();
                move || supervise(levels, control_rx, errors, ready_tx, reporter)
            })
            .context("Failed to spawn capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(device)) => reporter.ok(format!("Listening to \"{}\"", device)),
            Ok(Err(err)) => {
                let _ = supervisor.join();
                return Err(err.context("Failed to open loopback capture"));
            }
            Err(_) => {
                let _ = supervisor.join();
                anyhow::bail!("Capture thread exited before the stream opened");
            }
        }

        Ok(Self {
            levels,
            control: control_tx,
            supervisor: Some(supervisor),
        })
    }

    pub fn levels(&self) -> &AudioLevels {
        &self.levels
    }

    fn stop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = self.control.send(Signal::Stop);
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

impl Drop for AudioAnalyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Session {
    _stream: Stream,
    device_name: String,
    generation: u64,
}

fn supervise(
    levels: AudioLevels,
    control: Receiver<Signal>,
    errors: Sender<Signal>,
    ready: Sender<Result<String>>,
    reporter: Reporter,
) {
    let mut generation = 0;
    let mut session = match open_session(&levels, &errors, generation) {
        Ok(session) => {
            let _ = ready.send(Ok(session.device_name.clone()));
            Some(session)
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    loop {
        let opened = session
            .as_ref()
            .map(|s| (s.device_name.as_str(), s.generation));
        let reason = match control.recv_timeout(DEVICE_POLL) {
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::StreamError {
                generation: failed,
                message,
            }) => should_reopen(opened, Trigger::StreamError { generation: failed })
                .then(|| format!("Capture stream error: {}", message)),
            Err(RecvTimeoutError::Timeout) => {
                let current = default_output_name();
                should_reopen(opened, Trigger::Poll { default_device: current.as_deref() })
                    .then(|| {
                        format!(
                            "Default output device changed to \"{}\"",
                            current.as_deref().unwrap_or("?")
                        )
                    })
            }
        };

        if let Some(reason) = reason {
            reporter.warn(reason);
            generation += 1;
            reopen(&mut session, &levels, &errors, generation, &reporter);
        }
    }

    drop(session);
    log::debug!("loopback capture released");
}

/// What woke the supervisor.
#[derive(Clone, Copy, Debug)]
enum Trigger<'a> {
    /// The error callback of the stream opened as `generation` fired.
    StreamError { generation: u64 },
    /// Periodic check; carries the host's current default output device.
    Poll { default_device: Option<&'a str> },
}

/// `opened` is the live session's device name and generation, if any.
/// Errors from a stream already replaced are stale. A poll reopens when a
/// default device exists and is not the one opened, which includes retrying
/// after a failed reopen.
fn should_reopen(opened: Option<(&str, u64)>, trigger: Trigger<'_>) -> bool {
    match trigger {
        Trigger::StreamError { generation } => {
            opened.map(|(_, live)| live) == Some(generation)
        }
        Trigger::Poll { default_device: None } => false,
        Trigger::Poll {
            default_device: Some(current),
        } => opened.map(|(name, _)| name) != Some(current),
    }
}

fn reopen(
    session: &mut Option<Session>,
    levels: &AudioLevels,
    errors: &Sender<Signal>,
    generation: u64,
    reporter: &Reporter,
) {
    // Release the old stream before opening the new one.
    drop(session.take());

    match open_session(levels, errors, generation) {
        Ok(opened) => {
            reporter.ok(format!("Listening to \"{}\"", opened.device_name));
            *session = Some(opened);
        }
        Err(err) => reporter.error(format!("Failed to reopen capture: {:#}", err)),
    }
}

fn default_output_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|device| device.name().ok())
}

/// Builds an input stream on the default *output* device, which the WASAPI
/// host turns into a loopback capture.
fn open_session(levels: &AudioLevels, errors: &Sender<Signal>, generation: u64) -> Result<Session> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown device".into());

    let supported = device
        .default_output_config()
        .context("Failed to query the output format")?;
    let config: StreamConfig = supported.config();
    levels.set_format(config.sample_rate.0, config.channels);

    log::info!(
        "Loopback format: {} Hz, {} channel(s), {:?}",
        config.sample_rate.0,
        config.channels,
        supported.sample_format()
    );

    let mut processor = levels.processor();
    let on_error = {
        let errors = errors.clone();
        move |err: cpal::StreamError| {
            let _ = errors.send(Signal::StreamError {
                generation,
                message: err.to_string(),
            });
        }
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| processor.process(data),
            on_error,
            None,
        )?,
        SampleFormat::I16 => {
            let mut block = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    block.clear();
                    block.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                    processor.process(&block);
                },
                on_error,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut block = Vec::new();
            let half = u16::MAX as f32 / 2.0;
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    block.clear();
                    block.extend(data.iter().map(|&s| (s as f32 - half) / half));
                    processor.process(&block);
                },
                on_error,
                None,
            )?
        }
        other => anyhow::bail!("Unsupported sample format: {}", other),
    };

    stream.play().context("Failed to start the loopback stream")?;

    Ok(Session {
        _stream: stream,
        device_name,
        generation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEAKERS: Option<(&str, u64)> = Some(("Speakers", 3));

    #[test]
    fn stream_error_from_live_generation_reopens() {
        assert!(should_reopen(SPEAKERS, Trigger::StreamError { generation: 3 }));
    }

    #[test]
    fn stale_stream_error_is_ignored() {
        assert!(!should_reopen(SPEAKERS, Trigger::StreamError { generation: 2 }));
        assert!(!should_reopen(None, Trigger::StreamError { generation: 0 }));
    }

    #[test]
    fn same_default_device_keeps_stream() {
        let trigger = Trigger::Poll {
            default_device: Some("Speakers"),
        };
        assert!(!should_reopen(SPEAKERS, trigger));
    }

    #[test]
    fn missing_default_device_keeps_stream() {
        assert!(!should_reopen(SPEAKERS, Trigger::Poll { default_device: None }));
        assert!(!should_reopen(None, Trigger::Poll { default_device: None }));
    }

    #[test]
    fn changed_default_device_reopens() {
        let trigger = Trigger::Poll {
            default_device: Some("Headphones"),
        };
        assert!(should_reopen(SPEAKERS, trigger));
    }

    #[test]
    fn failed_reopen_is_retried_on_next_poll() {
        let trigger = Trigger::Poll {
            default_device: Some("Speakers"),
        };
        assert!(should_reopen(None, trigger));
    }
}
