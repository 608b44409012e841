//! Microphone capture via the cpal backend.
//!
//! The cpal input callback runs on an OS audio thread, so it only checks two
//! atomic flags and appends into a shared buffer. `cpal::Stream` is `!Send` on
//! most platforms (COM on Windows, CoreAudio on macOS), so the stream is
//! created and dropped on a dedicated thread that the [`CpalMicrophone`]
//! handle signals on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{Microphone, SAMPLE_RATE};
use crate::session::{SessionError, SessionResult};

/// How long to wait for the capture thread to report stream creation.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Flag-and-buffer state shared between the control handle and the capture
/// callback.
///
/// `recording` gates whether captured frames are kept; `receiving` marks that
/// the assistant is speaking and entering it also drops the recording flag, so
/// capture resumes only after the turn ends.
#[derive(Default)]
pub(crate) struct MicState {
    recording: AtomicBool,
    receiving: AtomicBool,
    buffer: Mutex<Vec<u8>>,
}

impl MicState {
    fn push_pcm16(&self, samples: &[i16]) {
        if !self.recording.load(Ordering::Relaxed) || self.receiving.load(Ordering::Relaxed) {
            return;
        }
        let mut buffer = self.buffer.lock();
        for sample in samples {
            buffer.extend_from_slice(&sample.to_le_bytes());
        }
    }

    fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut self.buffer.lock())
    }
}

/// cpal-backed microphone.
pub struct CpalMicrophone {
    state: Arc<MicState>,
    shutdown: Arc<AtomicBool>,
}

impl CpalMicrophone {
    /// Open an input device, preferring `device_name` when given.
    ///
    /// Capture starts paused; call [`Microphone::start_recording`] to begin.
    pub fn open(device_name: Option<&str>) -> SessionResult<Self> {
        let state = Arc::new(MicState::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_state = state.clone();
        let thread_shutdown = shutdown.clone();
        let preferred = device_name.map(str::to_owned);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SessionResult<()>>();

        std::thread::Builder::new()
            .name("voxide-capture".to_string())
            .spawn(move || {
                capture_thread(thread_state, thread_shutdown, preferred, ready_tx);
            })
            .map_err(|e| SessionError::AudioDevice(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { state, shutdown }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::AudioDevice(
                "timed out opening input device".to_string(),
            )),
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Microphone for CpalMicrophone {
    fn start_recording(&self) {
        self.state.recording.store(true, Ordering::SeqCst);
    }

    fn stop_recording(&self) {
        self.state.recording.store(false, Ordering::SeqCst);
    }

    fn start_receiving(&self) {
        self.state.receiving.store(true, Ordering::SeqCst);
        self.state.recording.store(false, Ordering::SeqCst);
    }

    fn stop_receiving(&self) {
        self.state.receiving.store(false, Ordering::SeqCst);
        self.state.recording.store(true, Ordering::SeqCst);
    }

    fn set_recording(&self, recording: bool) {
        self.state.recording.store(recording, Ordering::SeqCst);
    }

    fn is_receiving(&self) -> bool {
        self.state.receiving.load(Ordering::SeqCst)
    }

    fn drain(&self) -> Vec<u8> {
        self.state.drain()
    }
}

/// Owns the cpal stream for its whole lifetime; parks until shutdown.
fn capture_thread(
    state: Arc<MicState>,
    shutdown: Arc<AtomicBool>,
    preferred: Option<String>,
    ready_tx: std::sync::mpsc::Sender<SessionResult<()>>,
) {
    let stream = match build_input_stream(state, preferred) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!("failed to start input stream: {e}");
        return;
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn build_input_stream(
    state: Arc<MicState>,
    preferred: Option<String>,
) -> SessionResult<cpal::Stream> {
    let host = cpal::default_host();

    let mut selected = None;
    if let Some(name) = preferred.as_deref() {
        match host.input_devices() {
            Ok(mut devices) => {
                selected = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if selected.is_none() {
                    warn!("preferred input device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }

    let device = match selected.or_else(|| host.default_input_device()) {
        Some(device) => device,
        None => {
            return Err(SessionError::AudioDevice(
                "no input device available".to_string(),
            ));
        }
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| SessionError::AudioDevice(e.to_string()))?;
    let channels = supported.channels();

    // Ask for the wire rate directly; most backends resample for us. If the
    // device refuses we fall back to its native rate and log the mismatch.
    let wire_config = StreamConfig {
        channels,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |e| error!("input stream error: {e}");
    let ch = channels as usize;

    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            let state = state.clone();
            device.build_input_stream(
                &wire_config,
                move |data: &[i16], _info| {
                    if ch == 1 {
                        state.push_pcm16(data);
                    } else {
                        state.push_pcm16(&downmix_i16(data, ch));
                    }
                },
                err_fn,
                None,
            )
        }
        _ => {
            let state = state.clone();
            device.build_input_stream(
                &wire_config,
                move |data: &[f32], _info| {
                    state.push_pcm16(&downmix_f32(data, ch));
                },
                err_fn,
                None,
            )
        }
    };

    match stream {
        Ok(stream) => Ok(stream),
        Err(e) => {
            warn!(
                rate = supported.sample_rate().0,
                "device rejected {SAMPLE_RATE}Hz capture, using native rate: {e}"
            );
            let native_config = supported.config();
            let stream = match supported.sample_format() {
                SampleFormat::I16 => {
                    let state = state.clone();
                    device.build_input_stream(
                        &native_config,
                        move |data: &[i16], _info| {
                            if ch == 1 {
                                state.push_pcm16(data);
                            } else {
                                state.push_pcm16(&downmix_i16(data, ch));
                            }
                        },
                        err_fn,
                        None,
                    )
                }
                _ => {
                    let state = state.clone();
                    device.build_input_stream(
                        &native_config,
                        move |data: &[f32], _info| {
                            state.push_pcm16(&downmix_f32(data, ch));
                        },
                        err_fn,
                        None,
                    )
                }
            };
            stream.map_err(|e| SessionError::AudioDevice(e.to_string()))
        }
    }
}

/// Average interleaved i16 frames down to mono.
fn downmix_i16(data: &[i16], channels: usize) -> Vec<i16> {
    data.chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Average interleaved f32 frames down to mono i16.
fn downmix_f32(data: &[f32], channels: usize) -> Vec<i16> {
    data.chunks_exact(channels)
        .map(|frame| {
            let avg = frame.iter().sum::<f32>() / channels as f32;
            (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        })
        .collect()
}
