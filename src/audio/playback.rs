//! Speaker playback via the cpal backend.
//!
//! A turn's audio arrives as one contiguous PCM16 mono buffer at the wire
//! rate. [`CpalSink::play`] converts it to the output device's rate and
//! channel count, queues the samples, and resolves once the output callback
//! has drained the queue. Like capture, the `!Send` stream lives on its own
//! thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{AudioSink, SAMPLE_RATE};
use crate::session::{SessionError, SessionResult};

/// How long to wait for the playback thread to report stream creation.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the queue to drain.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// cpal-backed playback sink.
pub struct CpalSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    shutdown: Arc<AtomicBool>,
    device_rate: u32,
    channels: u16,
}

impl CpalSink {
    /// Open the default output device.
    pub fn open() -> SessionResult<Self> {
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_queue = queue.clone();
        let thread_shutdown = shutdown.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SessionResult<(u32, u16)>>();

        std::thread::Builder::new()
            .name("voxide-playback".to_string())
            .spawn(move || {
                playback_thread(thread_queue, thread_shutdown, ready_tx);
            })
            .map_err(|e| SessionError::AudioDevice(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok((device_rate, channels))) => Ok(Self {
                queue,
                shutdown,
                device_rate,
                channels,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::AudioDevice(
                "timed out opening output device".to_string(),
            )),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: Bytes) -> SessionResult<()> {
        let samples = convert_for_device(&audio, self.device_rate, self.channels);
        if samples.is_empty() {
            return Ok(());
        }
        debug!(samples = samples.len(), "queueing audio for playback");
        self.queue.lock().extend(samples);

        while !self.queue.lock().is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        // Let the device's own buffer empty before reporting done.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

/// Owns the output stream for its whole lifetime; parks until shutdown.
fn playback_thread(
    queue: Arc<Mutex<VecDeque<f32>>>,
    shutdown: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<SessionResult<(u32, u16)>>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(SessionError::AudioDevice(
                "no output device available".to_string(),
            )));
            return;
        }
    };

    let supported = match device.default_output_config() {
        Ok(supported) => supported,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::AudioDevice(e.to_string())));
            return;
        }
    };
    let config = supported.config();
    let device_rate = config.sample_rate.0;
    let channels = config.channels;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        rate = device_rate,
        channels,
        "opening output device"
    );

    let err_fn = |e| error!("output stream error: {e}");
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => {
            let cb_queue = queue.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    let mut queue = cb_queue.lock();
                    for slot in data.iter_mut() {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        *slot = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        _ => {
            let cb_queue = queue.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let mut queue = cb_queue.lock();
                    for slot in data.iter_mut() {
                        *slot = queue.pop_front().unwrap_or(0.0);
                    }
                },
                err_fn,
                None,
            )
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::AudioDevice(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(SessionError::AudioDevice(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok((device_rate, channels)));

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Convert wire PCM16 mono to the device's rate and channel count.
///
/// Nearest-sample rate conversion is fine for speech; frames are duplicated
/// across channels.
fn convert_for_device(pcm: &[u8], device_rate: u32, channels: u16) -> Vec<f32> {
    let mono: Vec<f32> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect();
    if mono.is_empty() {
        return Vec::new();
    }

    let out_frames = (mono.len() as u64 * device_rate as u64 / SAMPLE_RATE as u64) as usize;
    let mut out = Vec::with_capacity(out_frames * channels as usize);
    for frame in 0..out_frames {
        let src = (frame as u64 * SAMPLE_RATE as u64 / device_rate as u64) as usize;
        let sample = mono[src.min(mono.len() - 1)];
        for _ in 0..channels {
            out.push(sample);
        }
    }
    out
}
