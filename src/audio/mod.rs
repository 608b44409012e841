//! Audio capability abstractions and device implementations.
//!
//! The session dispatcher drives a microphone's recording state and flushes
//! assistant audio to a playback sink, but it never touches a device handle
//! directly: both sides are injected behind the traits defined here so tests
//! can substitute deterministic fakes.
//!
//! Concrete cpal-backed devices live in [`capture`] and [`playback`], gated
//! behind the `audio-cpal` feature.
//!
//! # Audio format
//!
//! PCM 16-bit signed little-endian, 24kHz, mono, both directions.

#[cfg(feature = "audio-cpal")]
pub mod capture;
#[cfg(feature = "audio-cpal")]
pub mod playback;

use async_trait::async_trait;
use bytes::Bytes;

use crate::session::SessionResult;

/// Audio sample rate used on the wire (Hz).
pub const SAMPLE_RATE: u32 = 24_000;

/// Microphone control surface.
///
/// The microphone holds two flags: `recording` (capture callback appends to
/// the buffer) and `receiving` (the assistant is speaking, captured input is
/// held back from upload). The dispatcher is the sole writer to this state
/// during an active session.
pub trait Microphone: Send + Sync {
    /// Begin capturing audio into the internal buffer.
    fn start_recording(&self);

    /// Stop capturing audio.
    fn stop_recording(&self);

    /// Enter receiving state: the assistant is generating a reply, capture is
    /// paused so the upload pump goes quiet.
    fn start_receiving(&self);

    /// Leave receiving state and re-arm capture.
    fn stop_receiving(&self);

    /// Directly set the recording flag (resume after rate-limit updates).
    fn set_recording(&self, recording: bool);

    /// Whether the microphone is in receiving state.
    fn is_receiving(&self) -> bool;

    /// Take all buffered PCM data, leaving the buffer empty.
    fn drain(&self) -> Vec<u8>;
}

/// Playback sink for assistant audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one turn's worth of PCM audio, resolving once playback finished.
    async fn play(&self, audio: Bytes) -> SessionResult<()>;
}
