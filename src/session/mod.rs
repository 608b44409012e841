//! Session-level protocol state machine.
//!
//! Consumes the server-driven event stream of one realtime connection and
//! turns it into side effects: accumulating streamed text and audio,
//! dispatching function calls, and keeping the microphone's recording state
//! in sync with server-reported turn boundaries.

mod base;
mod classify;
mod dispatcher;
mod input;

pub use base::{SessionError, SessionResult, TranscriptCallback};
pub use classify::{ErrorDisposition, classify_server_error};
pub use dispatcher::SessionDispatcher;
pub use input::pump_microphone;
