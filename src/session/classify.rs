//! Classification of server-reported error messages.
//!
//! The realtime API reports errors with free-text messages. A handful of them
//! are expected races between the client and server-side voice activity
//! detection and must not end the session. The substring patterns live here,
//! behind a single function, so they can be updated without touching the
//! dispatch loop.

/// What the dispatch loop should do with a server error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Expected protocol race, log and keep processing events.
    Benign,
    /// Unclassified server error, log and terminate the session.
    Fatal,
}

/// Known-benign message fragments.
///
/// "buffer is empty": a commit raced an empty input buffer, no audio was lost.
/// "active response": a commit raced response generation already in progress.
const BENIGN_PATTERNS: &[&str] = &["buffer is empty", "active response"];

/// Classify a server error message.
pub fn classify_server_error(message: &str) -> ErrorDisposition {
    if BENIGN_PATTERNS.iter().any(|p| message.contains(p)) {
        ErrorDisposition::Benign
    } else {
        ErrorDisposition::Fatal
    }
}
