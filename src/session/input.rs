//! Microphone upload pump.
//!
//! Periodically drains captured PCM from the microphone and ships it to the
//! server as `input_audio_buffer.append` events. Uploads pause while the
//! microphone is in receiving state (the assistant is speaking) and the pump
//! ends when the outbound side of the connection goes away.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::audio::Microphone;
use crate::protocol::ClientEvent;
use crate::transport::OutboundHandle;

/// Interval between upload ticks, long enough to accumulate some audio.
const UPLOAD_INTERVAL: Duration = Duration::from_millis(100);

/// Run the upload pump until the connection closes.
pub async fn pump_microphone(microphone: Arc<dyn Microphone>, outbound: OutboundHandle) {
    let mut ticker = tokio::time::interval(UPLOAD_INTERVAL);
    loop {
        ticker.tick().await;
        if outbound.is_closed() {
            break;
        }
        if microphone.is_receiving() {
            continue;
        }
        let data = microphone.drain();
        if data.is_empty() {
            continue;
        }
        if outbound
            .send_event(ClientEvent::audio_append(&data))
            .await
            .is_err()
        {
            break;
        }
    }
    debug!("microphone pump ended");
}
