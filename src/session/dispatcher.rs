//! Session dispatch loop.
//!
//! One [`SessionDispatcher`] lives per connection. It consumes the inbound
//! event stream strictly in arrival order, folds delta events into the
//! in-progress assistant turn, and triggers side effects on turn boundaries:
//! flushing accumulated audio to the playback sink, dispatching completed
//! function calls to the registry, and driving the microphone's recording
//! state to follow server-reported turn boundaries.
//!
//! Individual effects (function invocation, audio flush, outbound sends) are
//! awaited inline before the next inbound event is processed. A slow function
//! call therefore throttles event consumption; the transport's buffering
//! absorbs the delay.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::base::{SessionResult, TranscriptCallback};
use super::classify::{ErrorDisposition, classify_server_error};
use crate::audio::{AudioSink, Microphone};
use crate::functions::FunctionRegistry;
use crate::protocol::{ClientEvent, ConversationItem, ServerEvent};
use crate::telemetry::{self, Direction};
use crate::transport::Transport;

/// Label under which per-turn response latency is recorded.
const RESPONSE_TIMER_LABEL: &str = "realtime_api_response";

/// A function call announced by the model but not yet complete.
#[derive(Debug, Clone)]
struct PendingFunctionCall {
    name: String,
    call_id: String,
    raw_arguments: String,
}

/// Mutable state of the in-progress assistant turn.
///
/// All fields reset together when a turn completes; the protocol serializes
/// function calls per turn, so at most one is pending at a time.
#[derive(Default)]
struct SessionState {
    pending_function_call: Option<PendingFunctionCall>,
    accumulated_text: String,
    accumulated_audio: Vec<Bytes>,
    response_timer: Option<Instant>,
}

/// Whether the dispatch loop keeps running after an event.
enum LoopControl {
    Continue,
    Terminate,
}

/// Per-connection protocol state machine.
pub struct SessionDispatcher<T: Transport> {
    transport: T,
    microphone: Arc<dyn Microphone>,
    sink: Arc<dyn AudioSink>,
    registry: FunctionRegistry,
    transcript_callback: Option<TranscriptCallback>,
    state: SessionState,
}

impl<T: Transport> SessionDispatcher<T> {
    /// Create a dispatcher over a connected transport.
    pub fn new(
        transport: T,
        microphone: Arc<dyn Microphone>,
        sink: Arc<dyn AudioSink>,
        registry: FunctionRegistry,
    ) -> Self {
        Self {
            transport,
            microphone,
            sink,
            registry,
            transcript_callback: None,
            state: SessionState::default(),
        }
    }

    /// Register a callback receiving incremental assistant text.
    pub fn on_transcript(mut self, callback: TranscriptCallback) -> Self {
        self.transcript_callback = Some(callback);
        self
    }

    /// Run the dispatch loop until the transport closes or a fatal server
    /// error is received.
    pub async fn run(mut self) -> SessionResult<()> {
        loop {
            match self.transport.receive().await? {
                None => {
                    warn!("WebSocket connection closed");
                    return Ok(());
                }
                Some(event) => {
                    telemetry::record_event(Direction::Incoming, event.event_type());
                    if let LoopControl::Terminate = self.handle_event(event).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Process one inbound event.
    async fn handle_event(&mut self, event: ServerEvent) -> SessionResult<LoopControl> {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = %session.id, model = %session.model, "session created");
            }

            ServerEvent::SessionUpdated => {
                debug!("session configuration updated");
            }

            ServerEvent::ResponseCreated => {
                self.microphone.start_receiving();
            }

            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call" {
                    let name = item.name.unwrap_or_default();
                    let call_id = item.call_id.unwrap_or_default();
                    debug!(%name, %call_id, "function call opened");
                    self.state.pending_function_call = Some(PendingFunctionCall {
                        name,
                        call_id,
                        raw_arguments: String::new(),
                    });
                }
            }

            ServerEvent::FunctionCallArgumentsDelta { delta } => {
                if let Some(call) = self.state.pending_function_call.as_mut() {
                    call.raw_arguments.push_str(&delta);
                }
            }

            ServerEvent::FunctionCallArgumentsDone { .. } => {
                if let Some(call) = self.state.pending_function_call.take() {
                    self.dispatch_function_call(call).await?;
                }
            }

            ServerEvent::TextDelta { delta } => {
                self.state.accumulated_text.push_str(&delta);
                if let Some(cb) = &self.transcript_callback {
                    cb(delta).await;
                }
            }

            ServerEvent::AudioDelta { delta } => match ServerEvent::decode_audio_delta(&delta) {
                Ok(audio) => self.state.accumulated_audio.push(Bytes::from(audio)),
                Err(e) => warn!("failed to decode audio delta: {e}"),
            },

            ServerEvent::ResponseDone => {
                self.finalize_turn().await?;
            }

            ServerEvent::RateLimitsUpdated { rate_limits } => {
                self.microphone.set_recording(true);
                debug!(
                    limits = rate_limits.len(),
                    "resumed recording after rate limits update"
                );
            }

            ServerEvent::Error { error } => match classify_server_error(&error.message) {
                ErrorDisposition::Benign => {
                    info!(message = %error.message, "benign server error, continuing");
                }
                ErrorDisposition::Fatal => {
                    error!(
                        kind = %error.error_type,
                        message = %error.message,
                        "unhandled server error, ending session"
                    );
                    return Ok(LoopControl::Terminate);
                }
            },

            ServerEvent::SpeechStarted { audio_start_ms } => {
                info!(audio_start_ms, "speech detected, listening");
            }

            ServerEvent::SpeechStopped { audio_end_ms } => {
                self.microphone.stop_recording();
                info!(audio_end_ms, "speech ended, processing");
                if self.state.response_timer.is_some() {
                    warn!("response timer already running, overwriting");
                }
                self.state.response_timer = Some(Instant::now());
                self.transport
                    .send(ClientEvent::InputAudioBufferCommit)
                    .await?;
            }

            ServerEvent::Unknown => {
                debug!("ignoring unrecognized server event");
            }
        }

        Ok(LoopControl::Continue)
    }

    /// Close out a completed assistant turn.
    async fn finalize_turn(&mut self) -> SessionResult<()> {
        if let Some(started) = self.state.response_timer.take() {
            telemetry::record_duration(RESPONSE_TIMER_LABEL, started.elapsed());
        }
        info!("assistant response complete");

        if !self.state.accumulated_audio.is_empty() {
            let total: usize = self.state.accumulated_audio.iter().map(|c| c.len()).sum();
            let mut payload = BytesMut::with_capacity(total);
            for chunk in self.state.accumulated_audio.drain(..) {
                payload.extend_from_slice(&chunk);
            }
            let payload = payload.freeze();
            debug!(bytes = payload.len(), "flushing turn audio to sink");
            // Awaited inline: further events wait until playback finished,
            // which keeps per-turn audio ordered.
            if let Err(e) = self.sink.play(payload).await {
                error!("audio playback failed: {e}");
            }
        }

        self.state.accumulated_text.clear();
        self.state.accumulated_audio.clear();
        self.microphone.stop_receiving();
        Ok(())
    }

    /// Invoke a completed function call and report its result.
    async fn dispatch_function_call(&mut self, call: PendingFunctionCall) -> SessionResult<()> {
        let args = parse_arguments(&call.raw_arguments);

        let result = match self.registry.lookup(&call.name) {
            Some(function) => {
                info!(name = %call.name, "calling function");
                let result = function(args).await;
                debug!(name = %call.name, "function call finished");
                result
            }
            None => json!({ "error": format!("Function '{}' not found.", call.name) }),
        };

        let output = serde_json::to_string(&result)?;
        self.transport
            .send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::function_call_output(call.call_id, output),
            })
            .await?;
        // The server will not resume generating without this explicit trigger.
        self.transport.send(ClientEvent::ResponseCreate).await?;
        Ok(())
    }
}

/// Parse accumulated function-call argument text.
///
/// Empty or malformed text yields an empty object instead of an error.
fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ApiError;
    use async_trait::async_trait;
    use base64::prelude::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedTransport {
        inbound: Mutex<VecDeque<ServerEvent>>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
    }

    impl ScriptedTransport {
        fn new(events: Vec<ServerEvent>) -> Self {
            Self {
                inbound: Mutex::new(events.into()),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn receive(&mut self) -> SessionResult<Option<ServerEvent>> {
            Ok(self.inbound.lock().pop_front())
        }

        async fn send(&self, event: ClientEvent) -> SessionResult<()> {
            self.sent.lock().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMicrophone {
        recording: AtomicBool,
        receiving: AtomicBool,
        transitions: Mutex<Vec<&'static str>>,
    }

    impl Microphone for FakeMicrophone {
        fn start_recording(&self) {
            self.recording.store(true, Ordering::SeqCst);
            self.transitions.lock().push("start_recording");
        }
        fn stop_recording(&self) {
            self.recording.store(false, Ordering::SeqCst);
            self.transitions.lock().push("stop_recording");
        }
        fn start_receiving(&self) {
            self.receiving.store(true, Ordering::SeqCst);
            self.recording.store(false, Ordering::SeqCst);
            self.transitions.lock().push("start_receiving");
        }
        fn stop_receiving(&self) {
            self.receiving.store(false, Ordering::SeqCst);
            self.recording.store(true, Ordering::SeqCst);
            self.transitions.lock().push("stop_receiving");
        }
        fn set_recording(&self, recording: bool) {
            self.recording.store(recording, Ordering::SeqCst);
            self.transitions.lock().push("set_recording");
        }
        fn is_receiving(&self) -> bool {
            self.receiving.load(Ordering::SeqCst)
        }
        fn drain(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        played: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl AudioSink for CapturingSink {
        async fn play(&self, audio: Bytes) -> SessionResult<()> {
            self.played.lock().push(audio);
            Ok(())
        }
    }

    struct Harness {
        dispatcher: SessionDispatcher<ScriptedTransport>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        microphone: Arc<FakeMicrophone>,
        sink: Arc<CapturingSink>,
        seen_args: Arc<Mutex<Option<Value>>>,
    }

    fn harness(events: Vec<ServerEvent>) -> Harness {
        let transport = ScriptedTransport::new(events);
        let sent = transport.sent.clone();
        let microphone = Arc::new(FakeMicrophone::default());
        let sink = Arc::new(CapturingSink::default());

        let seen_args = Arc::new(Mutex::new(None));
        let seen = seen_args.clone();
        let mut registry = FunctionRegistry::new();
        registry.register(
            crate::protocol::ToolDef {
                tool_type: "function".to_string(),
                name: "get_time".to_string(),
                description: None,
                parameters: None,
            },
            crate::functions::handler(move |args| {
                let seen = seen.clone();
                async move {
                    *seen.lock() = Some(args);
                    json!({"time": "12:00:00"})
                }
            }),
        );

        let dispatcher = SessionDispatcher::new(
            transport,
            microphone.clone() as Arc<dyn Microphone>,
            sink.clone() as Arc<dyn AudioSink>,
            registry,
        );

        Harness {
            dispatcher,
            sent,
            microphone,
            sink,
            seen_args,
        }
    }

    fn function_call_item(name: &str, call_id: &str) -> ServerEvent {
        ServerEvent::OutputItemAdded {
            item: ConversationItem {
                item_type: "function_call".to_string(),
                name: Some(name.to_string()),
                call_id: Some(call_id.to_string()),
                ..Default::default()
            },
        }
    }

    fn args_delta(delta: &str) -> ServerEvent {
        ServerEvent::FunctionCallArgumentsDelta {
            delta: delta.to_string(),
        }
    }

    fn args_done() -> ServerEvent {
        ServerEvent::FunctionCallArgumentsDone {
            call_id: String::new(),
            arguments: String::new(),
        }
    }

    fn audio_delta(data: &[u8]) -> ServerEvent {
        ServerEvent::AudioDelta {
            delta: BASE64_STANDARD.encode(data),
        }
    }

    fn error_event(message: &str) -> ServerEvent {
        ServerEvent::Error {
            error: ApiError {
                error_type: "server_error".to_string(),
                code: None,
                message: message.to_string(),
                event_id: None,
            },
        }
    }

    /// Expect the two-message function result sequence and return the output item.
    fn assert_result_sequence(sent: &[ClientEvent], call_id: &str) -> ConversationItem {
        assert_eq!(sent.len(), 2, "expected exactly two outbound messages");
        let item = match &sent[0] {
            ClientEvent::ConversationItemCreate { item } => item.clone(),
            other => panic!("expected conversation.item.create, got {other:?}"),
        };
        assert_eq!(item.item_type, "function_call_output");
        assert_eq!(item.call_id.as_deref(), Some(call_id));
        assert!(matches!(sent[1], ClientEvent::ResponseCreate));
        item
    }

    #[tokio::test]
    async fn function_call_scenario_dispatches_registered_function() {
        let h = harness(vec![
            ServerEvent::ResponseCreated,
            function_call_item("get_time", "call_1"),
            args_delta("{"),
            args_delta("}"),
            args_done(),
        ]);
        h.dispatcher.run().await.unwrap();

        let sent = h.sent.lock();
        let item = assert_result_sequence(&sent, "call_1");
        assert_eq!(item.output.as_deref(), Some(r#"{"time":"12:00:00"}"#));
        assert_eq!(*h.seen_args.lock(), Some(json!({})));
    }

    #[tokio::test]
    async fn missing_function_synthesizes_error_result() {
        let h = harness(vec![
            ServerEvent::ResponseCreated,
            function_call_item("open_portal", "call_2"),
            args_done(),
        ]);
        h.dispatcher.run().await.unwrap();

        let sent = h.sent.lock();
        let item = assert_result_sequence(&sent, "call_2");
        let output = item.output.unwrap();
        assert!(output.contains("Function 'open_portal' not found."));
    }

    #[tokio::test]
    async fn argument_deltas_concatenate_into_one_object() {
        let h = harness(vec![
            function_call_item("get_time", "call_3"),
            args_delta(r#"{"zo"#),
            args_delta(r#"ne":"#),
            args_delta(r#""utc"}"#),
            args_done(),
        ]);
        h.dispatcher.run().await.unwrap();

        assert_eq!(*h.seen_args.lock(), Some(json!({"zone": "utc"})));
    }

    #[tokio::test]
    async fn malformed_arguments_become_empty_object() {
        let h = harness(vec![
            function_call_item("get_time", "call_4"),
            args_delta("not"),
            args_delta(" json"),
            args_done(),
        ]);
        h.dispatcher.run().await.unwrap();

        assert_eq!(*h.seen_args.lock(), Some(json!({})));
        // The two-message sequence still went out.
        assert_eq!(h.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn arguments_done_without_pending_call_is_ignored() {
        let h = harness(vec![args_delta("{}"), args_done()]);
        h.dispatcher.run().await.unwrap();
        assert!(h.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn audio_deltas_flush_once_in_arrival_order() {
        let h = harness(vec![
            ServerEvent::ResponseCreated,
            audio_delta(b"AAAA"),
            audio_delta(b"BB"),
            ServerEvent::ResponseDone,
        ]);
        let microphone = h.microphone.clone();
        let sink = h.sink.clone();
        h.dispatcher.run().await.unwrap();

        let played = sink.played.lock();
        assert_eq!(played.len(), 1, "expected exactly one flush");
        assert_eq!(&played[0][..], b"AAAABB");

        let transitions = microphone.transitions.lock();
        assert_eq!(
            *transitions,
            vec!["start_receiving", "stop_receiving"],
            "microphone follows turn boundaries"
        );
    }

    #[tokio::test]
    async fn turn_done_resets_accumulators() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::TextDelta {
                delta: "hello".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle_event(audio_delta(b"pcm"))
            .await
            .unwrap();
        assert_eq!(h.dispatcher.state.accumulated_text, "hello");
        assert_eq!(h.dispatcher.state.accumulated_audio.len(), 1);

        h.dispatcher
            .handle_event(ServerEvent::ResponseDone)
            .await
            .unwrap();
        assert!(h.dispatcher.state.accumulated_text.is_empty());
        assert!(h.dispatcher.state.accumulated_audio.is_empty());
    }

    #[tokio::test]
    async fn turn_done_resets_even_when_nothing_accumulated() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::ResponseDone)
            .await
            .unwrap();
        assert!(h.dispatcher.state.accumulated_text.is_empty());
        assert!(h.dispatcher.state.accumulated_audio.is_empty());
        assert!(h.sink.played.lock().is_empty(), "no flush without audio");
    }

    #[tokio::test]
    async fn speech_stopped_starts_timer_then_commits() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::SpeechStopped { audio_end_ms: 840 })
            .await
            .unwrap();

        assert!(h.dispatcher.state.response_timer.is_some());
        let sent = h.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], ClientEvent::InputAudioBufferCommit));
        assert!(
            h.microphone
                .transitions
                .lock()
                .contains(&"stop_recording")
        );
    }

    #[tokio::test]
    async fn turn_done_clears_response_timer() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::SpeechStopped { audio_end_ms: 0 })
            .await
            .unwrap();
        assert!(h.dispatcher.state.response_timer.is_some());

        h.dispatcher
            .handle_event(ServerEvent::ResponseDone)
            .await
            .unwrap();
        assert!(h.dispatcher.state.response_timer.is_none());
    }

    #[tokio::test]
    async fn double_speech_stopped_overwrites_timer() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::SpeechStopped { audio_end_ms: 1 })
            .await
            .unwrap();
        let first = h.dispatcher.state.response_timer;
        h.dispatcher
            .handle_event(ServerEvent::SpeechStopped { audio_end_ms: 2 })
            .await
            .unwrap();
        assert!(h.dispatcher.state.response_timer.is_some());
        assert!(h.dispatcher.state.response_timer.unwrap() >= first.unwrap());
        assert_eq!(h.sent.lock().len(), 2, "each stop commits");
    }

    #[tokio::test]
    async fn benign_errors_continue_fatal_errors_terminate() {
        let mut h = harness(vec![]);
        assert!(matches!(
            h.dispatcher
                .handle_event(error_event("input audio buffer is empty"))
                .await
                .unwrap(),
            LoopControl::Continue
        ));
        assert!(matches!(
            h.dispatcher
                .handle_event(error_event(
                    "Conversation already has an active response in progress"
                ))
                .await
                .unwrap(),
            LoopControl::Continue
        ));
        assert!(matches!(
            h.dispatcher
                .handle_event(error_event("something unexpected broke"))
                .await
                .unwrap(),
            LoopControl::Terminate
        ));
    }

    #[tokio::test]
    async fn fatal_error_ends_run_without_processing_later_events() {
        let h = harness(vec![
            error_event("unrecoverable failure"),
            ServerEvent::SpeechStopped { audio_end_ms: 0 },
        ]);
        h.dispatcher.run().await.unwrap();
        // The commit from the trailing speech_stopped never happened.
        assert!(h.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn rate_limits_resume_recording() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::RateLimitsUpdated {
                rate_limits: Vec::new(),
            })
            .await
            .unwrap();
        assert!(h.microphone.recording.load(Ordering::SeqCst));
        assert!(
            h.microphone
                .transitions
                .lock()
                .contains(&"set_recording")
        );
    }

    #[tokio::test]
    async fn unknown_and_informational_events_change_nothing() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::Unknown)
            .await
            .unwrap();
        h.dispatcher
            .handle_event(ServerEvent::SpeechStarted { audio_start_ms: 10 })
            .await
            .unwrap();
        assert!(h.sent.lock().is_empty());
        assert!(h.microphone.transitions.lock().is_empty());
        assert!(h.dispatcher.state.pending_function_call.is_none());
    }

    #[tokio::test]
    async fn non_function_output_items_do_not_open_a_call() {
        let mut h = harness(vec![]);
        h.dispatcher
            .handle_event(ServerEvent::OutputItemAdded {
                item: ConversationItem {
                    item_type: "message".to_string(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert!(h.dispatcher.state.pending_function_call.is_none());
    }

    #[tokio::test]
    async fn run_ends_cleanly_on_transport_close() {
        let h = harness(vec![ServerEvent::SpeechStarted { audio_start_ms: 0 }]);
        h.dispatcher.run().await.unwrap();
    }

    #[tokio::test]
    async fn text_deltas_reach_transcript_callback_in_order() {
        let h = harness(vec![
            ServerEvent::TextDelta {
                delta: "Hel".to_string(),
            },
            ServerEvent::TextDelta {
                delta: "lo".to_string(),
            },
        ]);
        let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        h.dispatcher
            .on_transcript(Arc::new(move |delta| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().push(delta);
                })
            }))
            .run()
            .await
            .unwrap();
        assert_eq!(*chunks.lock(), vec!["Hel".to_string(), "lo".to_string()]);
    }
}
