//! Assistant configuration.
//!
//! Credentials come from the environment (a `.env` file is honored), model
//! and voice can be overridden per run, and the session bootstrap payload is
//! assembled here from the registry's advertised tools.

use crate::functions::FunctionRegistry;
use crate::protocol::{SessionConfig, TurnDetection};
use crate::session::{SessionError, SessionResult};

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Default assistant voice.
pub const DEFAULT_VOICE: &str = "alloy";

/// Default system instructions.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a helpful voice assistant. Keep answers short and conversational.";

/// Server VAD activation threshold.
const VAD_THRESHOLD: f32 = 0.5;

/// Audio retained before detected speech (ms).
const VAD_PREFIX_PADDING_MS: u32 = 300;

/// Silence that ends a user turn (ms).
const VAD_SILENCE_DURATION_MS: u32 = 500;

/// Runtime configuration for one assistant process.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// API key for the realtime endpoint.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Assistant voice.
    pub voice: String,
    /// System instructions.
    pub instructions: String,
}

impl AssistantConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> SessionResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            SessionError::AuthenticationFailed("OPENAI_API_KEY is not set".to_string())
        })?;
        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        })
    }

    /// Build the `session.update` payload sent right after connecting.
    pub fn build_session_config(&self, registry: &FunctionRegistry) -> SessionConfig {
        let tools = registry.tool_definitions();
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(VAD_THRESHOLD),
                prefix_padding_ms: Some(VAD_PREFIX_PADDING_MS),
                silence_duration_ms: Some(VAD_SILENCE_DURATION_MS),
            }),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        }
    }
}
