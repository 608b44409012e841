pub mod audio;
pub mod config;
pub mod functions;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod transport;

// Re-export commonly used items for convenience
pub use config::AssistantConfig;
pub use functions::FunctionRegistry;
pub use session::{SessionDispatcher, SessionError, SessionResult};
pub use transport::{Transport, WsTransport};
