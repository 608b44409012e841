//! Function registry for model-invoked tool calls.
//!
//! The registry is an immutable (after construction) mapping from function
//! name to an async invocable. The dispatcher looks functions up by name when
//! the model finishes streaming a call's arguments; it never mutates the
//! registry. Invocables take the parsed argument object and return a JSON
//! value serializable to the wire. A failing invocable is expected to return
//! an error-shaped value rather than panic.

pub mod builtin;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::ToolDef;

/// Async invocable registered under a function name.
pub type FunctionHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

/// Wrap an async closure into a [`FunctionHandler`].
pub fn handler<F, Fut>(f: F) -> FunctionHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Registry of functions the assistant may call.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionHandler>,
    tools: Vec<ToolDef>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in functions registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register a function with its tool schema.
    pub fn register(&mut self, tool: ToolDef, handler: FunctionHandler) {
        self.functions.insert(tool.name.clone(), handler);
        self.tools.push(tool);
    }

    /// Look up a function by name.
    pub fn lookup(&self, name: &str) -> Option<FunctionHandler> {
        self.functions.get(name).cloned()
    }

    /// Tool schemas to advertise in the session configuration.
    pub fn tool_definitions(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
