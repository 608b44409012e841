//! Built-in assistant functions.

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::format_description;

use super::{FunctionRegistry, handler};
use crate::protocol::ToolDef;

/// Register the built-in functions and their tool schemas.
pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        ToolDef {
            tool_type: "function".to_string(),
            name: "get_current_time".to_string(),
            description: Some("Returns the current time.".to_string()),
            parameters: Some(json!({
                "type": "object",
                "properties": {},
                "required": [],
            })),
        },
        handler(|_args| async { get_current_time() }),
    );

    registry.register(
        ToolDef {
            tool_type: "function".to_string(),
            name: "get_random_number".to_string(),
            description: Some("Returns a random number between 1 and 100.".to_string()),
            parameters: Some(json!({
                "type": "object",
                "properties": {},
                "required": [],
            })),
        },
        handler(|_args| async { get_random_number() }),
    );
}

fn get_current_time() -> Value {
    let format = format_description!("[hour]:[minute]:[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let formatted = now
        .format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    json!({ "current_time": formatted })
}

fn get_random_number() -> Value {
    json!({ "random_number": pseudo_random_1_to_100() })
}

/// Clock-seeded LCG, good enough for a toy dice roll without pulling in the
/// rand crate.
fn pseudo_random_1_to_100() -> u64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = seed.wrapping_mul(1103515245).wrapping_add(12345) % (1 << 31);
    random % 100 + 1
}
