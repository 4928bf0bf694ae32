//! Tool-call argument parsing with one repair attempt.

use serde_json::{json, Value};

use paper_core::{is_valid_json, try_fix_incomplete_json};

/// Parse an argument string, attempting the JSON repair once. The second
/// failure is the caller's to report as an error tool result.
pub(crate) fn parse_tool_args(arguments: &str) -> Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    if is_valid_json(arguments) {
        return serde_json::from_str(arguments).map_err(|e| e.to_string());
    }
    let repaired = try_fix_incomplete_json(arguments);
    serde_json::from_str(&repaired).map_err(|e| e.to_string())
}
