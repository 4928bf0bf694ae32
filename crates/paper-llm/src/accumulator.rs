//! Accumulation of streamed tool-call deltas into complete calls.
//!
//! Providers emit each call's `id` and `name` once and its arguments as JSON
//! fragments. A new id closes the call in flight: its argument string is
//! parsed, repaired if needed, and dropped with a warning when neither
//! succeeds.

use paper_core::{is_valid_json, try_fix_incomplete_json, FunctionCall, ToolCall};

use crate::types::ToolCallDelta;

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    current: Option<PartialCall>,
    completed: Vec<ToolCall>,
}

#[derive(Debug)]
struct PartialCall {
    id: String,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id {
            // Id boundary: seal whatever was in flight.
            self.seal_current();
            self.current = Some(PartialCall {
                id,
                name: None,
                arguments: String::new(),
            });
        }

        if let Some(current) = self.current.as_mut() {
            if let Some(name) = delta.name {
                current.name = Some(name);
            }
            if let Some(arguments) = delta.arguments {
                current.arguments.push_str(&arguments);
            }
        } else {
            log::warn!("丢弃没有所属工具调用的参数分片");
        }
    }

    pub fn has_calls(&self) -> bool {
        self.current.is_some() || !self.completed.is_empty()
    }

    /// Seal the in-flight call and return everything accepted, in LLM order.
    pub fn finish(mut self) -> Vec<ToolCall> {
        self.seal_current();
        self.completed
    }

    fn seal_current(&mut self) {
        let Some(partial) = self.current.take() else {
            return;
        };
        let Some(name) = partial.name else {
            log::warn!("工具调用 {} 缺少名称，跳过", partial.id);
            return;
        };

        let arguments = if is_valid_json(&partial.arguments) {
            partial.arguments
        } else {
            let fixed = try_fix_incomplete_json(&partial.arguments);
            if is_valid_json(&fixed) {
                log::info!("修复并完成工具调用: {name}");
                fixed
            } else {
                log::warn!(
                    "工具调用参数无法修复，跳过: {name}, 参数: {:?}",
                    &partial.arguments[..partial.arguments.len().min(100)]
                );
                return;
            }
        };

        self.completed.push(ToolCall {
            id: partial.id,
            tool_type: "function".to_string(),
            function: FunctionCall { name, arguments },
        });
    }
}
