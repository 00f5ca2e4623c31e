//! Progress events for tool invocation.
//!
//! Events travel over a channel handed into one invoker call, so listener
//! lifetime is scoped to that call and cannot leak across runs.

use serde::{Deserialize, Serialize};

/// One progress update from the tool invoker, e.g. "searching the web".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Tool name, or "probe" for the detection request itself.
    pub tool: String,
    pub detail: String,
}

impl ToolEvent {
    pub fn new(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}
