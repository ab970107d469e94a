use serde::{Deserialize, Serialize};

// =============================================================================
// Execution Types
// =============================================================================

/// Uniform result of running a snippet: spawn failures, timeouts and
/// runtime errors all land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Combined stdout and stderr, in arrival order.
    pub output: String,
}

impl ExecutionOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Marker appended to the output of a run killed by the wall clock.
pub fn timeout_marker(timeout_ms: u64) -> String {
    format!(
        "[Execution terminated after exceeding timeout of {}ms]",
        timeout_ms
    )
}
