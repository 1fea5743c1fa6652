//! Bridge failures and their mapping onto the failure response.

use crate::response::ErrorBody;
use deno_core::error::JsError;
use std::path::PathBuf;

/// Everything that can go wrong between reading stdin and writing stdout.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to read request from stdin: {0}")]
    Stdin(#[from] std::io::Error),

    /// Carries the JSON parser's message verbatim.
    #[error("{0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),

    #[error("no DOM engine configured (pass --engine or set DOM_BRIDGE_ENGINE)")]
    EngineNotConfigured,

    #[error("invalid DOM engine '{}': {reason}", .path.display())]
    EnginePath { path: PathBuf, reason: String },

    /// A fault raised inside the isolate that escaped the request runner.
    #[error("{0}")]
    Script(anyhow::Error),

    #[error("script execution timed out after {0}ms")]
    Timeout(u64),

    #[error("script exceeded the heap limit of {} MB", .0 / (1024 * 1024))]
    HeapLimit(usize),

    #[error("request runner produced a malformed outcome: {0}")]
    MalformedOutcome(String),
}

impl BridgeError {
    /// Convert into the wire error, keeping the JS `message` and `stack`
    /// when the fault came from the isolate.
    pub fn into_error_body(self) -> ErrorBody {
        match self {
            Self::Script(err) => match err.downcast_ref::<JsError>() {
                Some(js_error) => ErrorBody::new(
                    js_error
                        .message
                        .clone()
                        .unwrap_or_else(|| js_error.exception_message.clone()),
                    js_error.stack.clone(),
                ),
                None => ErrorBody::new(err.to_string(), None),
            },
            other => ErrorBody::new(other.to_string(), None),
        }
    }
}
