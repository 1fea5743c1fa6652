//! # dom-bridge
//!
//! Runs a script against a simulated browser document and reports the result
//! as JSON, so a harness in another process can check DOM behavior without
//! embedding a DOM itself.
//!
//! The DOM is provided by an external engine: an ES module exporting a
//! jsdom-compatible `JSDOM` constructor. It is loaded into a deno_core (V8)
//! isolate that supplies the host globals such an engine expects.
//!
//! ## Protocol
//!
//! Request (stdin, read to end):
//!
//! ```json
//! { "html": "<p>hi</p>", "script": "return document.querySelector('p').textContent;", "options": {} }
//! ```
//!
//! Response (stdout, written once):
//!
//! ```json
//! { "ok": true, "result": "hi" }
//! { "ok": false, "error": { "message": "boom", "stack": "Error: boom\n    at ..." } }
//! ```
//!
//! The process exits with `0` for `ok: true` and `1` otherwise.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dom_bridge::{run, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig {
//!         engine_path: Some("./dom-engine/index.js".into()),
//!         ..Default::default()
//!     };
//!
//!     let response = run(br#"{"html":"<p>hi</p>","script":"return 1;"}"#, &config).await;
//!     assert!(response.is_ok());
//! }
//! ```

mod error;
mod loader;
mod ops;
mod request;
mod response;
mod runtime;

pub use error::BridgeError;
pub use loader::EngineLoader;
pub use ops::ConsoleOutput;
pub use request::{Request, RequestOptions, RunOptions, RunScripts};
pub use response::{ErrorBody, Response};
pub use runtime::{create_runtime, execute_request, BridgeConfig, BridgeRuntime};

use tokio::io::AsyncReadExt;

/// Handle one request given as raw stdin bytes.
///
/// Never fails: every fault becomes a failure response.
pub async fn run(input: &[u8], config: &BridgeConfig) -> Response {
    match try_run(input, config).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(error = %err, "request failed outside the runner");
            Response::failure(err.into_error_body())
        }
    }
}

/// Read stdin to end-of-stream, then handle it with [`run`].
pub async fn run_stdin(config: &BridgeConfig) -> Response {
    let mut input = Vec::new();
    match tokio::io::stdin().read_to_end(&mut input).await {
        Ok(bytes) => {
            tracing::debug!(bytes, "request received");
            run(&input, config).await
        }
        Err(err) => Response::failure(BridgeError::from(err).into_error_body()),
    }
}

async fn try_run(input: &[u8], config: &BridgeConfig) -> Result<Response, BridgeError> {
    let request = Request::from_slice(input)?;
    let mut runtime = create_runtime(config)?;

    let outcome = execute_request(&mut runtime, &request, config.timeout_ms).await;

    let console = runtime.take_console();
    if !console.is_empty() {
        console.emit();
    }

    outcome
}
