//! Bridge runtime - hosts the DOM engine in a V8 isolate and runs one request.
//!
//! The isolate gets only what a DOM engine needs from its host:
//! - console.log/warn/error (captured, replayed through tracing)
//! - setTimeout/setInterval/queueMicrotask, performance.now
//! - atob, btoa
//! - crypto.randomUUID, crypto.getRandomValues
//! - Module loading from the engine directory only

use crate::error::BridgeError;
use crate::loader::EngineLoader;
use crate::ops::{dom_bridge_host, ConsoleOutput, TimeOrigin};
use crate::request::Request;
use crate::response::Response;
use deno_core::{v8, JsRuntime, ModuleSpecifier, PollEventLoopOptions, RuntimeOptions};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MB: usize = 1024 * 1024;

/// Configuration for a bridge run
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// ES module exporting a jsdom-compatible `JSDOM` constructor
    pub engine_path: Option<PathBuf>,
    /// Maximum V8 heap size in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for the whole run in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
}

/// A V8 isolate prepared for one request.
pub struct BridgeRuntime {
    js: JsRuntime,
    engine: ModuleSpecifier,
    max_heap_size: Option<usize>,
    heap_exhausted: Arc<AtomicBool>,
}

impl BridgeRuntime {
    /// Drain console output captured so far.
    pub fn take_console(&mut self) -> ConsoleOutput {
        let state = self.js.op_state();
        let mut state = state.borrow_mut();
        let console = std::mem::take(state.borrow_mut::<ConsoleOutput>());
        console
    }
}

/// Create an isolate with the host extension and the engine loader installed.
pub fn create_runtime(config: &BridgeConfig) -> Result<BridgeRuntime, BridgeError> {
    let engine_path = config
        .engine_path
        .as_ref()
        .ok_or(BridgeError::EngineNotConfigured)?;
    let loader = EngineLoader::new(engine_path)?;
    let engine = loader.entry().clone();

    let create_params = config
        .max_heap_size
        .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut js = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![dom_bridge_host::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    let heap_exhausted = Arc::new(AtomicBool::new(false));
    if config.max_heap_size.is_some() {
        let isolate_handle = js.v8_isolate().thread_safe_handle();
        let exhausted = Arc::clone(&heap_exhausted);
        js.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / MB,
                initial_mb = initial / MB,
                "near heap limit, terminating script"
            );
            exhausted.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
            // Room for V8 to unwind the termination instead of aborting.
            current * 2
        });
    }

    {
        let state = js.op_state();
        let mut state = state.borrow_mut();
        state.put(ConsoleOutput::default());
        state.put(TimeOrigin::default());
    }

    tracing::debug!(engine = %engine, "runtime created");

    Ok(BridgeRuntime {
        js,
        engine,
        max_heap_size: config.max_heap_size,
        heap_exhausted,
    })
}

/// Run `request` against the DOM engine and return the runner's response.
///
/// Faults raised inside the isolate while building the document or running
/// the script come back as a failure `Response`; `Err` is reserved for faults
/// that escaped the runner, the timeout and the heap limit.
pub async fn execute_request(
    runtime: &mut BridgeRuntime,
    request: &Request,
    timeout_ms: Option<u64>,
) -> Result<Response, BridgeError> {
    let result = match timeout_ms {
        Some(ms) => {
            // Synchronous loops never yield, so the watchdog terminates the
            // isolate from another thread; stalled async work is dropped by
            // the tokio timeout.
            let isolate_handle = runtime.js.v8_isolate().thread_safe_handle();
            let fired = Arc::new(AtomicBool::new(false));
            let watchdog_fired = Arc::clone(&fired);
            let watchdog = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                watchdog_fired.store(true, Ordering::SeqCst);
                isolate_handle.terminate_execution();
            });

            let result =
                tokio::time::timeout(Duration::from_millis(ms), execute_request_inner(runtime, request))
                    .await;
            watchdog.abort();

            match result {
                Err(_elapsed) => Err(BridgeError::Timeout(ms)),
                Ok(Err(_)) if fired.load(Ordering::SeqCst) => Err(BridgeError::Timeout(ms)),
                Ok(result) => result,
            }
        }
        None => execute_request_inner(runtime, request).await,
    };

    match result {
        Err(BridgeError::Timeout(ms)) => {
            tracing::warn!(timeout_ms = ms, "script execution timed out");
            Err(BridgeError::Timeout(ms))
        }
        Err(_) if runtime.heap_exhausted.load(Ordering::SeqCst) => Err(BridgeError::HeapLimit(
            runtime.max_heap_size.unwrap_or_default(),
        )),
        result => result,
    }
}

async fn execute_request_inner(
    runtime: &mut BridgeRuntime,
    request: &Request,
) -> Result<Response, BridgeError> {
    let started = Instant::now();

    let engine_json = serde_json::to_string(runtime.engine.as_str())?;
    let input_json = serde_json::to_string(&request.runner_input())?;
    let run_code = format!("globalThis.__dom_bridge_run__({engine_json}, {input_json})");

    let pending = runtime
        .js
        .execute_script("<dom-bridge>", run_code)
        .map_err(BridgeError::Script)?;

    // Drive the event loop only until the runner settles; timers the page
    // left behind (animation frames, intervals) must not keep us alive.
    let settled = runtime.js.resolve(pending);
    let outcome = runtime
        .js
        .with_event_loop_promise(Box::pin(settled), PollEventLoopOptions::default())
        .await
        .map_err(BridgeError::Script)?;

    let response = {
        let scope = &mut runtime.js.handle_scope();
        let local = v8::Local::new(scope, outcome);
        runner_outcome(scope, local)?
    };

    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = response.is_ok(),
        "request settled"
    );

    Ok(response)
}

/// Unpack the runner's `[ok, document]` pair. The document is kept as text;
/// `JSON.stringify` escapes lone surrogates, so nothing is lost converting it.
fn runner_outcome(
    scope: &mut v8::HandleScope,
    outcome: v8::Local<v8::Value>,
) -> Result<Response, BridgeError> {
    let malformed = |what: &str| BridgeError::MalformedOutcome(what.to_string());

    let pair = v8::Local::<v8::Array>::try_from(outcome)
        .map_err(|_| malformed("runner did not resolve to an [ok, document] pair"))?;
    if pair.length() != 2 {
        return Err(malformed("runner did not resolve to an [ok, document] pair"));
    }

    let ok = pair
        .get_index(scope, 0)
        .filter(|flag| flag.is_boolean())
        .ok_or_else(|| malformed("ok flag is not a boolean"))?;
    let document = pair
        .get_index(scope, 1)
        .filter(|text| text.is_string())
        .ok_or_else(|| malformed("document is not a string"))?;

    Ok(Response::serialized(
        ok.is_true(),
        document.to_rust_string_lossy(scope),
    ))
}
