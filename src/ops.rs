//! Host ops backing the globals in `bootstrap.js`.
//!
//! The DOM engine expects a browser-ish host: a console, timers, a clock,
//! base64 helpers and random values. None of them touch stdout.

use anyhow::{anyhow, Error};
use base64::Engine;
use deno_core::{op2, OpState};
use std::time::{Duration, Instant};

// ============================================================================
// Console Capture
// ============================================================================

/// Console output captured from the isolate, replayed through tracing once
/// the run finishes.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.warns.is_empty() && self.errors.is_empty()
    }

    pub fn emit(&self) {
        for line in &self.logs {
            tracing::info!(target: "dom_bridge::console", "{}", line);
        }
        for line in &self.warns {
            tracing::warn!(target: "dom_bridge::console", "{}", line);
        }
        for line in &self.errors {
            tracing::error!(target: "dom_bridge::console", "{}", line);
        }
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Timers and Clock
// ============================================================================

/// Moment the runtime was created; `performance.now()` counts from here.
#[derive(Debug, Clone, Copy)]
pub struct TimeOrigin(pub Instant);

impl Default for TimeOrigin {
    fn default() -> Self {
        Self(Instant::now())
    }
}

#[op2(async)]
pub async fn op_timer_sleep(millis: f64) {
    tokio::time::sleep(timer_delay(millis)).await;
}

#[op2(fast)]
pub fn op_now(state: &mut OpState) -> f64 {
    let origin = state
        .try_borrow::<TimeOrigin>()
        .copied()
        .unwrap_or_default();
    origin.0.elapsed().as_secs_f64() * 1000.0
}

/// Clamp a JS delay to something tokio accepts. NaN and negatives fire
/// immediately; delays too large to represent never fire.
pub fn timer_delay(millis: f64) -> Duration {
    if millis > 0.0 {
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> Result<String, Error> {
    encode_base64(data)
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, Error> {
    decode_base64(data)
}

/// `btoa` semantics: every char must fit in a byte (Latin-1).
pub fn encode_base64(data: &str) -> Result<String, Error> {
    let bytes = data
        .chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| anyhow!("Invalid character: btoa only accepts Latin-1 input"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// `atob` semantics: whitespace is ignored, output is a Latin-1 string.
pub fn decode_base64(data: &str) -> Result<String, Error> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    Ok(bytes.into_iter().map(char::from).collect())
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    dom_bridge_host,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_timer_sleep,
        op_now,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_btoa,
        op_atob,
    ],
    esm_entry_point = "ext:dom_bridge_host/bootstrap.js",
    esm = ["ext:dom_bridge_host/bootstrap.js" = "src/bootstrap.js"],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btoa_latin1() {
        assert_eq!(encode_base64("hello").unwrap(), "aGVsbG8=");
        assert_eq!(encode_base64("\u{e9}").unwrap(), "6Q==");
        assert!(encode_base64("\u{2713}").is_err());
    }

    #[test]
    fn test_atob_round_trips_bytes() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), "hello");
        assert_eq!(decode_base64("6Q==").unwrap(), "\u{e9}");
        assert_eq!(decode_base64("aGVs\n bG8=").unwrap(), "hello");
        assert!(decode_base64("***").is_err());
    }

    #[test]
    fn test_timer_delay_clamps() {
        assert_eq!(timer_delay(0.0), Duration::ZERO);
        assert_eq!(timer_delay(-5.0), Duration::ZERO);
        assert_eq!(timer_delay(f64::NAN), Duration::ZERO);
        assert_eq!(timer_delay(250.0), Duration::from_millis(250));
        assert_eq!(timer_delay(f64::INFINITY), Duration::MAX);
    }

    #[test]
    fn test_console_output_is_empty() {
        let mut output = ConsoleOutput::default();
        assert!(output.is_empty());
        output.warns.push("careful".into());
        assert!(!output.is_empty());
    }
}
