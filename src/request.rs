//! Request decoding.
//!
//! The harness sends one JSON object on stdin:
//!
//! ```json
//! { "html": "<p>hi</p>", "script": "return 1;", "options": { "runScripts": "dangerously" } }
//! ```
//!
//! Missing or `null` fields fall back to their defaults; unknown keys are ignored.
//! An `options` value that is not an object (`false`, `"x"`, `[]`) counts as
//! no options at all.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// How the DOM engine treats `<script>` elements found in the HTML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunScripts {
    /// Inline scripts execute while the document is constructed.
    #[default]
    Dangerously,
    /// Only scripts evaluated from outside (our runner) execute.
    OutsideOnly,
}

/// Options as received on the wire, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default)]
    pub run_scripts: Option<RunScripts>,
    #[serde(default)]
    pub pretend_to_be_visual: Option<bool>,
}

/// Engine options with defaults applied; serialized straight into the
/// `JSDOM` constructor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub run_scripts: RunScripts,
    pub pretend_to_be_visual: bool,
}

impl RequestOptions {
    pub fn resolve(&self) -> RunOptions {
        RunOptions {
            run_scripts: self.run_scripts.unwrap_or_default(),
            pretend_to_be_visual: self.pretend_to_be_visual.unwrap_or(true),
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Request {
    #[serde(default, deserialize_with = "null_as_default")]
    pub html: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub script: String,
    #[serde(default, deserialize_with = "object_or_default")]
    pub options: RequestOptions,
}

/// What the in-isolate runner receives.
#[derive(Debug, Serialize)]
pub(crate) struct RunnerInput<'a> {
    pub html: &'a str,
    pub script: &'a str,
    pub options: RunOptions,
}

impl Request {
    /// Decode a request from raw stdin bytes.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so a stray byte inside
    /// a string literal does not fail the whole request.
    pub fn from_slice(input: &[u8]) -> Result<Self, serde_json::Error> {
        let text = String::from_utf8_lossy(input);
        serde_json::from_str(&text)
    }

    pub(crate) fn runner_input(&self) -> RunnerInput<'_> {
        RunnerInput {
            html: &self.html,
            script: &self.script,
            options: self.options.resolve(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn object_or_default<'de, D>(deserializer: D) -> Result<RequestOptions, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        options @ Value::Object(_) => RequestOptions::deserialize(options).map_err(D::Error::custom),
        _ => Ok(RequestOptions::default()),
    }
}
