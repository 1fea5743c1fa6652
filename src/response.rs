//! The single JSON document written to stdout.
//!
//! A response is kept as its serialized text. Documents produced inside the
//! isolate are written exactly as `JSON.stringify` emitted them, so results
//! serde_json cannot represent (lone surrogates, very deep nesting) still
//! reach the harness unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::process::ExitCode;

/// Failure details reported to the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.filter(|s| !s.is_empty()),
        }
    }
}

/// Outcome of one bridge invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    ok: bool,
    document: String,
}

#[derive(Deserialize)]
struct FailureDocument {
    error: ErrorBody,
}

impl Response {
    /// `result` is `None` when the script's value has no JSON form
    /// (`undefined`, functions, symbols); the field is then left out.
    pub fn success(result: Option<Value>) -> Self {
        let mut document = Map::new();
        document.insert("ok".into(), Value::Bool(true));
        if let Some(result) = result {
            document.insert("result".into(), result);
        }
        Self {
            ok: true,
            document: Value::Object(document).to_string(),
        }
    }

    pub fn failure(error: ErrorBody) -> Self {
        let mut body = Map::new();
        body.insert("message".into(), Value::String(error.message));
        if let Some(stack) = error.stack {
            body.insert("stack".into(), Value::String(stack));
        }

        let mut document = Map::new();
        document.insert("ok".into(), Value::Bool(false));
        document.insert("error".into(), Value::Object(body));
        Self {
            ok: false,
            document: Value::Object(document).to_string(),
        }
    }

    /// A document already serialized by the request runner.
    pub(crate) fn serialized(ok: bool, document: String) -> Self {
        Self { ok, document }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// The exact bytes written to stdout.
    pub fn as_json(&self) -> &str {
        &self.document
    }

    /// Error details of a failure response.
    pub fn error(&self) -> Option<ErrorBody> {
        if self.ok {
            return None;
        }
        let failure: FailureDocument = serde_json::from_str(&self.document).ok()?;
        Some(ErrorBody::new(failure.error.message, failure.error.stack))
    }

    /// `0` for success, `1` for any failure.
    pub fn exit_status(&self) -> u8 {
        if self.ok {
            0
        } else {
            1
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// Write the document in one `write_all`, then flush.
    pub fn write_to(&self, mut out: impl Write) -> std::io::Result<()> {
        out.write_all(self.document.as_bytes())?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let response = Response::success(Some(json!("hi")));
        assert_eq!(response.as_json(), r#"{"ok":true,"result":"hi"}"#);
        assert!(response.is_ok());
        assert_eq!(response.exit_status(), 0);
        assert_eq!(response.error(), None);
    }

    #[test]
    fn test_success_without_result_omits_field() {
        assert_eq!(Response::success(None).as_json(), r#"{"ok":true}"#);
        assert_eq!(
            Response::success(Some(Value::Null)).as_json(),
            r#"{"ok":true,"result":null}"#
        );
    }

    #[test]
    fn test_failure_shape() {
        let response = Response::failure(ErrorBody::new("boom", Some("Error: boom\n    at x".into())));
        assert_eq!(
            serde_json::from_str::<Value>(response.as_json()).unwrap(),
            json!({ "ok": false, "error": { "message": "boom", "stack": "Error: boom\n    at x" } })
        );
        assert!(!response.is_ok());
        assert_eq!(response.exit_status(), 1);
        assert_eq!(response.error().unwrap().message, "boom");
    }

    #[test]
    fn test_failure_without_stack_omits_field() {
        let response = Response::failure(ErrorBody::new("bad input", None));
        assert_eq!(
            response.as_json(),
            r#"{"ok":false,"error":{"message":"bad input"}}"#
        );

        let empty_stack = ErrorBody::new("bad input", Some(String::new()));
        assert_eq!(empty_stack.stack, None);
    }

    #[test]
    fn test_result_key_order_preserved() {
        let response = Response::success(Some(json!({ "z": 1, "a": 2, "m": 3 })));
        assert_eq!(response.as_json(), r#"{"ok":true,"result":{"z":1,"a":2,"m":3}}"#);
    }

    #[test]
    fn test_serialized_document_is_kept_verbatim() {
        let document = r#"{"ok":true,"result":"\ud83d"}"#.to_string();
        let response = Response::serialized(true, document.clone());

        assert_eq!(response.as_json(), document);
        assert_eq!(response.exit_status(), 0);

        let mut out = Vec::new();
        response.write_to(&mut out).unwrap();
        assert_eq!(out, document.as_bytes());
    }

    #[test]
    fn test_error_details_from_serialized_failure() {
        let response = Response::serialized(
            false,
            r#"{"ok":false,"error":{"message":"nope","stack":""}}"#.into(),
        );
        assert_eq!(response.error(), Some(ErrorBody::new("nope", None)));
        assert_eq!(response.exit_status(), 1);
    }

    #[test]
    fn test_write_to_emits_single_document() {
        let mut out = Vec::new();
        Response::success(Some(json!([1, 2]))).write_to(&mut out).unwrap();
        assert_eq!(out, br#"{"ok":true,"result":[1,2]}"#);
    }
}
