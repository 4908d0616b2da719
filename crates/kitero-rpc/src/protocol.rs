//! The wire protocol: one JSON array per line in, one JSON object per
//! line out.
//!
//! A request is `[method, arg1, arg2, ...]`. A response is either
//! `{"status": 0, "value": ...}` or, if the method raised,
//! `{"status": -1, "exception": {"class": ..., "message": ..., "traceback": ...}}`.
//! Existing clients speaking this envelope shape need no changes.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid RPC: not a JSON array")]
    NotAnArray,
    #[error("invalid RPC: empty array")]
    EmptyArray,
    #[error("method {0:?} is not exported")]
    NotExported(String),
    #[error("method {method:?} expects {expected} argument(s), got {got}")]
    WrongArity {
        method: String,
        expected: &'static str,
        got: usize,
    },
    #[error("argument {index} to {method:?} is malformed: {source}")]
    BadArgument {
        method: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Router(#[from] kitero_core::RouterError),
    #[error("{0}")]
    Config(#[from] kitero_core::ConfigError),
}

impl ProtocolError {
    /// A short, stable label standing in for a Python-style exception
    /// class name (`ValueError`, `RuntimeError`, ...), kept so clients
    /// pattern-matching on `exception.class` see a recognizable name
    /// rather than this crate's internal enum variant names.
    fn class(&self) -> &'static str {
        match self {
            ProtocolError::NotAnArray | ProtocolError::EmptyArray | ProtocolError::WrongArity { .. } => {
                "ValueError"
            }
            ProtocolError::NotExported(_) => "AttributeError",
            ProtocolError::BadArgument { .. } => "TypeError",
            ProtocolError::Router(_) => "RouterError",
            ProtocolError::Config(_) => "ConfigError",
        }
    }
}

#[derive(Debug, Serialize)]
struct ExceptionInfo {
    class: String,
    message: String,
    traceback: String,
}

/// Serializes the envelope for a method's outcome: `{"status": 0,
/// "value": ...}` on success, `{"status": -1, "exception": {...}}` on
/// failure. There is no Python traceback to capture here, so the
/// `traceback` field carries this crate's `{:?}` rendering of the error
/// chain instead — still useful for diagnosis, just not a stack trace.
pub fn encode_result(result: Result<Value, ProtocolError>) -> String {
    let body = match result {
        Ok(value) => serde_json::json!({ "status": 0, "value": value }),
        Err(err) => {
            let exception = ExceptionInfo {
                class: err.class().to_string(),
                message: err.to_string(),
                traceback: format!("{err:?}"),
            };
            serde_json::json!({ "status": -1, "exception": exception })
        }
    };
    serde_json::to_string(&body).expect("envelope is always serializable")
}

/// Parses one request line into a method name and its argument list.
pub fn decode_request(line: &str) -> Result<(String, Vec<Value>), ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(|_| ProtocolError::NotAnArray)?;
    let mut items = match value {
        Value::Array(items) => items,
        _ => return Err(ProtocolError::NotAnArray),
    };
    if items.is_empty() {
        return Err(ProtocolError::EmptyArray);
    }
    let method = items.remove(0);
    let method = method.as_str().ok_or(ProtocolError::NotAnArray)?.to_string();
    Ok((method, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_method_and_args() {
        let (method, args) = decode_request(r#"["bind_client", "192.168.15.2", "eth1", "qos1"]"#).unwrap();
        assert_eq!(method, "bind_client");
        assert_eq!(args, vec![Value::from("192.168.15.2"), Value::from("eth1"), Value::from("qos1")]);
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(decode_request(r#"{"a": 1}"#), Err(ProtocolError::NotAnArray)));
    }

    #[test]
    fn rejects_empty_array() {
        assert!(matches!(decode_request("[]"), Err(ProtocolError::EmptyArray)));
    }

    #[test]
    fn encodes_success_and_failure() {
        let ok = encode_result(Ok(Value::from(42)));
        assert_eq!(ok, r#"{"status":0,"value":42}"#);

        let err = encode_result(Err(ProtocolError::NotExported("wat".to_string())));
        let parsed: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(parsed["status"], -1);
        assert_eq!(parsed["exception"]["class"], "AttributeError");
    }
}
