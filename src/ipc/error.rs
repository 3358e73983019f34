use crate::error::EngineError;
use log::error;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps an engine error onto the wire shape, keeping its stable code.
pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    if let EngineError::Storage(inner) = e {
        error!("request {}: storage failure: {}", id, inner);
    }
    err(id, e.code(), e.to_string(), e.details())
}
