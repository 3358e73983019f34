use crate::analytics;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_analytics_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = req
        .params
        .get("textPreviewLimit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(state.config.text_preview_limit);
    match analytics::session_analytics(conn, &session_id, limit) {
        Ok(a) => ok(&req.id, json!({ "analytics": a })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.session" => Some(handle_analytics_session(state, req)),
        _ => None,
    }
}
