use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, engine_ctx, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::responses::{self, SubmitParams};
use serde_json::json;

fn handle_responses_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let params: SubmitParams = match parse_params(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match responses::submit_response(&ctx, &params) {
        Ok(r) => ok(&req.id, json!({ "responseId": r.id, "response": r })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_responses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match responses::list_responses(conn, &session_id) {
        Ok(list) => ok(&req.id, json!({ "responses": list })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.submit" => Some(handle_responses_submit(state, req)),
        "responses.list" => Some(handle_responses_list(state, req)),
        _ => None,
    }
}
