use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, engine_ctx, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::ResponseSession;
use crate::sessions::{self, CreateSessionParams, SessionFilter, UpdateSessionParams};
use serde_json::json;

fn session_reply(req: &Request, result: EngineResult<ResponseSession>) -> serde_json::Value {
    match result {
        Ok(s) => ok(&req.id, json!({ "session": s })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let params: CreateSessionParams = match parse_params(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match sessions::create_session(&ctx, &params) {
        Ok(s) => ok(
            &req.id,
            json!({
                "sessionId": s.id,
                "anonymousKey": s.anonymous_key,
                "status": s.status,
                "session": s,
            }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_sessions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    session_reply(req, sessions::load_session(conn, &session_id))
}

fn handle_sessions_by_key(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    session_reply(req, sessions::session_by_key(conn, &key))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter: SessionFilter = match parse_params(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    match sessions::list_sessions(conn, &filter) {
        Ok(list) => ok(&req.id, json!({ "sessions": list })),
        Err(e) => engine_err(&req.id, &e),
    }
}

/// Shared shape of the id-only lifecycle calls.
fn with_session_id(
    state: &mut AppState,
    req: &Request,
    op: impl FnOnce(&EngineContext<'_>, &str) -> EngineResult<ResponseSession>,
) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    session_reply(req, op(&ctx, &session_id))
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match sessions::delete_session(&ctx, &session_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let params: UpdateSessionParams = match parse_params(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    session_reply(req, sessions::update_session(&ctx, &session_id, &params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.get" => Some(handle_sessions_get(state, req)),
        "sessions.byKey" => Some(handle_sessions_by_key(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.start" => Some(with_session_id(state, req, sessions::start_session)),
        "sessions.end" => Some(with_session_id(state, req, sessions::end_session)),
        "sessions.cancel" => Some(with_session_id(state, req, sessions::cancel_session)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        _ => None,
    }
}
