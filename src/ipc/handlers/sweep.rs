use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{engine_ctx, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::sweep::sweep_expired;
use serde_json::json;

fn handle_sweep_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match engine_ctx(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let tenant_id = optional_str(req, "tenantId");
    match sweep_expired(&ctx, tenant_id.as_deref()) {
        Ok(report) => ok(&req.id, json!({ "report": report })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sweep.run" => Some(handle_sweep_run(state, req)),
        _ => None,
    }
}
