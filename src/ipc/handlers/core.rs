use crate::context::EngineContext;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sweep::{next_expiry, sweep_expired, Sweeper};
use log::{error, info};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let next = state
        .db
        .as_ref()
        .and_then(|conn| next_expiry(conn).ok().flatten());
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "config": state.config.summary_json(),
            "sweeperRunning": state.sweeper.is_some(),
            "nextExpiry": next,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    // The sweeper needs a connection of its own.
    let sweeper_conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    // The first pass runs before the workspace is handed to requests. A
    // failed pass is reported but does not keep the ticker from starting;
    // later ticks retry it.
    let first_pass = {
        let ctx = EngineContext::new(&conn, &state.config, state.clock.as_ref());
        sweep_expired(&ctx, None)
    };

    // Stop the previous workspace's sweeper before switching.
    state.sweeper = None;
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.sweeper = Some(Sweeper::spawn(
        &state.runtime,
        sweeper_conn,
        state.config.clone(),
        state.clock.clone(),
    ));
    info!("workspace {} selected", path.display());

    let mut result = json!({
        "workspacePath": path.to_string_lossy(),
        "sweep": null,
    });
    match first_pass {
        Ok(report) => result["sweep"] = json!(report),
        Err(e) => {
            error!("initial sweep of {} failed: {}", path.display(), e);
            result["sweepError"] = json!({ "code": e.code(), "message": e.to_string() });
        }
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
