use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use serde_json::json;

fn handle_tenants_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::create_tenant(conn, &name) {
        Ok(t) => ok(&req.id, json!({ "tenant": t })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_tenants_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "tenants": [] }));
    };
    match registry::list_tenants(conn) {
        Ok(tenants) => ok(&req.id, json!({ "tenants": tenants })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (tenant_id, code, name) = match (
        required_str(req, "tenantId"),
        required_str(req, "code"),
        required_str(req, "name"),
    ) {
        (Ok(t), Ok(c), Ok(n)) => (t, c, n),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
    };
    match registry::create_course(conn, &tenant_id, &code, &name) {
        Ok(c) => ok(&req.id, json!({ "course": c })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let tenant_id = match required_str(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::list_courses(conn, &tenant_id) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tenants.create" => Some(handle_tenants_create(state, req)),
        "tenants.list" => Some(handle_tenants_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        _ => None,
    }
}
