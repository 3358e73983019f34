use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, parse_field, required_str};
use crate::ipc::types::{AppState, Request};
use crate::templates::{self, QuestionInput, QuestionPatch};
use serde_json::json;

fn handle_templates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tenant_id = optional_str(req, "tenantId");
    let description = optional_str(req, "description");
    match templates::create_template(conn, tenant_id.as_deref(), &name, description.as_deref()) {
        Ok(t) => ok(&req.id, json!({ "template": t })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let tenant_id = match required_str(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match templates::list_templates(conn, &tenant_id) {
        Ok(list) => ok(&req.id, json!({ "templates": list })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tenant_id = optional_str(req, "tenantId");
    let template = match templates::get_template(conn, &template_id, tenant_id.as_deref()) {
        Ok(t) => t,
        Err(e) => return engine_err(&req.id, &e),
    };
    match templates::template_questions(conn, &template_id) {
        Ok(questions) => ok(
            &req.id,
            json!({ "template": template, "questions": questions }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };
    let tenant_id = optional_str(req, "tenantId");
    match templates::set_template_active(conn, &template_id, tenant_id.as_deref(), active) {
        Ok(t) => ok(&req.id, json!({ "template": t })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match templates::delete_template(conn, &template_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_add_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: QuestionInput = match parse_field(req, "question") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let order_index = req.params.get("orderIndex").and_then(|v| v.as_i64());
    match templates::add_question(conn, &template_id, &input, order_index) {
        Ok(q) => ok(&req.id, json!({ "question": q })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_update_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch: QuestionPatch = match parse_field(req, "patch") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match templates::update_question(conn, &question_id, &patch) {
        Ok(q) => ok(&req.id, json!({ "question": q })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_remove_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (template_id, question_id) =
        match (required_str(req, "templateId"), required_str(req, "questionId")) {
            (Ok(t), Ok(q)) => (t, q),
            (Err(e), _) | (_, Err(e)) => return e,
        };
    match templates::remove_question(conn, &template_id, &question_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_questions_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let tenant_id = match required_str(req, "tenantId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match templates::resolve_questions(conn, &tenant_id) {
        Ok(questions) => ok(&req.id, json!({ "questions": questions })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "templates.create" => Some(handle_templates_create(state, req)),
        "templates.list" => Some(handle_templates_list(state, req)),
        "templates.get" => Some(handle_templates_get(state, req)),
        "templates.setActive" => Some(handle_templates_set_active(state, req)),
        "templates.delete" => Some(handle_templates_delete(state, req)),
        "templates.addQuestion" => Some(handle_templates_add_question(state, req)),
        "templates.updateQuestion" => Some(handle_templates_update_question(state, req)),
        "templates.removeQuestion" => Some(handle_templates_remove_question(state, req)),
        "questions.resolve" => Some(handle_questions_resolve(state, req)),
        _ => None,
    }
}
