use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(now: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_feedbackd");
    let mut child = Command::new(exe)
        .env("FEEDBACKD_FIXED_NOW", now)
        .env("FEEDBACKD_UTC_OFFSET", "+00:00")
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn feedbackd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .cloned()
            .unwrap_or_else(|| json!({ "error": "missing" }))
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn ids(questions: &serde_json::Value) -> Vec<String> {
    questions
        .as_array()
        .expect("questions array")
        .iter()
        .map(|q| q["id"].as_str().expect("question id").to_string())
        .collect()
}

#[test]
fn custom_templates_take_precedence_and_defaults_toggle_per_tenant() {
    let workspace = temp_dir("feedbackd-template-resolution");
    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let t1 = request_ok(&mut stdin, &mut reader, "2", "tenants.create", json!({ "name": "North" }));
    let t1 = t1["tenant"]["id"].as_str().expect("t1").to_string();
    let t2 = request_ok(&mut stdin, &mut reader, "3", "tenants.create", json!({ "name": "South" }));
    let t2 = t2["tenant"]["id"].as_str().expect("t2").to_string();

    let default = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.create",
        json!({ "name": "Standard", "description": "Shared questions" }),
    );
    assert_eq!(default["template"]["ownership"], "shared_default");
    let default_id = default["template"]["id"].as_str().expect("default id").to_string();
    let d1 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "templates.addQuestion",
        json!({
            "templateId": default_id,
            "question": { "text": "Overall, how was class?", "type": "rating", "category": "overall" }
        }),
    );
    let d1 = d1["question"]["id"].as_str().expect("d1").to_string();
    let d2 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "templates.addQuestion",
        json!({
            "templateId": default_id,
            "question": { "text": "Would you recommend it?", "type": "yes_no", "category": "overall" }
        }),
    );
    let d2 = d2["question"]["id"].as_str().expect("d2").to_string();

    // No custom templates yet: both tenants see the defaults.
    let r1 = request_ok(&mut stdin, &mut reader, "7", "questions.resolve", json!({ "tenantId": t1 }));
    assert_eq!(ids(&r1["questions"]), vec![d1.clone(), d2.clone()]);

    // A custom template that is active but empty still falls back.
    let custom = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "templates.create",
        json!({ "tenantId": t1, "name": "North custom" }),
    );
    let custom_id = custom["template"]["id"].as_str().expect("custom id").to_string();
    let r1 = request_ok(&mut stdin, &mut reader, "9", "questions.resolve", json!({ "tenantId": t1 }));
    assert_eq!(ids(&r1["questions"]), vec![d1.clone(), d2.clone()]);

    // Once it has content it wins outright.
    let c1 = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "templates.addQuestion",
        json!({
            "templateId": custom_id,
            "question": { "text": "Pace?", "type": "multiple_choice", "options": ["Slow", "Right", "Fast"] }
        }),
    );
    let c1 = c1["question"]["id"].as_str().expect("c1").to_string();
    let r1 = request_ok(&mut stdin, &mut reader, "11", "questions.resolve", json!({ "tenantId": t1 }));
    let resolved = ids(&r1["questions"]);
    assert_eq!(resolved, vec![c1.clone()]);
    assert!(!resolved.contains(&d1) && !resolved.contains(&d2));

    // South switches the default off for itself only.
    let off = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "templates.setActive",
        json!({ "templateId": default_id, "tenantId": t2, "active": false }),
    );
    assert_eq!(off["template"]["active"], false);
    let r2 = request_ok(&mut stdin, &mut reader, "13", "questions.resolve", json!({ "tenantId": t2 }));
    assert!(ids(&r2["questions"]).is_empty());

    let listed = request_ok(&mut stdin, &mut reader, "14", "templates.list", json!({ "tenantId": t1 }));
    let templates = listed["templates"].as_array().expect("templates");
    assert_eq!(templates.len(), 2);
    assert_eq!(templates[0]["id"], custom_id.as_str());
    assert_eq!(templates[1]["active"], true);
    assert_eq!(templates[1]["questionCount"], 2);

    // Deactivating North's custom template brings the defaults back.
    request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "templates.setActive",
        json!({ "templateId": custom_id, "active": false }),
    );
    let r1 = request_ok(&mut stdin, &mut reader, "16", "questions.resolve", json!({ "tenantId": t1 }));
    let resolved = ids(&r1["questions"]);
    let mut unique = resolved.clone();
    unique.dedup();
    assert_eq!(resolved, unique);
    assert_eq!(resolved, vec![d1, d2]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn template_edits_are_validated() {
    let workspace = temp_dir("feedbackd-template-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let default = request_ok(&mut stdin, &mut reader, "2", "templates.create", json!({ "name": "Shared" }));
    let default_id = default["template"]["id"].as_str().expect("default id").to_string();

    let toggle = request(
        &mut stdin,
        &mut reader,
        "3",
        "templates.setActive",
        json!({ "templateId": default_id, "active": false }),
    );
    assert_eq!(error_code(&toggle), "validation_failed");

    let delete = request(&mut stdin, &mut reader, "4", "templates.delete", json!({ "templateId": default_id }));
    assert_eq!(error_code(&delete), "validation_failed");

    let one_option = request(
        &mut stdin,
        &mut reader,
        "5",
        "templates.addQuestion",
        json!({
            "templateId": default_id,
            "question": { "text": "Pick", "type": "multiple_choice", "options": ["Only"] }
        }),
    );
    assert_eq!(error_code(&one_option), "validation_failed");

    let big_scale = request(
        &mut stdin,
        &mut reader,
        "6",
        "templates.addQuestion",
        json!({
            "templateId": default_id,
            "question": { "text": "Rate", "type": "rating", "scale": 11 }
        }),
    );
    assert_eq!(error_code(&big_scale), "validation_failed");

    let q = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "templates.addQuestion",
        json!({
            "templateId": default_id,
            "question": { "text": "Rate", "type": "rating" }
        }),
    );
    assert_eq!(q["question"]["scale"], 5);
    let qid = q["question"]["id"].as_str().expect("qid").to_string();

    let patched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "templates.updateQuestion",
        json!({ "questionId": qid, "patch": { "text": "Rate the lecture", "required": true } }),
    );
    assert_eq!(patched["question"]["text"], "Rate the lecture");
    assert_eq!(patched["question"]["required"], true);

    let got = request_ok(&mut stdin, &mut reader, "9", "templates.get", json!({ "templateId": default_id }));
    assert_eq!(got["questions"].as_array().expect("questions").len(), 1);

    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "templates.removeQuestion",
        json!({ "templateId": default_id, "questionId": qid }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "11",
        "templates.removeQuestion",
        json!({ "templateId": default_id, "questionId": qid }),
    );
    assert_eq!(error_code(&again), "not_found");

    drop(stdin);
    let _ = child.wait();
}
