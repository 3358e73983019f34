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

#[test]
fn elapsed_session_is_completed_by_the_next_process_sweep() {
    let workspace = temp_dir("feedbackd-sweep-expiry");

    // 10:00: create and start a 60 minute session, plus one left pending.
    let (session_id, pending_id) = {
        let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
        request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let tenant = request_ok(&mut stdin, &mut reader, "2", "tenants.create", json!({ "name": "Ridge" }));
        let tenant_id = tenant["tenant"]["id"].as_str().expect("tenant").to_string();
        let course = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "courses.create",
            json!({ "tenantId": tenant_id, "code": "PHY150", "name": "Mechanics" }),
        );
        let course_id = course["course"]["id"].as_str().expect("course").to_string();
        let params = json!({
            "courseId": course_id,
            "section": "A",
            "sessionDate": "2026-03-02",
            "durationMinutes": 60
        });
        let created = request_ok(&mut stdin, &mut reader, "4", "sessions.create", params.clone());
        let session_id = created["sessionId"].as_str().expect("session").to_string();
        let pending = request_ok(&mut stdin, &mut reader, "5", "sessions.create", params);
        let pending_id = pending["sessionId"].as_str().expect("pending").to_string();

        let started = request_ok(&mut stdin, &mut reader, "6", "sessions.start", json!({ "sessionId": session_id }));
        assert_eq!(started["session"]["endTime"], "2026-03-02T11:00:00");

        let swept = request_ok(&mut stdin, &mut reader, "7", "sweep.run", json!({}));
        assert_eq!(swept["report"]["checked"], 1);
        assert_eq!(swept["report"]["completed"], 0);

        let health = request_ok(&mut stdin, &mut reader, "8", "health", json!({}));
        assert_eq!(health["nextExpiry"], "2026-03-02T11:00:00");

        drop(stdin);
        let _ = child.wait();
        (session_id, pending_id)
    };

    // 11:01: selecting the workspace sweeps before anything else runs.
    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T11:01:00");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["sweep"]["checked"], 1);
    assert_eq!(selected["sweep"]["completed"], 1);
    assert_eq!(selected["sweep"]["failed"], json!([]));

    let session = request_ok(&mut stdin, &mut reader, "2", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["session"]["status"], "completed");
    let updated_at = session["session"]["updatedAt"].clone();

    // A second tick changes nothing.
    let swept = request_ok(&mut stdin, &mut reader, "3", "sweep.run", json!({}));
    assert_eq!(swept["report"]["checked"], 0);
    assert_eq!(swept["report"]["completed"], 0);
    let session = request_ok(&mut stdin, &mut reader, "4", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["session"]["status"], "completed");
    assert_eq!(session["session"]["updatedAt"], updated_at);

    // Never-started sessions are not expired by the sweep.
    let pending = request_ok(&mut stdin, &mut reader, "5", "sessions.get", json!({ "sessionId": pending_id }));
    assert_eq!(pending["session"]["status"], "pending");

    let late = request(
        &mut stdin,
        &mut reader,
        "6",
        "responses.submit",
        json!({ "sessionId": session_id, "answers": {} }),
    );
    assert_eq!(error_code(&late), "state_conflict");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn short_session_is_stamped_and_swept_in_civil_time() {
    let workspace = temp_dir("feedbackd-sweep-window");

    let session_id = {
        let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
        request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let tenant = request_ok(&mut stdin, &mut reader, "2", "tenants.create", json!({ "name": "Vale" }));
        let tenant_id = tenant["tenant"]["id"].as_str().expect("tenant").to_string();
        let course = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "courses.create",
            json!({ "tenantId": tenant_id, "code": "ECO101", "name": "Micro" }),
        );
        let created = request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "sessions.create",
            json!({
                "courseId": course["course"]["id"],
                "section": "B",
                "sessionDate": "2026-03-02",
                "durationMinutes": 30
            }),
        );
        let session_id = created["sessionId"].as_str().expect("session").to_string();
        request_ok(&mut stdin, &mut reader, "5", "sessions.start", json!({ "sessionId": session_id }));
        drop(stdin);
        let _ = child.wait();
        session_id
    };

    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:45:00");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["sweep"]["completed"], 1);
    let session = request_ok(&mut stdin, &mut reader, "2", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["session"]["status"], "completed");
    assert_eq!(session["session"]["endTime"], "2026-03-02T10:30:00");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn failed_first_sweep_still_starts_the_background_sweeper() {
    let workspace = temp_dir("feedbackd-sweep-first-pass");

    let session_id = {
        let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
        request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let tenant = request_ok(&mut stdin, &mut reader, "2", "tenants.create", json!({ "name": "Quarry" }));
        let tenant_id = tenant["tenant"]["id"].as_str().expect("tenant").to_string();
        let course = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "courses.create",
            json!({ "tenantId": tenant_id, "code": "GEO120", "name": "Landforms" }),
        );
        let created = request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "sessions.create",
            json!({
                "courseId": course["course"]["id"],
                "section": "C",
                "sessionDate": "2026-03-02",
                "durationMinutes": 60
            }),
        );
        let session_id = created["sessionId"].as_str().expect("session").to_string();
        request_ok(&mut stdin, &mut reader, "5", "sessions.start", json!({ "sessionId": session_id }));
        drop(stdin);
        let _ = child.wait();
        session_id
    };

    // A blob end time makes the active-session scan itself fail.
    let db_path = workspace.join("feedback.sqlite3");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("open db");
        conn.execute(
            "UPDATE response_sessions SET end_time = X'00' WHERE id = ?",
            [&session_id],
        )
        .expect("corrupt end time");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T11:01:00");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["sweep"].is_null());
    assert_eq!(selected["sweepError"]["code"], "collaborator_unavailable");

    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(health["sweeperRunning"], true);
    assert!(health["workspacePath"].as_str().is_some());

    {
        let conn = rusqlite::Connection::open(&db_path).expect("open db");
        conn.execute(
            "UPDATE response_sessions SET end_time = '2026-03-02T11:00:00' WHERE id = ?",
            [&session_id],
        )
        .expect("repair end time");
    }
    // The ticker may already have closed it; either way it ends completed.
    let swept = request_ok(&mut stdin, &mut reader, "3", "sweep.run", json!({}));
    assert!(swept["report"]["failed"].as_array().expect("failed").is_empty());
    let session = request_ok(&mut stdin, &mut reader, "4", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["session"]["status"], "completed");

    drop(stdin);
    let _ = child.wait();
}
