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

fn add_question(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    template_id: &str,
    question: serde_json::Value,
) -> String {
    let added = request_ok(
        stdin,
        reader,
        id,
        "templates.addQuestion",
        json!({ "templateId": template_id, "question": question }),
    );
    added["question"]["id"].as_str().expect("question id").to_string()
}

#[test]
fn submitted_ratings_aggregate_to_average_and_distribution() {
    let workspace = temp_dir("feedbackd-responses-analytics");
    let (mut child, mut stdin, mut reader) = spawn_sidecar("2026-03-02T10:00:00");
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tenant = request_ok(&mut stdin, &mut reader, "2", "tenants.create", json!({ "name": "Hillcrest" }));
    let tenant_id = tenant["tenant"]["id"].as_str().expect("tenant").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "tenantId": tenant_id, "code": "HIS110", "name": "World History" }),
    );
    let course_id = course["course"]["id"].as_str().expect("course").to_string();
    let template = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.create",
        json!({ "tenantId": tenant_id, "name": "Hillcrest standard" }),
    );
    let template_id = template["template"]["id"].as_str().expect("template").to_string();

    let clarity = add_question(
        &mut stdin,
        &mut reader,
        "5",
        &template_id,
        json!({ "text": "Clarity", "type": "rating", "scale": 5, "category": "instructor", "required": true }),
    );
    let again = add_question(
        &mut stdin,
        &mut reader,
        "6",
        &template_id,
        json!({ "text": "Take again?", "type": "yes_no", "category": "overall" }),
    );
    let pace = add_question(
        &mut stdin,
        &mut reader,
        "7",
        &template_id,
        json!({ "text": "Pace", "type": "multiple_choice", "options": ["Slow", "Right", "Fast"], "category": "delivery" }),
    );
    let notes = add_question(
        &mut stdin,
        &mut reader,
        "8",
        &template_id,
        json!({ "text": "Notes", "type": "text", "category": "content" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.create",
        json!({
            "courseId": course_id,
            "section": "S1",
            "sessionDate": "2026-03-02",
            "durationMinutes": 50,
            "questionIds": [clarity, again, pace, notes],
            "targetResponses": 10
        }),
    );
    let session_id = created["sessionId"].as_str().expect("session").to_string();
    let key = created["anonymousKey"].as_str().expect("key").to_string();

    let closed = request(
        &mut stdin,
        &mut reader,
        "10",
        "responses.submit",
        json!({ "sessionKey": key, "answers": { clarity.as_str(): 5 } }),
    );
    assert_eq!(error_code(&closed), "state_conflict");

    request_ok(&mut stdin, &mut reader, "11", "sessions.start", json!({ "sessionId": session_id }));

    let ratings = [5, 4, 5, 3, 5];
    let yes = [true, true, false, true, true];
    let paces = ["Right", "Right", "Fast", "Right", "Slow"];
    for i in 0..5 {
        let mut answers = serde_json::Map::new();
        answers.insert(clarity.clone(), json!(ratings[i]));
        answers.insert(again.clone(), json!(if yes[i] { "yes" } else { "no" }));
        answers.insert(pace.clone(), json!(paces[i]));
        answers.insert(notes.clone(), json!(format!("note {}", i)));
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("submit-{}", i),
            "responses.submit",
            json!({
                "sessionKey": key.to_lowercase(),
                "submitterId": format!("anon-{}", i),
                "answers": answers,
                "completionSeconds": 60 + i * 10
            }),
        );
    }

    let draft = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "responses.submit",
        json!({ "sessionId": session_id, "status": "draft", "answers": { clarity.as_str(): 1 } }),
    );
    assert_eq!(draft["response"]["status"], "draft");

    let unanswered = request(
        &mut stdin,
        &mut reader,
        "13",
        "responses.submit",
        json!({ "sessionId": session_id, "answers": { notes.as_str(): "just notes" } }),
    );
    assert_eq!(error_code(&unanswered), "validation_failed");
    assert_eq!(unanswered["error"]["details"]["unansweredRequired"], 1);

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "14",
        "responses.submit",
        json!({ "sessionId": session_id, "answers": { clarity.as_str(): 6 } }),
    );
    assert_eq!(error_code(&out_of_range), "validation_failed");

    let session = request_ok(&mut stdin, &mut reader, "15", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["session"]["totalResponses"], 5);
    assert_eq!(session["session"]["completionRate"], 50.0);
    assert_eq!(session["session"]["averageTimeSeconds"], 80.0);

    let listed = request_ok(&mut stdin, &mut reader, "16", "responses.list", json!({ "sessionId": session_id }));
    assert_eq!(listed["responses"].as_array().expect("responses").len(), 6);

    let analytics = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "analytics.session",
        json!({ "sessionId": session_id, "textPreviewLimit": 3 }),
    );
    let a = &analytics["analytics"];
    assert_eq!(a["totalResponses"], 5);
    assert_eq!(a["completionRate"], 100.0);
    assert!((a["averageRating"].as_f64().expect("average") - 4.4).abs() < 1e-9);

    let per_question = a["perQuestion"].as_array().expect("perQuestion");
    assert_eq!(per_question.len(), 4);
    let rating = &per_question[0];
    assert_eq!(rating["questionId"], clarity.as_str());
    assert!((rating["averageRating"].as_f64().expect("rating average") - 4.4).abs() < 1e-9);
    assert_eq!(
        rating["distribution"],
        json!([
            { "label": "1", "count": 0 },
            { "label": "2", "count": 0 },
            { "label": "3", "count": 1 },
            { "label": "4", "count": 1 },
            { "label": "5", "count": 3 }
        ])
    );
    assert_eq!(
        per_question[1]["distribution"],
        json!([{ "label": "Yes", "count": 4 }, { "label": "No", "count": 1 }])
    );
    assert_eq!(
        per_question[2]["distribution"],
        json!([
            { "label": "Slow", "count": 1 },
            { "label": "Right", "count": 3 },
            { "label": "Fast", "count": 1 }
        ])
    );
    assert_eq!(per_question[3]["textAnswers"], json!(["note 0", "note 1", "note 2"]));
    assert_eq!(per_question[3]["textAnswerCount"], 5);
    assert_eq!(a["perCategory"][0]["category"], "instructor");

    request_ok(&mut stdin, &mut reader, "18", "sessions.end", json!({ "sessionId": session_id }));
    let late = request(
        &mut stdin,
        &mut reader,
        "19",
        "responses.submit",
        json!({ "sessionKey": key, "answers": { clarity.as_str(): 4 } }),
    );
    assert_eq!(error_code(&late), "state_conflict");

    drop(stdin);
    let _ = child.wait();
}
