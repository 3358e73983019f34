use crate::clock::parse_civil;
use crate::context::EngineContext;
use crate::db::write_tx;
use crate::error::{EngineError, EngineResult};
use crate::model::{Question, QuestionType, ResponseSession, ResponseStatus, SessionResponse, SessionStatus};
use crate::sessions::{load_session, session_by_key};
use log::debug;
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    pub session_key: Option<String>,
    pub session_id: Option<String>,
    pub submitter_id: Option<String>,
    #[serde(default)]
    pub answers: serde_json::Map<String, serde_json::Value>,
    pub completion_seconds: Option<f64>,
    pub status: Option<String>,
}

fn invalid_answer(question: &Question, why: &str) -> EngineError {
    EngineError::Validation {
        message: format!("answer for question {} {}", question.id, why),
        details: Some(serde_json::json!({ "questionId": question.id })),
    }
}

pub fn yes_no_value(v: &serde_json::Value) -> Option<bool> {
    match v {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn check_answer(question: &Question, value: &serde_json::Value) -> EngineResult<()> {
    match question.question_type {
        QuestionType::Rating => {
            let scale = question.scale.unwrap_or(5) as f64;
            let Some(n) = value.as_f64() else {
                return Err(invalid_answer(question, "must be a number"));
            };
            if n.fract() != 0.0 || n < 1.0 || n > scale {
                return Err(invalid_answer(
                    question,
                    &format!("must be a whole number within 1..={}", scale),
                ));
            }
        }
        QuestionType::YesNo => {
            if yes_no_value(value).is_none() {
                return Err(invalid_answer(question, "must be yes or no"));
            }
        }
        QuestionType::MultipleChoice => {
            let Some(choice) = value.as_str() else {
                return Err(invalid_answer(question, "must be one of the options"));
            };
            if !question.options.iter().any(|o| o == choice) {
                return Err(invalid_answer(question, "must be one of the options"));
            }
        }
        QuestionType::Text => {
            if !value.is_string() {
                return Err(invalid_answer(question, "must be text"));
            }
        }
    }
    Ok(())
}

/// Checks answers against the session's frozen questions. Null or blank
/// answers count as unanswered; drafts may leave required questions open.
fn validate_answers(
    session: &ResponseSession,
    answers: &serde_json::Map<String, serde_json::Value>,
    status: ResponseStatus,
) -> EngineResult<BTreeMap<String, serde_json::Value>> {
    let mut out = BTreeMap::new();
    for (question_id, value) in answers {
        let Some(question) = session.questions.iter().find(|q| &q.id == question_id) else {
            return Err(EngineError::validation(format!(
                "question {} is not part of this session",
                question_id
            )));
        };
        let blank = value.is_null() || value.as_str().map(|s| s.trim().is_empty()).unwrap_or(false);
        if blank {
            continue;
        }
        check_answer(question, value)?;
        out.insert(question_id.clone(), value.clone());
    }

    if status != ResponseStatus::Draft {
        let missing = session
            .questions
            .iter()
            .filter(|q| q.required && !out.contains_key(&q.id))
            .count();
        if missing > 0 {
            return Err(EngineError::Validation {
                message: format!("{} required question(s) unanswered", missing),
                details: Some(serde_json::json!({ "unansweredRequired": missing })),
            });
        }
    }
    Ok(out)
}

fn window_open(ctx: &EngineContext<'_>, session: &ResponseSession) -> bool {
    match parse_civil(&session.end_time) {
        Some(end) => ctx.civil_now() < end,
        None => false,
    }
}

pub fn submit_response(ctx: &EngineContext<'_>, params: &SubmitParams) -> EngineResult<SessionResponse> {
    let session = match (&params.session_key, &params.session_id) {
        (Some(key), _) => session_by_key(ctx.conn, key)?,
        (None, Some(id)) => load_session(ctx.conn, id)?,
        (None, None) => {
            return Err(EngineError::validation("sessionKey or sessionId is required"));
        }
    };
    if session.status != SessionStatus::Active || !window_open(ctx, &session) {
        return Err(EngineError::StateConflict {
            session_id: session.id.clone(),
            status: session.status.as_str().to_string(),
            expected: "active within its time window",
        });
    }

    let status = match params.status.as_deref() {
        None => ResponseStatus::Submitted,
        Some(raw) => match ResponseStatus::parse(raw) {
            Some(s @ (ResponseStatus::Draft | ResponseStatus::Submitted)) => s,
            _ => {
                return Err(EngineError::validation(
                    "status must be draft or submitted",
                ))
            }
        },
    };
    if let Some(secs) = params.completion_seconds {
        if !secs.is_finite() || secs < 0.0 {
            return Err(EngineError::validation("completionSeconds must be a non-negative number"));
        }
    }
    let answers = validate_answers(&session, &params.answers, status)?;
    let submitter_id = params
        .submitter_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response_id = Uuid::new_v4().to_string();
    let tx = write_tx(ctx.conn)?;
    tx.execute(
        "INSERT INTO session_responses(id, session_id, submitter_id, answers_json, completion_seconds, status)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &response_id,
            &session.id,
            &submitter_id,
            serde_json::to_string(&answers)?,
            params.completion_seconds,
            status.as_str(),
        ),
    )?;
    // Stored counters follow the submitted responses. Guarded on `active` so
    // a submission racing the sweep is rejected as a whole.
    let changed = tx.execute(
        "UPDATE response_sessions
         SET total_responses = (SELECT COUNT(*) FROM session_responses
                                WHERE session_id = ?1 AND status <> 'draft'),
             average_time_seconds = COALESCE((SELECT AVG(completion_seconds) FROM session_responses
                                WHERE session_id = ?1 AND status <> 'draft'
                                  AND completion_seconds IS NOT NULL), 0),
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?1 AND status = 'active'",
        [&session.id],
    )?;
    if changed == 0 {
        return Err(EngineError::StateConflict {
            session_id: session.id.clone(),
            status: SessionStatus::Completed.as_str().to_string(),
            expected: "active within its time window",
        });
    }
    tx.execute(
        "UPDATE response_sessions
         SET completion_rate = CASE WHEN target_responses > 0
                                    THEN MIN(100.0, total_responses * 100.0 / target_responses)
                                    ELSE 0 END
         WHERE id = ?",
        [&session.id],
    )?;
    tx.commit()?;

    debug!("response {} stored for session {}", response_id, session.id);
    load_response(ctx.conn, &response_id)
}

fn response_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String, Option<f64>, String)> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn build_response(
    row: (String, String, String, String, String, Option<f64>, String),
) -> EngineResult<SessionResponse> {
    let (id, session_id, submitter_id, answers_json, submitted_at, completion_seconds, status) = row;
    let status = ResponseStatus::parse(&status)
        .ok_or_else(|| EngineError::Malformed(format!("response {} has status {}", id, status)))?;
    Ok(SessionResponse {
        answers: serde_json::from_str(&answers_json)?,
        id,
        session_id,
        submitter_id,
        submitted_at,
        completion_seconds,
        status,
    })
}

fn load_response(conn: &Connection, response_id: &str) -> EngineResult<SessionResponse> {
    let row = conn.query_row(
        "SELECT id, session_id, submitter_id, answers_json, submitted_at, completion_seconds, status
         FROM session_responses WHERE id = ?",
        [response_id],
        response_row,
    )?;
    build_response(row)
}

/// All responses of a session in submission order, drafts included.
pub fn list_responses(conn: &Connection, session_id: &str) -> EngineResult<Vec<SessionResponse>> {
    load_session(conn, session_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, session_id, submitter_id, answers_json, submitted_at, completion_seconds, status
         FROM session_responses
         WHERE session_id = ?
         ORDER BY submitted_at, rowid",
    )?;
    let rows = stmt
        .query_map([session_id], response_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(build_response).collect()
}
