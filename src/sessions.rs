//! Response session lifecycle.
//!
//! `pending -> active -> completed`, with `pending -> cancelled` and hard
//! delete as the only exits before start. Every state-changing write is a
//! single statement guarded on the expected current status, so two writers
//! racing on one session cannot both win: the loser sees zero changed rows
//! and gets a `StateConflict`.

use crate::clock::format_civil;
use crate::context::EngineContext;
use crate::db::write_tx;
use crate::error::{EngineError, EngineResult};
use crate::keys;
use crate::model::{Question, ResponseSession, SessionStatus};
use crate::registry::course_tenant;
use crate::templates::{record_template_usage, resolve_with_sources};
use chrono::{Duration, NaiveDate};
use log::{info, warn};
use rusqlite::{params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionParams {
    pub course_id: String,
    pub section: String,
    #[serde(default)]
    pub room: Option<String>,
    pub session_date: String,
    pub duration_minutes: i64,
    #[serde(default)]
    pub question_ids: Vec<String>,
    #[serde(default)]
    pub target_responses: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionParams {
    pub section: Option<String>,
    /// An empty string clears the room.
    pub room: Option<String>,
    pub session_date: Option<String>,
    pub duration_minutes: Option<i64>,
    pub question_ids: Option<Vec<String>>,
    pub target_responses: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilter {
    pub course_id: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<String>,
}

const SESSION_COLUMNS: &str = "id, course_id, tenant_id, section, room, session_date, duration_minutes,
    start_time, end_time, status, anonymous_key, questions_json, target_responses,
    total_responses, completion_rate, average_time_seconds, created_at, updated_at";

struct SessionRow {
    id: String,
    course_id: String,
    tenant_id: String,
    section: String,
    room: Option<String>,
    session_date: String,
    duration_minutes: i64,
    start_time: String,
    end_time: String,
    status: String,
    anonymous_key: String,
    questions_json: String,
    target_responses: i64,
    total_responses: i64,
    completion_rate: f64,
    average_time_seconds: f64,
    created_at: String,
    updated_at: String,
}

fn session_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: r.get(0)?,
        course_id: r.get(1)?,
        tenant_id: r.get(2)?,
        section: r.get(3)?,
        room: r.get(4)?,
        session_date: r.get(5)?,
        duration_minutes: r.get(6)?,
        start_time: r.get(7)?,
        end_time: r.get(8)?,
        status: r.get(9)?,
        anonymous_key: r.get(10)?,
        questions_json: r.get(11)?,
        target_responses: r.get(12)?,
        total_responses: r.get(13)?,
        completion_rate: r.get(14)?,
        average_time_seconds: r.get(15)?,
        created_at: r.get(16)?,
        updated_at: r.get(17)?,
    })
}

impl SessionRow {
    fn into_session(self) -> EngineResult<ResponseSession> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Malformed(format!("session {} has status {}", self.id, self.status))
        })?;
        let questions: Vec<Question> = serde_json::from_str(&self.questions_json)?;
        Ok(ResponseSession {
            id: self.id,
            course_id: self.course_id,
            tenant_id: self.tenant_id,
            section: self.section,
            room: self.room,
            session_date: self.session_date,
            duration_minutes: self.duration_minutes,
            start_time: self.start_time,
            end_time: self.end_time,
            status,
            anonymous_key: self.anonymous_key,
            questions,
            target_responses: self.target_responses,
            total_responses: self.total_responses,
            completion_rate: self.completion_rate,
            average_time_seconds: self.average_time_seconds,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub fn load_session(conn: &Connection, session_id: &str) -> EngineResult<ResponseSession> {
    let sql = format!("SELECT {} FROM response_sessions WHERE id = ?", SESSION_COLUMNS);
    conn.query_row(&sql, [session_id], session_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("session"))?
        .into_session()
}

pub fn session_by_key(conn: &Connection, key: &str) -> EngineResult<ResponseSession> {
    let key = key.trim().to_ascii_uppercase();
    let sql = format!(
        "SELECT {} FROM response_sessions WHERE anonymous_key = ?",
        SESSION_COLUMNS
    );
    conn.query_row(&sql, [&key], session_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("session"))?
        .into_session()
}

pub fn list_sessions(conn: &Connection, filter: &SessionFilter) -> EngineResult<Vec<ResponseSession>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(course_id) = &filter.course_id {
        clauses.push("course_id = ?");
        params.push(Value::Text(course_id.clone()));
    }
    if let Some(tenant_id) = &filter.tenant_id {
        clauses.push("tenant_id = ?");
        params.push(Value::Text(tenant_id.clone()));
    }
    if let Some(status) = &filter.status {
        let Some(parsed) = SessionStatus::parse(status) else {
            return Err(EngineError::validation(format!("unknown status: {}", status)));
        };
        clauses.push("status = ?");
        params.push(Value::Text(parsed.as_str().to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM response_sessions {} ORDER BY session_date DESC, created_at DESC, rowid DESC",
        SESSION_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), session_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SessionRow::into_session).collect()
}

/// Builds the error for a guarded write that changed nothing: either the
/// session is gone or another writer moved it out of `expected` first.
fn conflict_for(conn: &Connection, session_id: &str, expected: &'static str) -> EngineError {
    let status: Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT status FROM response_sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional();
    match status {
        Ok(Some(status)) => EngineError::StateConflict {
            session_id: session_id.to_string(),
            status,
            expected,
        },
        Ok(None) => EngineError::not_found("session"),
        Err(e) => EngineError::Storage(e),
    }
}

fn require_status(
    session: &ResponseSession,
    expected: SessionStatus,
) -> EngineResult<()> {
    if session.status == expected {
        return Ok(());
    }
    Err(EngineError::StateConflict {
        session_id: session.id.clone(),
        status: session.status.as_str().to_string(),
        expected: expected.as_str(),
    })
}

fn validate_section(section: &str) -> EngineResult<String> {
    let section = section.trim();
    if section.is_empty() {
        return Err(EngineError::validation("section must not be empty"));
    }
    Ok(section.to_string())
}

fn validate_date(raw: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("sessionDate must be YYYY-MM-DD: {}", raw)))
}

fn validate_duration(minutes: i64) -> EngineResult<i64> {
    if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(EngineError::validation(format!(
            "durationMinutes must be within 1..={}",
            MAX_DURATION_MINUTES
        )));
    }
    Ok(minutes)
}

fn validate_target(target: Option<i64>) -> EngineResult<i64> {
    match target {
        Some(t) if t < 0 => Err(EngineError::validation("targetResponses must not be negative")),
        Some(t) => Ok(t),
        None => Ok(0),
    }
}

fn normalize_room(room: Option<&str>) -> Option<String> {
    room.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string)
}

/// Storage requires start/end even before the session is started; until
/// then they hold midnight of the session date and midnight + duration.
fn placeholder_window(date: NaiveDate, duration_minutes: i64) -> (String, String) {
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = start + Duration::minutes(duration_minutes);
    (format_civil(start), format_civil(end))
}

/// Picks the requested questions out of the tenant's resolvable set, in
/// resolver order, and enforces coverage of every required question.
fn select_questions(
    conn: &Connection,
    tenant_id: &str,
    question_ids: &[String],
) -> EngineResult<(Vec<Question>, Vec<String>)> {
    let resolved = resolve_with_sources(conn, tenant_id)?;
    let requested: HashSet<&str> = question_ids.iter().map(|s| s.trim()).collect();

    let known: HashSet<&str> = resolved.iter().map(|rq| rq.question.id.as_str()).collect();
    let unknown = requested.iter().filter(|id| !known.contains(*id)).count();
    if unknown > 0 {
        return Err(EngineError::Validation {
            message: format!(
                "{} selected question(s) are not available to this tenant",
                unknown
            ),
            details: Some(serde_json::json!({ "unknownQuestions": unknown })),
        });
    }

    let missing = resolved
        .iter()
        .filter(|rq| rq.question.required && !requested.contains(rq.question.id.as_str()))
        .count();
    if missing > 0 {
        return Err(EngineError::missing_required(missing));
    }

    let mut questions = Vec::new();
    let mut sources = Vec::new();
    for rq in resolved {
        if requested.contains(rq.question.id.as_str()) {
            sources.push(rq.template_id);
            questions.push(rq.question);
        }
    }
    Ok((questions, sources))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

pub fn create_session(
    ctx: &EngineContext<'_>,
    params: &CreateSessionParams,
) -> EngineResult<ResponseSession> {
    let conn = ctx.conn;
    let section = validate_section(&params.section)?;
    let date = validate_date(&params.session_date)?;
    let duration = validate_duration(params.duration_minutes)?;
    let target = validate_target(params.target_responses)?;
    let room = normalize_room(params.room.as_deref());

    let tx = write_tx(conn)?;
    let tenant_id = course_tenant(&tx, &params.course_id)?;
    let (questions, sources) = select_questions(&tx, &tenant_id, &params.question_ids)?;
    let questions_json = serde_json::to_string(&questions)?;
    let (start_time, end_time) = placeholder_window(date, duration);
    let session_id = Uuid::new_v4().to_string();

    let mut attempt = 0;
    let key = loop {
        attempt += 1;
        let key = keys::issue_key(&tx, ctx.config)?;
        let inserted = tx.execute(
            "INSERT INTO response_sessions(
               id, course_id, tenant_id, section, room, session_date, duration_minutes,
               start_time, end_time, status, anonymous_key, questions_json, target_responses)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
            rusqlite::params![
                &session_id,
                &params.course_id,
                &tenant_id,
                &section,
                &room,
                date.format("%Y-%m-%d").to_string(),
                duration,
                &start_time,
                &end_time,
                &key,
                &questions_json,
                target,
            ],
        );
        match inserted {
            Ok(_) => break key,
            Err(e) if is_unique_violation(&e) && attempt < ctx.config.key_max_attempts => {
                warn!("anonymous key {} taken at insert, retrying", key);
            }
            Err(e) => return Err(e.into()),
        }
    };
    record_template_usage(&tx, sources.iter().map(String::as_str))?;
    tx.commit()?;

    info!(
        "session {} created for course {} ({} questions, key {})",
        session_id,
        params.course_id,
        questions.len(),
        key
    );
    load_session(conn, &session_id)
}

/// `pending -> active`. Stamps real start/end in the configured civil zone;
/// end is computed in the same statement from the stored duration so a
/// concurrent edit cannot leave the two out of step.
pub fn start_session(ctx: &EngineContext<'_>, session_id: &str) -> EngineResult<ResponseSession> {
    let now = format_civil(ctx.civil_now());
    let changed = ctx.conn.execute(
        "UPDATE response_sessions
         SET status = 'active',
             start_time = ?1,
             end_time = strftime('%Y-%m-%dT%H:%M:%S', ?1, '+' || duration_minutes || ' minutes'),
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?2 AND status = 'pending'",
        (&now, session_id),
    )?;
    if changed == 0 {
        return Err(conflict_for(ctx.conn, session_id, "pending"));
    }
    let session = load_session(ctx.conn, session_id)?;
    info!(
        "session {} started {} until {}",
        session_id, session.start_time, session.end_time
    );
    Ok(session)
}

/// `active -> completed`. Used both for an explicit early stop and by the
/// expiry sweep.
pub fn end_session(ctx: &EngineContext<'_>, session_id: &str) -> EngineResult<ResponseSession> {
    let changed = ctx.conn.execute(
        "UPDATE response_sessions
         SET status = 'completed', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND status = 'active'",
        [session_id],
    )?;
    if changed == 0 {
        return Err(conflict_for(ctx.conn, session_id, "active"));
    }
    info!("session {} completed", session_id);
    load_session(ctx.conn, session_id)
}

pub fn cancel_session(ctx: &EngineContext<'_>, session_id: &str) -> EngineResult<ResponseSession> {
    let changed = ctx.conn.execute(
        "UPDATE response_sessions
         SET status = 'cancelled', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND status = 'pending'",
        [session_id],
    )?;
    if changed == 0 {
        return Err(conflict_for(ctx.conn, session_id, "pending"));
    }
    info!("session {} cancelled", session_id);
    load_session(ctx.conn, session_id)
}

pub fn delete_session(ctx: &EngineContext<'_>, session_id: &str) -> EngineResult<()> {
    let changed = ctx.conn.execute(
        "DELETE FROM response_sessions WHERE id = ? AND status = 'pending'",
        [session_id],
    )?;
    if changed == 0 {
        return Err(conflict_for(ctx.conn, session_id, "pending"));
    }
    info!("session {} deleted", session_id);
    Ok(())
}

/// Pending-only edit. A new `questionIds` list is re-resolved and checked
/// for required coverage; without one the frozen snapshot stays as is.
pub fn update_session(
    ctx: &EngineContext<'_>,
    session_id: &str,
    params: &UpdateSessionParams,
) -> EngineResult<ResponseSession> {
    let conn = ctx.conn;
    let tx = write_tx(conn)?;
    let current = load_session(&tx, session_id)?;
    require_status(&current, SessionStatus::Pending)?;

    let section = match &params.section {
        Some(s) => validate_section(s)?,
        None => current.section.clone(),
    };
    let room = match &params.room {
        Some(r) => normalize_room(Some(r)),
        None => current.room.clone(),
    };
    let date = validate_date(params.session_date.as_deref().unwrap_or(&current.session_date))?;
    let duration = validate_duration(params.duration_minutes.unwrap_or(current.duration_minutes))?;
    let target = match params.target_responses {
        Some(t) => validate_target(Some(t))?,
        None => current.target_responses,
    };
    let questions = match &params.question_ids {
        Some(ids) => select_questions(&tx, &current.tenant_id, ids)?.0,
        None => current.questions.clone(),
    };
    let questions_json = serde_json::to_string(&questions)?;
    let (start_time, end_time) = placeholder_window(date, duration);

    let changed = tx.execute(
        "UPDATE response_sessions
         SET section = ?, room = ?, session_date = ?, duration_minutes = ?,
             start_time = ?, end_time = ?, questions_json = ?, target_responses = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND status = 'pending'",
        rusqlite::params![
            &section,
            &room,
            date.format("%Y-%m-%d").to_string(),
            duration,
            &start_time,
            &end_time,
            &questions_json,
            target,
            session_id,
        ],
    )?;
    if changed == 0 {
        return Err(conflict_for(&tx, session_id, "pending"));
    }
    tx.commit()?;
    info!("session {} updated", session_id);
    load_session(conn, session_id)
}
