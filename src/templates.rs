use crate::db::write_tx;
use crate::error::{EngineError, EngineResult};
use crate::model::{Question, QuestionTemplate, QuestionType, TemplateOwnership};
use crate::registry::ensure_tenant;
use log::{debug, info};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

const MIN_SCALE: i64 = 2;
const MAX_SCALE: i64 = 10;
const DEFAULT_SCALE: i64 = 5;
const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub scale: Option<i64>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPatch {
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub question_type: Option<String>,
    pub category: Option<String>,
    pub scale: Option<i64>,
    pub options: Option<Vec<String>>,
    pub required: Option<bool>,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

/// A resolved question together with the template it was reached through.
#[derive(Debug, Clone)]
pub struct ResolvedQuestion {
    pub question: Question,
    pub template_id: String,
}

/// Checks the per-type invariants and returns the canonical form that gets
/// stored: trimmed text, defaulted category and scale, cleaned options.
pub fn normalize_question(input: &QuestionInput, id: String) -> EngineResult<Question> {
    let text = input.text.trim();
    if text.is_empty() {
        return Err(EngineError::validation("question text must not be empty"));
    }
    let Some(question_type) = QuestionType::parse(&input.question_type) else {
        return Err(EngineError::validation(format!(
            "unknown question type: {}",
            input.question_type
        )));
    };
    let category = input
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_ascii_lowercase();

    let raw_options: Vec<String> = input
        .options
        .as_ref()
        .map(|opts| {
            opts.iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let (scale, options) = match question_type {
        QuestionType::Rating => {
            if !raw_options.is_empty() {
                return Err(EngineError::validation(
                    "options are only valid for multiple_choice questions",
                ));
            }
            let scale = input.scale.unwrap_or(DEFAULT_SCALE);
            if !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
                return Err(EngineError::validation(format!(
                    "rating scale must be within {}..={}",
                    MIN_SCALE, MAX_SCALE
                )));
            }
            (Some(scale), Vec::new())
        }
        QuestionType::MultipleChoice => {
            if input.scale.is_some() {
                return Err(EngineError::validation(
                    "scale is only valid for rating questions",
                ));
            }
            if raw_options.len() < 2 {
                return Err(EngineError::validation(
                    "multiple_choice questions need at least 2 non-empty options",
                ));
            }
            let mut seen = HashSet::new();
            for o in &raw_options {
                if !seen.insert(o.as_str()) {
                    return Err(EngineError::validation(format!("duplicate option: {}", o)));
                }
            }
            (None, raw_options)
        }
        QuestionType::Text | QuestionType::YesNo => {
            if input.scale.is_some() {
                return Err(EngineError::validation(
                    "scale is only valid for rating questions",
                ));
            }
            if !raw_options.is_empty() {
                return Err(EngineError::validation(
                    "options are only valid for multiple_choice questions",
                ));
            }
            (None, Vec::new())
        }
    };

    Ok(Question {
        id,
        text: text.to_string(),
        question_type,
        category,
        scale,
        options,
        required: input.required,
        priority: input.priority,
        active: input.active.unwrap_or(true),
    })
}

struct QuestionRow {
    id: String,
    text: String,
    question_type: String,
    category: String,
    scale: Option<i64>,
    options_json: String,
    required: bool,
    priority: i64,
    active: bool,
}

const QUESTION_COLUMNS: &str =
    "q.id, q.text, q.question_type, q.category, q.scale, q.options_json, q.required, q.priority, q.active";

fn question_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: r.get(0)?,
        text: r.get(1)?,
        question_type: r.get(2)?,
        category: r.get(3)?,
        scale: r.get(4)?,
        options_json: r.get(5)?,
        required: r.get::<_, i64>(6)? != 0,
        priority: r.get(7)?,
        active: r.get::<_, i64>(8)? != 0,
    })
}

impl QuestionRow {
    fn into_question(self) -> EngineResult<Question> {
        let question_type = QuestionType::parse(&self.question_type).ok_or_else(|| {
            EngineError::Malformed(format!(
                "question {} has type {}",
                self.id, self.question_type
            ))
        })?;
        let options: Vec<String> = serde_json::from_str(&self.options_json)?;
        Ok(Question {
            id: self.id,
            text: self.text,
            question_type,
            category: self.category,
            scale: self.scale,
            options,
            required: self.required,
            priority: self.priority,
            active: self.active,
        })
    }
}

fn load_question(conn: &Connection, question_id: &str) -> EngineResult<Question> {
    let sql = format!("SELECT {} FROM questions q WHERE q.id = ?", QUESTION_COLUMNS);
    let row = conn
        .query_row(&sql, [question_id], question_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("question"))?;
    row.into_question()
}

fn template_from_row(
    r: &rusqlite::Row<'_>,
) -> rusqlite::Result<(String, Option<String>, String, Option<String>, bool, i64, i64)> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get::<_, i64>(4)? != 0,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn build_template(
    row: (String, Option<String>, String, Option<String>, bool, i64, i64),
) -> QuestionTemplate {
    let (id, tenant_id, name, description, active, usage_count, question_count) = row;
    let ownership = if tenant_id.is_some() {
        TemplateOwnership::TenantOwned
    } else {
        TemplateOwnership::SharedDefault
    };
    QuestionTemplate {
        id,
        tenant_id,
        name,
        description,
        ownership,
        active,
        usage_count,
        question_count,
    }
}

/// Loads one template. For shared defaults, `active` reflects the given
/// tenant's activation record (absent record means active); without a
/// tenant it is the stored flag.
pub fn get_template(
    conn: &Connection,
    template_id: &str,
    for_tenant: Option<&str>,
) -> EngineResult<QuestionTemplate> {
    let row = conn
        .query_row(
            "SELECT t.id, t.tenant_id, t.name, t.description,
                    CASE WHEN t.tenant_id IS NULL
                         THEN COALESCE((SELECT ta.active FROM template_activations ta
                                        WHERE ta.tenant_id = ?2 AND ta.template_id = t.id), 1)
                         ELSE t.active END,
                    t.usage_count,
                    (SELECT COUNT(*) FROM template_questions tq WHERE tq.template_id = t.id)
             FROM question_templates t
             WHERE t.id = ?1",
            (template_id, for_tenant),
            template_from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("template"))?;
    Ok(build_template(row))
}

/// Every template visible to the tenant: its own custom templates first,
/// then the shared defaults with the tenant's effective activation.
pub fn list_templates(conn: &Connection, tenant_id: &str) -> EngineResult<Vec<QuestionTemplate>> {
    ensure_tenant(conn, tenant_id)?;
    let mut stmt = conn.prepare(
        "SELECT t.id, t.tenant_id, t.name, t.description,
                CASE WHEN t.tenant_id IS NULL
                     THEN COALESCE((SELECT ta.active FROM template_activations ta
                                    WHERE ta.tenant_id = ?1 AND ta.template_id = t.id), 1)
                     ELSE t.active END,
                t.usage_count,
                (SELECT COUNT(*) FROM template_questions tq WHERE tq.template_id = t.id)
         FROM question_templates t
         WHERE t.tenant_id = ?1 OR t.tenant_id IS NULL
         ORDER BY CASE WHEN t.tenant_id IS NULL THEN 1 ELSE 0 END, t.created_at, t.rowid",
    )?;
    let rows = stmt
        .query_map([tenant_id], template_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(build_template).collect())
}

pub fn create_template(
    conn: &Connection,
    tenant_id: Option<&str>,
    name: &str,
    description: Option<&str>,
) -> EngineResult<QuestionTemplate> {
    if let Some(tid) = tenant_id {
        ensure_tenant(conn, tid)?;
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("template name must not be empty"));
    }
    let description = description.map(str::trim).filter(|d| !d.is_empty());
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO question_templates(id, tenant_id, name, description, active)
         VALUES(?, ?, ?, ?, 1)",
        (&id, tenant_id, name, description),
    )?;
    info!(
        "template {} created ({})",
        id,
        tenant_id.map(|t| format!("tenant {}", t)).unwrap_or_else(|| "shared default".into())
    );
    get_template(conn, &id, tenant_id)
}

/// Custom templates flip their own flag. Shared defaults record the choice
/// per tenant and never touch what other tenants see.
pub fn set_template_active(
    conn: &Connection,
    template_id: &str,
    tenant_id: Option<&str>,
    active: bool,
) -> EngineResult<QuestionTemplate> {
    let template = get_template(conn, template_id, tenant_id)?;
    match template.ownership {
        TemplateOwnership::TenantOwned => {
            if let Some(tid) = tenant_id {
                if template.tenant_id.as_deref() != Some(tid) {
                    return Err(EngineError::validation(
                        "template belongs to a different tenant",
                    ));
                }
            }
            conn.execute(
                "UPDATE question_templates SET active = ? WHERE id = ?",
                (active as i64, template_id),
            )?;
        }
        TemplateOwnership::SharedDefault => {
            let Some(tid) = tenant_id else {
                return Err(EngineError::validation(
                    "tenantId is required to toggle a shared default template",
                ));
            };
            ensure_tenant(conn, tid)?;
            conn.execute(
                "INSERT INTO template_activations(tenant_id, template_id, active)
                 VALUES(?, ?, ?)
                 ON CONFLICT(tenant_id, template_id) DO UPDATE SET
                   active = excluded.active,
                   updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
                (tid, template_id, active as i64),
            )?;
        }
    }
    info!(
        "template {} set {} for {}",
        template_id,
        if active { "active" } else { "inactive" },
        tenant_id.unwrap_or("owner")
    );
    get_template(conn, template_id, tenant_id)
}

pub fn delete_template(conn: &Connection, template_id: &str) -> EngineResult<()> {
    let template = get_template(conn, template_id, None)?;
    if template.is_default() {
        return Err(EngineError::validation(
            "shared default templates cannot be deleted",
        ));
    }

    let tx = write_tx(conn)?;
    let question_ids: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT question_id FROM template_questions WHERE template_id = ?")?;
        let ids = stmt
            .query_map([template_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    tx.execute(
        "DELETE FROM template_questions WHERE template_id = ?",
        [template_id],
    )?;
    for qid in &question_ids {
        delete_question_if_orphan(&tx, qid)?;
    }
    tx.execute(
        "DELETE FROM template_activations WHERE template_id = ?",
        [template_id],
    )?;
    tx.execute("DELETE FROM question_templates WHERE id = ?", [template_id])?;
    tx.commit()?;
    info!("template {} deleted", template_id);
    Ok(())
}

fn delete_question_if_orphan(conn: &Connection, question_id: &str) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM questions
         WHERE id = ?1
           AND NOT EXISTS (SELECT 1 FROM template_questions WHERE question_id = ?1)",
        [question_id],
    )?;
    Ok(())
}

pub fn add_question(
    conn: &Connection,
    template_id: &str,
    input: &QuestionInput,
    order_index: Option<i64>,
) -> EngineResult<Question> {
    get_template(conn, template_id, None)?;
    let question = normalize_question(input, Uuid::new_v4().to_string())?;
    let options_json = serde_json::to_string(&question.options)?;

    let tx = write_tx(conn)?;
    tx.execute(
        "INSERT INTO questions(id, text, question_type, category, scale, options_json, required, priority, active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &question.id,
            &question.text,
            question.question_type.as_str(),
            &question.category,
            question.scale,
            &options_json,
            question.required as i64,
            question.priority,
            question.active as i64,
        ),
    )?;
    tx.execute(
        "INSERT INTO template_questions(template_id, question_id, order_index) VALUES(?, ?, ?)",
        (template_id, &question.id, order_index),
    )?;
    tx.commit()?;
    debug!("question {} added to template {}", question.id, template_id);
    Ok(question)
}

pub fn update_question(
    conn: &Connection,
    question_id: &str,
    patch: &QuestionPatch,
) -> EngineResult<Question> {
    let current = load_question(conn, question_id)?;
    let type_changed = patch
        .question_type
        .as_deref()
        .and_then(QuestionType::parse)
        .map(|t| t != current.question_type)
        .unwrap_or(false);

    // A type change drops parameters that belong to the old type unless the
    // patch supplies new ones.
    let merged = QuestionInput {
        text: patch.text.clone().unwrap_or_else(|| current.text.clone()),
        question_type: patch
            .question_type
            .clone()
            .unwrap_or_else(|| current.question_type.as_str().to_string()),
        category: Some(patch.category.clone().unwrap_or_else(|| current.category.clone())),
        scale: match patch.scale {
            Some(s) => Some(s),
            None if type_changed => None,
            None => current.scale,
        },
        options: match &patch.options {
            Some(o) => Some(o.clone()),
            None if type_changed => None,
            None => Some(current.options.clone()),
        },
        required: patch.required.unwrap_or(current.required),
        priority: patch.priority.unwrap_or(current.priority),
        active: Some(patch.active.unwrap_or(current.active)),
    };
    let updated = normalize_question(&merged, current.id.clone())?;
    let options_json = serde_json::to_string(&updated.options)?;
    conn.execute(
        "UPDATE questions
         SET text = ?, question_type = ?, category = ?, scale = ?, options_json = ?,
             required = ?, priority = ?, active = ?
         WHERE id = ?",
        (
            &updated.text,
            updated.question_type.as_str(),
            &updated.category,
            updated.scale,
            &options_json,
            updated.required as i64,
            updated.priority,
            updated.active as i64,
            &updated.id,
        ),
    )?;
    Ok(updated)
}

pub fn remove_question(conn: &Connection, template_id: &str, question_id: &str) -> EngineResult<()> {
    let tx = write_tx(conn)?;
    let n = tx.execute(
        "DELETE FROM template_questions WHERE template_id = ? AND question_id = ?",
        (template_id, question_id),
    )?;
    if n == 0 {
        return Err(EngineError::not_found("template question"));
    }
    delete_question_if_orphan(&tx, question_id)?;
    tx.commit()?;
    Ok(())
}

/// Questions attached to the template, in template order, inactive included.
pub fn template_questions(conn: &Connection, template_id: &str) -> EngineResult<Vec<Question>> {
    get_template(conn, template_id, None)?;
    let sql = format!(
        "SELECT {}
         FROM template_questions tq
         JOIN questions q ON q.id = tq.question_id
         WHERE tq.template_id = ?
         ORDER BY COALESCE(tq.order_index, q.priority), q.priority, q.rowid",
        QUESTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([template_id], question_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(QuestionRow::into_question).collect()
}

fn load_active_questions(
    conn: &Connection,
    template_ids: &[String],
) -> EngineResult<Vec<ResolvedQuestion>> {
    if template_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; template_ids.len()].join(", ");
    let sql = format!(
        "SELECT {}, tq.template_id
         FROM template_questions tq
         JOIN questions q ON q.id = tq.question_id
         JOIN question_templates t ON t.id = tq.template_id
         WHERE tq.template_id IN ({}) AND q.active = 1
         ORDER BY COALESCE(tq.order_index, q.priority), t.created_at, t.rowid, q.priority, q.rowid",
        QUESTION_COLUMNS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<Value> = template_ids.iter().cloned().map(Value::Text).collect();
    let rows = stmt
        .query_map(params_from_iter(params), |r| {
            Ok((question_row(r)?, r.get::<_, String>(9)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(row, template_id)| {
            Ok(ResolvedQuestion {
                question: row.into_question()?,
                template_id,
            })
        })
        .collect()
}

/// Ordered, de-duplicated question set for new sessions of the tenant.
///
/// Active custom templates take strict precedence over shared defaults; the
/// two are never blended. If the active custom templates yield no active
/// questions at all, the active defaults are used instead so the tenant is
/// not left without questions.
pub fn resolve_with_sources(
    conn: &Connection,
    tenant_id: &str,
) -> EngineResult<Vec<ResolvedQuestion>> {
    let visible = list_templates(conn, tenant_id)?;
    let active_custom: Vec<String> = visible
        .iter()
        .filter(|t| !t.is_default() && t.active)
        .map(|t| t.id.clone())
        .collect();
    let active_default: Vec<String> = visible
        .iter()
        .filter(|t| t.is_default() && t.active)
        .map(|t| t.id.clone())
        .collect();

    let mut resolved = if !active_custom.is_empty() {
        let custom = load_active_questions(conn, &active_custom)?;
        if custom.is_empty() && !active_default.is_empty() {
            debug!(
                "tenant {}: active custom templates are empty, falling back to defaults",
                tenant_id
            );
            load_active_questions(conn, &active_default)?
        } else {
            custom
        }
    } else if !active_default.is_empty() {
        load_active_questions(conn, &active_default)?
    } else {
        Vec::new()
    };

    let mut seen = HashSet::new();
    resolved.retain(|rq| seen.insert(rq.question.id.clone()));
    Ok(resolved)
}

pub fn resolve_questions(conn: &Connection, tenant_id: &str) -> EngineResult<Vec<Question>> {
    Ok(resolve_with_sources(conn, tenant_id)?
        .into_iter()
        .map(|rq| rq.question)
        .collect())
}

pub fn record_template_usage<'a, I>(conn: &Connection, template_ids: I) -> EngineResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for id in template_ids {
        if seen.insert(id) {
            conn.execute(
                "UPDATE question_templates SET usage_count = usage_count + 1 WHERE id = ?",
                [id],
            )?;
        }
    }
    Ok(())
}
