use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub tenant_id: String,
    pub code: String,
    pub name: String,
}

pub fn create_tenant(conn: &Connection, name: &str) -> EngineResult<Tenant> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("tenant name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO tenants(id, name) VALUES(?, ?)", (&id, name))?;
    Ok(Tenant {
        id,
        name: name.to_string(),
    })
}

pub fn list_tenants(conn: &Connection) -> EngineResult<Vec<Tenant>> {
    let mut stmt = conn.prepare("SELECT id, name FROM tenants ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Tenant {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn ensure_tenant(conn: &Connection, tenant_id: &str) -> EngineResult<()> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM tenants WHERE id = ?", [tenant_id], |r| r.get(0))
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(EngineError::not_found("tenant")),
    }
}

pub fn create_course(
    conn: &Connection,
    tenant_id: &str,
    code: &str,
    name: &str,
) -> EngineResult<Course> {
    ensure_tenant(conn, tenant_id)?;
    let code = code.trim();
    let name = name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(EngineError::validation("course code and name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, tenant_id, code, name) VALUES(?, ?, ?, ?)",
        (&id, tenant_id, code, name),
    )?;
    Ok(Course {
        id,
        tenant_id: tenant_id.to_string(),
        code: code.to_string(),
        name: name.to_string(),
    })
}

pub fn list_courses(conn: &Connection, tenant_id: &str) -> EngineResult<Vec<Course>> {
    ensure_tenant(conn, tenant_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, code, name FROM courses WHERE tenant_id = ? ORDER BY code, id",
    )?;
    let rows = stmt
        .query_map([tenant_id], |r| {
            Ok(Course {
                id: r.get(0)?,
                tenant_id: r.get(1)?,
                code: r.get(2)?,
                name: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The owning tenant of a course.
pub fn course_tenant(conn: &Connection, course_id: &str) -> EngineResult<String> {
    conn.query_row(
        "SELECT tenant_id FROM courses WHERE id = ?",
        [course_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("course"))
}
