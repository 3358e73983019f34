use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "feedback.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // The request loop and the background sweeper each hold a connection.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_tenant ON courses(tenant_id)",
        [],
    )?;

    // tenant_id NULL marks a shared default template.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_templates(
            id TEXT PRIMARY KEY,
            tenant_id TEXT,
            name TEXT NOT NULL,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            usage_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_templates_tenant ON question_templates(tenant_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            category TEXT NOT NULL,
            scale INTEGER,
            options_json TEXT NOT NULL DEFAULT '[]',
            required INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_questions(
            template_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            order_index INTEGER,
            PRIMARY KEY(template_id, question_id),
            FOREIGN KEY(template_id) REFERENCES question_templates(id),
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_questions_question ON template_questions(question_id)",
        [],
    )?;

    // Absence of a row means the default template is active for the tenant.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_activations(
            tenant_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            active INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            PRIMARY KEY(tenant_id, template_id),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id),
            FOREIGN KEY(template_id) REFERENCES question_templates(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS response_sessions(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            section TEXT NOT NULL,
            room TEXT,
            session_date TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            anonymous_key TEXT NOT NULL,
            questions_json TEXT NOT NULL,
            target_responses INTEGER NOT NULL DEFAULT 0,
            total_responses INTEGER NOT NULL DEFAULT 0,
            completion_rate REAL NOT NULL DEFAULT 0,
            average_time_seconds REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_response_sessions_key ON response_sessions(anonymous_key)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_response_sessions_course ON response_sessions(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_response_sessions_tenant_status ON response_sessions(tenant_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_responses(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            submitter_id TEXT NOT NULL,
            answers_json TEXT NOT NULL,
            submitted_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            completion_seconds REAL,
            status TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES response_sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_responses_session ON session_responses(session_id)",
        [],
    )?;

    Ok(conn)
}

/// Multi-statement writes take the write lock up front. A deferred
/// transaction that reads first can fail with SQLITE_BUSY_SNAPSHOT once the
/// sweeper's connection commits in between.
pub fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

#[cfg(test)]
pub fn temp_workspace(prefix: &str) -> std::path::PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}
