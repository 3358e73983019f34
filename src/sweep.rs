//! Expiry sweep: moves active sessions whose window has elapsed to
//! `completed`. Runs on demand (`sweep.run`) and from a background ticker.

use crate::clock::{parse_civil, Clock};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::sessions::end_session;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub session_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: u64,
    pub completed: u64,
    /// Sessions another writer moved out of `active` between our read and
    /// our guarded update.
    pub skipped: u64,
    pub failed: Vec<SweepFailure>,
}

fn active_sessions(conn: &Connection, tenant_id: Option<&str>) -> EngineResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, end_time FROM response_sessions
         WHERE status = 'active' AND (?1 IS NULL OR tenant_id = ?1)
         ORDER BY end_time, id",
    )?;
    let rows = stmt
        .query_map([tenant_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<(String, String)>, _>>()?;
    Ok(rows)
}

/// One pass over active sessions. A session whose end time has been reached
/// is completed through the same guarded transition as an explicit stop, so
/// running the sweep twice, or alongside a manual end, is harmless.
/// Pending sessions are never expired here.
pub fn sweep_expired(ctx: &EngineContext<'_>, tenant_id: Option<&str>) -> EngineResult<SweepReport> {
    let now = ctx.civil_now();
    let mut report = SweepReport::default();

    for (session_id, end_time) in active_sessions(ctx.conn, tenant_id)? {
        report.checked += 1;
        let Some(end) = parse_civil(&end_time) else {
            warn!("sweep: session {} has unreadable end time {:?}", session_id, end_time);
            report.failed.push(SweepFailure {
                session_id,
                error: format!("unreadable end time {:?}", end_time),
            });
            continue;
        };
        if now < end {
            continue;
        }
        match end_session(ctx, &session_id) {
            Ok(_) => report.completed += 1,
            Err(e) if e.is_state_conflict() => {
                debug!("sweep: session {} already left active", session_id);
                report.skipped += 1;
            }
            Err(e) => {
                warn!("sweep: failed to complete session {}: {}", session_id, e);
                report.failed.push(SweepFailure {
                    session_id,
                    error: e.to_string(),
                });
            }
        }
    }

    if report.completed > 0 || !report.failed.is_empty() {
        info!(
            "sweep: checked {}, completed {}, skipped {}, failed {}",
            report.checked,
            report.completed,
            report.skipped,
            report.failed.len()
        );
    }
    Ok(report)
}

/// Earliest end time among active sessions, for diagnostics.
pub fn next_expiry(conn: &Connection) -> EngineResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT MIN(end_time) FROM response_sessions WHERE status = 'active'",
            [],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten())
}

/// Background ticker owning its own connection. The first tick fires
/// immediately, so a freshly opened workspace is swept on selection.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(
        runtime: &Handle,
        conn: Connection,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let period = config.sweep_interval;
        info!("sweeper running every {}s", period.as_secs());

        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let conn = conn.clone();
                let config = config.clone();
                let clock = clock.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    let conn = conn.lock();
                    let ctx = EngineContext::new(&conn, &config, clock.as_ref());
                    sweep_expired(&ctx, None)
                })
                .await;

                match pass {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("sweep pass failed: {}", e),
                    Err(e) => error!("sweep task panicked: {}", e),
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
