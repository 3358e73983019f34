use crate::clock::{civil_now, Clock};
use crate::config::EngineConfig;
use chrono::NaiveDateTime;
use rusqlite::Connection;

/// Everything an engine operation needs from its host: one storage
/// connection, the daemon config and the clock.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub conn: &'a Connection,
    pub config: &'a EngineConfig,
    pub clock: &'a dyn Clock,
}

impl<'a> EngineContext<'a> {
    pub fn new(conn: &'a Connection, config: &'a EngineConfig, clock: &'a dyn Clock) -> Self {
        Self {
            conn,
            config,
            clock,
        }
    }

    pub fn civil_now(&self) -> NaiveDateTime {
        civil_now(self.clock, self.config.utc_offset)
    }
}
