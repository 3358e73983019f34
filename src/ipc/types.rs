use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::sweep::Sweeper;
use rusqlite::Connection;
use serde::Deserialize;
use tokio::runtime::Handle;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Arc<EngineConfig>,
    pub clock: Arc<dyn Clock>,
    pub runtime: Handle,
    pub sweeper: Option<Sweeper>,
}

impl AppState {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, runtime: Handle) -> Self {
        Self {
            workspace: None,
            db: None,
            config: Arc::new(config),
            clock,
            runtime,
            sweeper: None,
        }
    }

    pub fn ctx(&self) -> Option<EngineContext<'_>> {
        self.db
            .as_ref()
            .map(|conn| EngineContext::new(conn, &self.config, self.clock.as_ref()))
    }
}
