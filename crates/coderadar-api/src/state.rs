use chrono::{DateTime, Utc};
use coderadar_engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }
}
