//! Per-run identifiers handed to every pipeline component.

use chrono::{DateTime, Utc};
use tracing::{info_span, Span};
use uuid::Uuid;

use crate::model::channel_id_for;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub channel_url: String,
    pub channel_id: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(channel_url: &str) -> Self {
        let channel_url = channel_url.trim().trim_end_matches('/').to_string();
        Self {
            channel_id: channel_id_for(&channel_url),
            channel_url,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Root span for everything logged during this run.
    pub fn span(&self) -> Span {
        info_span!("harvest", channel_id = %self.channel_id, run_id = %self.run_id)
    }
}
