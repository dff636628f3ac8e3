use chrono::{DateTime, Utc};

use crate::config::WorkerConfig;

pub mod admin;
pub mod http;
pub mod migrate;
pub mod router;
pub mod submit;

/// Per-invocation inputs shared by every handler.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub config: &'a WorkerConfig,
    pub now: DateTime<Utc>,
}
