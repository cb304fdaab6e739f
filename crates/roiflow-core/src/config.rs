//! Graph configuration.
//!
//! Defaults come from the host (one worker per available core) and can be
//! overridden through environment variables:
//!
//! - `ROIFLOW_GRAPH_NAME`: name used in logs and worker thread names
//! - `ROIFLOW_WORKER_THREADS`: size of the compute worker pool

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for one [`Graph`](crate::graph::Graph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub name: String,
    pub worker_threads: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            name: "roiflow".to_string(),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl GraphConfig {
    pub fn named(name: &str) -> Self {
        GraphConfig {
            name: name.to_string(),
            ..GraphConfig::default()
        }
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Defaults overridden by `ROIFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overridden_by(|key| std::env::var(key).ok())
    }

    fn overridden_by(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup("ROIFLOW_GRAPH_NAME") {
            self.name = name;
        }
        if let Some(raw) = lookup("ROIFLOW_WORKER_THREADS") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.worker_threads = n,
                _ => warn!(value = %raw, "ignoring invalid ROIFLOW_WORKER_THREADS"),
            }
        }
        self
    }
}
