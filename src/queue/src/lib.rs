//! Job queue management and monitoring
//!
//! This module provides a builder, a manager owning the scheduler task, and a
//! health monitor on top of the core job queue.

use anyhow::Result;
use modelmirror_core::config::QueueConfig;
use modelmirror_core::queue::{lane_ids, priorities, JobQueue, LaneSpec, LaneStatus, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod manager;
pub mod monitor;

pub use manager::QueueManager;
pub use monitor::{HealthReport, MonitorConfig, QueueMonitor};

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_pending: usize,
    pub total_active: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub lanes: HashMap<String, LaneStatus>,
}

/// Builds a [`QueueManager`] from lane definitions
#[derive(Default)]
pub struct QueueManagerBuilder {
    lanes: HashMap<String, (Priority, usize)>,
}

impl QueueManagerBuilder {
    /// Create a new queue manager builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lane. A later lane with the same id replaces the earlier one.
    pub fn with_lane(mut self, id: impl Into<String>, priority: Priority, max: usize) -> Self {
        self.lanes.insert(id.into(), (priority, max));
        self
    }

    /// Add the export and transfer lanes sized from configuration
    pub fn with_config(self, config: &QueueConfig) -> Self {
        self.with_lane(
            lane_ids::EXPORT,
            priorities::EXPORT,
            config.export_concurrency,
        )
        .with_lane(
            lane_ids::TRANSFER,
            priorities::TRANSFER,
            config.transfer_concurrency,
        )
    }

    /// Add the export and transfer lanes with default sizes
    pub fn with_default_lanes(self) -> Self {
        self.with_config(&QueueConfig::default())
    }

    /// Build the queue manager
    pub fn build(self) -> Result<QueueManager> {
        if self.lanes.is_empty() {
            anyhow::bail!("a job queue needs at least one lane");
        }
        let specs = self
            .lanes
            .into_iter()
            .map(|(id, (priority, max))| LaneSpec::new(id, priority, max))
            .collect();
        Ok(QueueManager::new(JobQueue::new(specs)))
    }
}
