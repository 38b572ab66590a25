//! Queue monitor for tracking queue metrics and health

use super::manager::collect_stats;
use super::QueueStats;
use chrono::Utc;
use modelmirror_core::queue::{JobQueue, JobState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

/// Queue monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Monitoring interval
    pub interval: Duration,
    /// Warning threshold for pending jobs
    pub pending_warning_threshold: usize,
    /// Jobs running longer than this are reported
    pub long_running_threshold: Duration,
    /// Finished jobs are forgotten this long after they end
    pub retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            pending_warning_threshold: 100,
            long_running_threshold: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Findings of one health check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Lanes with every slot in use
    pub saturated_lanes: Vec<String>,
    /// Pending job count when above the warning threshold
    pub backlog: Option<usize>,
    /// Ids of jobs running longer than the threshold
    pub long_running: Vec<String>,
    /// Failed job count
    pub failed: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.saturated_lanes.is_empty()
            && self.backlog.is_none()
            && self.long_running.is_empty()
            && self.failed == 0
    }
}

/// Queue monitor
pub struct QueueMonitor {
    queue: Arc<JobQueue>,
    config: MonitorConfig,
}

impl QueueMonitor {
    /// Create a new queue monitor
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self::with_config(queue, MonitorConfig::default())
    }

    /// Create a new queue monitor with custom configuration
    pub fn with_config(queue: Arc<JobQueue>, config: MonitorConfig) -> Self {
        Self { queue, config }
    }

    /// Start monitoring
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut ticker = interval(self.config.interval);

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                self.check_health();
                self.prune();
            }
        })
    }

    /// Check queue health and log what needs attention
    pub fn check_health(&self) -> HealthReport {
        let mut report = HealthReport::default();
        let status = self.queue.status();

        let mut total_pending = 0;
        for (lane_id, lane_status) in status.iter() {
            total_pending += lane_status.pending;

            debug!(
                "Lane {}: pending={}, active={}, max={}",
                lane_id, lane_status.pending, lane_status.active, lane_status.max
            );

            if lane_status.active >= lane_status.max {
                warn!("Lane {} is at maximum capacity", lane_id);
                report.saturated_lanes.push(lane_id.clone());
            }
        }
        report.saturated_lanes.sort();

        if total_pending > self.config.pending_warning_threshold {
            warn!(
                "High number of pending jobs: {} (threshold: {})",
                total_pending, self.config.pending_warning_threshold
            );
            report.backlog = Some(total_pending);
        }

        let now = Utc::now();
        for job in self.queue.jobs() {
            match job.state {
                JobState::Running => {
                    let elapsed = job
                        .started_at
                        .and_then(|started| (now - started).to_std().ok())
                        .unwrap_or_default();
                    if elapsed > self.config.long_running_threshold {
                        warn!(
                            "Job {} ({}) has been running for {}s",
                            job.id,
                            job.job_type,
                            elapsed.as_secs()
                        );
                        report.long_running.push(job.id);
                    }
                }
                JobState::Failed(_) => report.failed += 1,
                JobState::Pending | JobState::Succeeded => {}
            }
        }

        report
    }

    /// Drop finished jobs older than the retention period
    pub fn prune(&self) -> usize {
        self.queue.prune_finished(self.config.retention)
    }

    /// Get current statistics
    pub fn stats(&self) -> QueueStats {
        collect_stats(&self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modelmirror_core::error::{MirrorError, Result};
    use modelmirror_core::queue::{lane_ids, Job, LaneSpec};
    use tokio::sync::oneshot;

    struct BlockingJob {
        release: oneshot::Receiver<()>,
    }

    #[async_trait]
    impl Job for BlockingJob {
        async fn run(self: Box<Self>) -> Result<()> {
            let _ = self.release.await;
            Ok(())
        }
        fn job_type(&self) -> &str {
            "blocking"
        }
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        async fn run(self: Box<Self>) -> Result<()> {
            Err(MirrorError::internal("boom"))
        }
        fn job_type(&self) -> &str {
            "failing"
        }
    }

    fn single_lane_queue() -> Arc<JobQueue> {
        JobQueue::new(vec![LaneSpec::new(lane_ids::EXPORT, 0, 1)])
    }

    async fn wait_until(queue: &JobQueue, predicate: impl Fn(&JobQueue) -> bool) {
        for _ in 0..100 {
            if predicate(queue) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_idle_queue_is_healthy() {
        let monitor = QueueMonitor::new(single_lane_queue());
        let report = monitor.check_health();
        assert!(report.is_healthy());
    }

    #[test]
    fn test_backlog_reported() {
        let queue = single_lane_queue();
        for _ in 0..3 {
            queue.submit(lane_ids::EXPORT, Box::new(FailingJob)).unwrap();
        }
        let monitor = QueueMonitor::with_config(
            queue,
            MonitorConfig {
                pending_warning_threshold: 2,
                ..MonitorConfig::default()
            },
        );

        let report = monitor.check_health();
        assert_eq!(report.backlog, Some(3));
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_saturated_and_long_running() {
        let queue = single_lane_queue();
        let scheduler = queue.start();
        let (release, rx) = oneshot::channel();
        queue
            .submit(lane_ids::EXPORT, Box::new(BlockingJob { release: rx }))
            .unwrap();
        wait_until(&queue, |q| q.status()[lane_ids::EXPORT].active == 1).await;

        let monitor = QueueMonitor::with_config(
            Arc::clone(&queue),
            MonitorConfig {
                long_running_threshold: Duration::ZERO,
                ..MonitorConfig::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = monitor.check_health();
        assert_eq!(report.saturated_lanes, vec![lane_ids::EXPORT.to_string()]);
        assert_eq!(report.long_running.len(), 1);

        release.send(()).unwrap();
        queue.wait_idle().await;
        scheduler.abort();
        assert!(monitor.check_health().is_healthy());
    }

    #[tokio::test]
    async fn test_failed_jobs_counted() {
        let queue = single_lane_queue();
        let scheduler = queue.start();
        queue.submit(lane_ids::EXPORT, Box::new(FailingJob)).unwrap();
        queue.wait_idle().await;
        scheduler.abort();

        let monitor = QueueMonitor::new(queue);
        assert_eq!(monitor.check_health().failed, 1);
        assert_eq!(monitor.stats().total_failed, 1);
    }

    #[tokio::test]
    async fn test_prune_applies_retention() {
        let queue = single_lane_queue();
        let scheduler = queue.start();
        queue.submit(lane_ids::EXPORT, Box::new(FailingJob)).unwrap();
        queue.wait_idle().await;
        scheduler.abort();

        let keep = QueueMonitor::new(Arc::clone(&queue));
        assert_eq!(keep.prune(), 0);
        assert_eq!(keep.check_health().failed, 1);

        let forget = QueueMonitor::with_config(
            Arc::clone(&queue),
            MonitorConfig {
                retention: Duration::ZERO,
                ..MonitorConfig::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(forget.prune(), 1);
        assert!(queue.jobs().is_empty());
        assert!(forget.check_health().is_healthy());
    }
}
