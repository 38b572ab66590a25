//! Queue manager provides high-level queue management

use super::QueueStats;
use anyhow::Result;
use modelmirror_core::error::Result as MirrorResult;
use modelmirror_core::queue::{Job, JobId, JobQueue, JobRecord, JobState};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Queue manager
pub struct QueueManager {
    queue: Arc<JobQueue>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    /// Create a new queue manager
    pub(crate) fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            scheduler_handle: Mutex::new(None),
        }
    }

    /// Start the queue scheduler. Starting twice is an error.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.scheduler_handle.lock();
        if handle.is_some() {
            anyhow::bail!("queue scheduler is already running");
        }
        tracing::info!("Starting queue scheduler");
        *handle = Some(self.queue.start());
        Ok(())
    }

    /// Stop scheduling new jobs. Running jobs finish on their own.
    pub fn stop(&self) {
        if let Some(handle) = self.scheduler_handle.lock().take() {
            tracing::info!("Stopping queue scheduler");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_handle.lock().is_some()
    }

    /// Submit a job to a lane
    pub fn submit(&self, lane_id: &str, job: Box<dyn Job>) -> MirrorResult<JobId> {
        self.queue.submit(lane_id, job)
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// Jobs that ended in failure
    pub fn failed_jobs(&self) -> Vec<JobRecord> {
        self.queue
            .jobs()
            .into_iter()
            .filter(|job| matches!(job.state, JobState::Failed(_)))
            .collect()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        collect_stats(&self.queue)
    }

    /// Get the underlying job queue
    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::clone(&self.queue)
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn collect_stats(queue: &JobQueue) -> QueueStats {
    let lane_status = queue.status();

    let mut stats = QueueStats::default();
    for status in lane_status.values() {
        stats.total_pending += status.pending;
        stats.total_active += status.active;
    }
    for job in queue.jobs() {
        match job.state {
            JobState::Succeeded => stats.total_succeeded += 1,
            JobState::Failed(_) => stats.total_failed += 1,
            JobState::Pending | JobState::Running => {}
        }
    }
    stats.lanes = lane_status;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueManagerBuilder;
    use async_trait::async_trait;
    use modelmirror_core::error::MirrorError;
    use modelmirror_core::queue::lane_ids;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn run(self: Box<Self>) -> MirrorResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn job_type(&self) -> &str {
            "counting"
        }
    }

    struct FailingJob {
        message: String,
    }

    #[async_trait]
    impl Job for FailingJob {
        async fn run(self: Box<Self>) -> MirrorResult<()> {
            Err(MirrorError::internal(self.message.clone()))
        }
        fn job_type(&self) -> &str {
            "failing"
        }
    }

    /// Helper: build a QueueManager with the standard lanes
    fn make_manager() -> QueueManager {
        QueueManagerBuilder::new()
            .with_default_lanes()
            .build()
            .unwrap()
    }

    fn counting(runs: &Arc<AtomicUsize>) -> Box<dyn Job> {
        Box::new(CountingJob {
            runs: Arc::clone(runs),
        })
    }

    // ========================================================================
    // stats() Tests
    // ========================================================================

    #[tokio::test]
    async fn test_manager_stats_empty() {
        let manager = make_manager();

        let stats = manager.stats();
        assert_eq!(stats.total_pending, 0);
        assert_eq!(stats.total_active, 0);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.lanes[lane_ids::EXPORT].pending, 0);
    }

    #[tokio::test]
    async fn test_manager_stats_with_pending() {
        let manager = make_manager();
        let runs = Arc::new(AtomicUsize::new(0));

        // Submit jobs without starting scheduler
        for _ in 0..3 {
            manager.submit(lane_ids::TRANSFER, counting(&runs)).unwrap();
        }
        manager.submit(lane_ids::EXPORT, counting(&runs)).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total_pending, 4);
        assert_eq!(stats.lanes[lane_ids::TRANSFER].pending, 3);
        assert_eq!(stats.lanes[lane_ids::EXPORT].pending, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    // ========================================================================
    // submit() Tests
    // ========================================================================

    #[tokio::test]
    async fn test_manager_submit_unknown_lane() {
        let manager = make_manager();
        let runs = Arc::new(AtomicUsize::new(0));

        let result = manager.submit("nonexistent-lane", counting(&runs));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_manager_start_drains_pending() {
        let manager = make_manager();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            manager.submit(lane_ids::TRANSFER, counting(&runs)).unwrap();
        }

        manager.start().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), manager.wait_idle())
            .await
            .expect("Timeout");

        assert_eq!(runs.load(Ordering::SeqCst), 5);
        let stats = manager.stats();
        assert_eq!(stats.total_succeeded, 5);
        assert_eq!(stats.total_pending, 0);
    }

    #[tokio::test]
    async fn test_manager_records_failures() {
        let manager = make_manager();
        manager.start().unwrap();

        let id = manager
            .submit(
                lane_ids::EXPORT,
                Box::new(FailingJob {
                    message: "manager test failure".to_string(),
                }),
            )
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), manager.wait_idle())
            .await
            .expect("Timeout");

        let failed = manager.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
        assert_eq!(
            failed[0].state,
            JobState::Failed("manager test failure".to_string())
        );
        assert_eq!(manager.stats().total_failed, 1);
    }

    // ========================================================================
    // start()/stop() Tests
    // ========================================================================

    #[tokio::test]
    async fn test_manager_start_twice_fails() {
        let manager = make_manager();

        assert!(manager.start().is_ok());
        assert!(manager.is_running());
        assert!(manager.start().is_err());

        manager.stop();
        assert!(!manager.is_running());
        assert!(manager.start().is_ok());
    }

    #[tokio::test]
    async fn test_manager_queue_returns_same_instance() {
        let manager = make_manager();

        let q1 = manager.queue();
        let q2 = manager.queue();
        assert!(Arc::ptr_eq(&q1, &q2));
    }
}
