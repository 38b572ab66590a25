use crate::config::QueueConfig;
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lane identifier
pub type LaneId = String;

/// Job identifier
pub type JobId = String;

/// Lane priority (lower number = higher priority)
pub type Priority = u8;

/// Lane priorities
pub mod priorities {
    use super::Priority;

    pub const EXPORT: Priority = 0;
    pub const TRANSFER: Priority = 1;
}

/// Built-in lane IDs
pub mod lane_ids {
    /// Document archive assembly
    pub const EXPORT: &str = "export";
    /// File and image relays
    pub const TRANSFER: &str = "transfer";
}

/// Background work item
#[async_trait]
pub trait Job: Send {
    /// Run the job to completion
    async fn run(self: Box<Self>) -> Result<()>;

    /// Get job type (for logging/debugging)
    fn job_type(&self) -> &str;
}

/// Lifecycle of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "camelCase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed(_))
    }
}

/// Bookkeeping for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub lane: LaneId,
    pub job_type: String,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Lane definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSpec {
    pub id: LaneId,
    pub priority: Priority,
    pub max_concurrency: usize,
}

impl LaneSpec {
    pub fn new(id: impl Into<String>, priority: Priority, max_concurrency: usize) -> Self {
        Self {
            id: id.into(),
            priority,
            max_concurrency: max_concurrency.max(1),
        }
    }
}

/// Lane status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneStatus {
    pub pending: usize,
    pub active: usize,
    pub max: usize,
}

struct LaneState {
    spec: LaneSpec,
    pending: VecDeque<(JobId, Box<dyn Job>)>,
    active: usize,
}

impl LaneState {
    fn new(spec: LaneSpec) -> Self {
        Self {
            spec,
            pending: VecDeque::new(),
            active: 0,
        }
    }

    fn has_capacity(&self) -> bool {
        self.active < self.spec.max_concurrency
    }
}

/// Prioritized job queue with per-lane concurrency limits.
///
/// Jobs are accepted immediately and run in the background once
/// [`JobQueue::start`] has been called. Failures are recorded on the job and
/// logged; they never reach the submitter.
pub struct JobQueue {
    lanes: Mutex<HashMap<LaneId, LaneState>>,
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    wake: Notify,
    idle: Notify,
}

impl JobQueue {
    pub fn new(lanes: Vec<LaneSpec>) -> Arc<Self> {
        let lanes = lanes
            .into_iter()
            .map(|spec| (spec.id.clone(), LaneState::new(spec)))
            .collect();
        Arc::new(Self {
            lanes: Mutex::new(lanes),
            jobs: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            idle: Notify::new(),
        })
    }

    /// Queue with the built-in `export` and `transfer` lanes.
    pub fn from_config(config: &QueueConfig) -> Arc<Self> {
        Self::new(vec![
            LaneSpec::new(
                lane_ids::EXPORT,
                priorities::EXPORT,
                config.export_concurrency,
            ),
            LaneSpec::new(
                lane_ids::TRANSFER,
                priorities::TRANSFER,
                config.transfer_concurrency,
            ),
        ])
    }

    /// Submit a job to a lane
    pub fn submit(&self, lane_id: &str, job: Box<dyn Job>) -> Result<JobId> {
        let id = Uuid::new_v4().to_string();
        let record = JobRecord {
            id: id.clone(),
            lane: lane_id.to_string(),
            job_type: job.job_type().to_string(),
            state: JobState::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        {
            let mut lanes = self.lanes.lock();
            let lane = lanes
                .get_mut(lane_id)
                .ok_or_else(|| MirrorError::internal(format!("Lane not found: {lane_id}")))?;
            self.jobs.lock().insert(id.clone(), record);
            lane.pending.push_back((id.clone(), job));
        }

        tracing::debug!(job_id = %id, lane = lane_id, "Job queued");
        self.wake.notify_one();
        Ok(id)
    }

    /// Start the scheduler
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                queue.schedule_ready();
                queue.wake.notified().await;
            }
        })
    }

    /// Dispatch every job that fits in its lane, highest priority lanes first
    fn schedule_ready(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut lanes = self.lanes.lock();
            let mut ordered: Vec<_> = lanes.values_mut().collect();
            ordered.sort_by_key(|lane| lane.spec.priority);

            for lane in ordered {
                while lane.has_capacity() {
                    match lane.pending.pop_front() {
                        Some(entry) => {
                            lane.active += 1;
                            ready.push((lane.spec.id.clone(), entry));
                        }
                        None => break,
                    }
                }
            }
        }

        for (lane_id, (job_id, job)) in ready {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_job(lane_id, job_id, job).await;
            });
        }
    }

    async fn run_job(self: Arc<Self>, lane_id: LaneId, job_id: JobId, job: Box<dyn Job>) {
        let job_type = job.job_type().to_string();
        self.update(&job_id, |record| {
            record.state = JobState::Running;
            record.started_at = Some(Utc::now());
        });
        tracing::debug!(job_id = %job_id, lane = %lane_id, job_type = %job_type, "Job started");

        // A panicking job must still release its lane slot
        let state = match tokio::spawn(job.run()).await {
            Ok(Ok(())) => JobState::Succeeded,
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, job_type = %job_type, error = %e, "Job failed");
                JobState::Failed(e.to_string())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, job_type = %job_type, error = %e, "Job panicked");
                JobState::Failed(format!("job panicked: {e}"))
            }
        };

        self.update(&job_id, |record| {
            record.state = state;
            record.finished_at = Some(Utc::now());
        });

        if let Some(lane) = self.lanes.lock().get_mut(&lane_id) {
            lane.active = lane.active.saturating_sub(1);
        }

        self.wake.notify_one();
        self.idle.notify_waiters();
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.jobs.lock().get_mut(job_id) {
            apply(record);
        }
    }

    /// Get a job by id
    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().get(job_id).cloned()
    }

    /// All known jobs, oldest first
    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.submitted_at);
        jobs
    }

    /// Forget jobs that finished at least `older_than` ago. Pending and
    /// running jobs are kept. Returns how many records were removed.
    pub fn prune_finished(&self, older_than: std::time::Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.state.is_finished() => finished > cutoff,
            _ => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished jobs");
        }
        removed
    }

    /// True when no job is pending or running
    pub fn is_idle(&self) -> bool {
        self.lanes
            .lock()
            .values()
            .all(|lane| lane.pending.is_empty() && lane.active == 0)
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Get queue status for all lanes
    pub fn status(&self) -> HashMap<LaneId, LaneStatus> {
        self.lanes
            .lock()
            .iter()
            .map(|(id, lane)| {
                (
                    id.clone(),
                    LaneStatus {
                        pending: lane.pending.len(),
                        active: lane.active,
                        max: lane.spec.max_concurrency,
                    },
                )
            })
            .collect()
    }
}
