//! Background indexing job queue and singleton worker (spec component 4.6).
//!
//! The queue is the engine's only process-wide mutable state, guarded by a
//! single mutex the way `review/context/build.rs`'s memo cell guards its
//! process-wide cache in the teacher crate — a `OnceLock<Mutex<...>>` holder,
//! not a hand-rolled `unsafe` static.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{IndexingJob, JobPriority, JobStatus, QueueConfig};

/// Typed events emitted by the worker for CLI-level notifications.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    IndexerStarted,
    IndexerStopped,
    JobStarted { job_id: String },
    JobCompleted { job_id: String },
    JobFailed { job_id: String, error: String },
}

/// Anything capable of driving an indexing job to completion. The engine
/// does not implement the incremental indexer itself — it is an external
/// collaborator the worker calls into.
pub trait IncrementalIndexer {
    fn run(
        &self,
        job: &IndexingJob,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, String>> + Send;
}

/// Priority queue over `IndexingJob`. `high > normal > low`, ties broken FIFO.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<IndexingJob>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self { jobs: VecDeque::new() }
    }

    /// Inserts a job keeping `jobs` sorted by priority desc, FIFO within a
    /// priority tier (stable insertion point: after the last job of equal or
    /// higher priority).
    pub fn enqueue(&mut self, job: IndexingJob) {
        let insert_at = self
            .jobs
            .iter()
            .position(|j| j.priority < job.priority)
            .unwrap_or(self.jobs.len());
        self.jobs.insert(insert_at, job);
    }

    pub fn has_existing_pending(&self, repo_url: &str, branch: &str) -> bool {
        self.jobs
            .iter()
            .any(|j| j.status == JobStatus::Pending && j.repo_url == repo_url && j.branch == branch)
    }

    pub fn next_pending(&self) -> Option<&IndexingJob> {
        self.jobs.iter().find(|j| j.status == JobStatus::Pending)
    }

    pub fn mark_processing(&mut self, id: &str) -> bool {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    pub fn mark_completed(&mut self, id: &str, result: serde_json::Value) -> bool {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
            true
        } else {
            false
        }
    }

    pub fn mark_failed(&mut self, id: &str, error: String) -> bool {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error);
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Pending).count()
    }

    pub fn processing_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Processing).count()
    }

    pub fn snapshot(&self) -> Vec<IndexingJob> {
        self.jobs.iter().cloned().collect()
    }
}

/// Auto-enqueue policy: a review touching more than `threshold` files enqueues
/// one job per (repo, branch) if none is already pending, `low` priority if
/// file count exceeds 500 else `normal`.
pub fn auto_enqueue_job(
    queue: &mut JobQueue,
    repo_url: &str,
    repo_path: &str,
    branch: &str,
    changed_files: Vec<String>,
    config: &QueueConfig,
) -> Option<String> {
    let file_count = changed_files.len();
    if file_count <= config.auto_queue_threshold {
        return None;
    }
    if queue.has_existing_pending(repo_url, branch) {
        return None;
    }
    let priority = if file_count > 500 { JobPriority::Low } else { JobPriority::Normal };
    let job = IndexingJob {
        id: Uuid::new_v4().to_string(),
        repo_url: repo_url.to_string(),
        repo_path: repo_path.to_string(),
        branch: branch.to_string(),
        changed_files: Some(changed_files),
        file_count,
        priority,
        status: JobStatus::Pending,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        result: None,
        error: None,
    };
    let id = job.id.clone();
    queue.enqueue(job);
    Some(id)
}

struct WorkerState {
    queue: Mutex<JobQueue>,
    running: std::sync::atomic::AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<QueueEvent>>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    notify: tokio::sync::Notify,
}

static WORKER_CELL: OnceLock<WorkerState> = OnceLock::new();

fn worker() -> &'static WorkerState {
    WORKER_CELL.get_or_init(|| WorkerState {
        queue: Mutex::new(JobQueue::new()),
        running: std::sync::atomic::AtomicBool::new(false),
        events: Mutex::new(None),
        poll_handle: Mutex::new(None),
        notify: tokio::sync::Notify::new(),
    })
}

/// Process-wide handle onto the singleton background worker.
pub struct BackgroundWorker;

impl BackgroundWorker {
    pub fn queue_snapshot() -> Vec<IndexingJob> {
        worker().queue.lock().expect("queue mutex poisoned").snapshot()
    }

    pub fn enqueue(job: IndexingJob) {
        worker().queue.lock().expect("queue mutex poisoned").enqueue(job);
        if worker().running.load(std::sync::atomic::Ordering::SeqCst) {
            Self::tick_now();
        }
    }

    pub fn has_existing_pending(repo_url: &str, branch: &str) -> bool {
        worker()
            .queue
            .lock()
            .expect("queue mutex poisoned")
            .has_existing_pending(repo_url, branch)
    }

    /// Applies the auto-enqueue policy (spec.md §4.6) against the singleton
    /// queue and wakes the worker immediately if it is running.
    pub fn auto_enqueue(
        repo_url: &str,
        repo_path: &str,
        branch: &str,
        changed_files: Vec<String>,
        config: &QueueConfig,
    ) -> Option<String> {
        let job_id = {
            let mut queue = worker().queue.lock().expect("queue mutex poisoned");
            auto_enqueue_job(&mut queue, repo_url, repo_path, branch, changed_files, config)
        };
        if job_id.is_some() && worker().running.load(std::sync::atomic::Ordering::SeqCst) {
            Self::tick_now();
        }
        job_id
    }

    /// Starts the worker: spawns a polling task that drains up to
    /// `max_concurrent_jobs` pending jobs every `poll_interval`. Returns the
    /// receiving end of the event channel — the caller (e.g. a CLI) consumes
    /// `QueueEvent`s for user-facing notifications.
    pub fn start<I>(indexer: I, config: QueueConfig) -> mpsc::UnboundedReceiver<QueueEvent>
    where
        I: IncrementalIndexer + Clone + Send + Sync + 'static,
    {
        let state = worker();
        if state.running.swap(true, std::sync::atomic::Ordering::SeqCst) {
            let (_tx, rx) = mpsc::unbounded_channel();
            return rx; // already running; caller gets an inert receiver
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *state.events.lock().expect("events mutex poisoned") = Some(tx.clone());
        let _ = tx.send(QueueEvent::IndexerStarted);
        info!("queue: background indexer started");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = worker().notify.notified() => {}
                }
                if !worker().running.load(std::sync::atomic::Ordering::SeqCst) {
                    break;
                }
                drain_pending(&indexer, config.max_concurrent_jobs, &tx).await;
            }
        });
        *state.poll_handle.lock().expect("poll handle mutex poisoned") = Some(handle);
        rx
    }

    /// Triggers an immediate poll without waiting for the next tick —
    /// wakes the worker loop via its shared `Notify` (spec.md §5: "enqueueing
    /// while idle emits one immediate tick").
    pub fn tick_now() {
        worker().notify.notify_one();
    }

    /// Stops the worker: clears the poll timer and waits for the in-flight
    /// job (if any) to finish cooperatively — no cancellation.
    pub async fn stop() {
        let state = worker();
        if !state.running.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = state.events.lock().expect("events mutex poisoned").take() {
            let _ = tx.send(QueueEvent::IndexerStopped);
        }
        let handle = state.poll_handle.lock().expect("poll handle mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("queue: background indexer stopped");
    }
}

async fn drain_pending<I: IncrementalIndexer>(
    indexer: &I,
    max_concurrent_jobs: usize,
    events: &mpsc::UnboundedSender<QueueEvent>,
) {
    for _ in 0..max_concurrent_jobs {
        let job = {
            let mut queue = worker().queue.lock().expect("queue mutex poisoned");
            let Some(job) = queue.next_pending().cloned() else {
                return;
            };
            queue.mark_processing(&job.id);
            job
        };
        let _ = events.send(QueueEvent::JobStarted { job_id: job.id.clone() });
        match indexer.run(&job).await {
            Ok(result) => {
                worker().queue.lock().expect("queue mutex poisoned").mark_completed(&job.id, result);
                let _ = events.send(QueueEvent::JobCompleted { job_id: job.id.clone() });
            }
            Err(error) => {
                worker()
                    .queue
                    .lock()
                    .expect("queue mutex poisoned")
                    .mark_failed(&job.id, error.clone());
                warn!("queue: job {} failed: {error}", job.id);
                let _ = events.send(QueueEvent::JobFailed { job_id: job.id, error });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(repo: &str, branch: &str, priority: JobPriority) -> IndexingJob {
        IndexingJob {
            id: Uuid::new_v4().to_string(),
            repo_url: repo.to_string(),
            repo_path: "/tmp/repo".to_string(),
            branch: branch.to_string(),
            changed_files: None,
            file_count: 0,
            priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    #[test]
    fn priority_ordering_high_before_normal_before_low() {
        let mut queue = JobQueue::new();
        queue.enqueue(sample_job("r", "main", JobPriority::Low));
        queue.enqueue(sample_job("r", "main", JobPriority::High));
        queue.enqueue(sample_job("r", "main", JobPriority::Normal));
        let order: Vec<JobPriority> = queue.jobs.iter().map(|j| j.priority).collect();
        assert_eq!(order, vec![JobPriority::High, JobPriority::Normal, JobPriority::Low]);
    }

    #[test]
    fn fifo_tie_break_within_same_priority() {
        let mut queue = JobQueue::new();
        let first = sample_job("r", "main", JobPriority::Normal);
        let first_id = first.id.clone();
        queue.enqueue(first);
        queue.enqueue(sample_job("r", "main", JobPriority::Normal));
        assert_eq!(queue.next_pending().unwrap().id, first_id);
    }

    #[test]
    fn has_existing_pending_detects_duplicate_repo_branch() {
        let mut queue = JobQueue::new();
        queue.enqueue(sample_job("repo-a", "main", JobPriority::Normal));
        assert!(queue.has_existing_pending("repo-a", "main"));
        assert!(!queue.has_existing_pending("repo-a", "dev"));
    }

    #[test]
    fn auto_enqueue_skips_below_threshold() {
        let mut queue = JobQueue::new();
        let config = QueueConfig::default();
        let files: Vec<String> = (0..50).map(|i| format!("f{i}.rs")).collect();
        let id = auto_enqueue_job(&mut queue, "repo", "/tmp", "main", files, &config);
        assert!(id.is_none());
    }

    #[test]
    fn auto_enqueue_uses_low_priority_above_500_files() {
        let mut queue = JobQueue::new();
        let config = QueueConfig::default();
        let files: Vec<String> = (0..600).map(|i| format!("f{i}.rs")).collect();
        let id = auto_enqueue_job(&mut queue, "repo", "/tmp", "main", files, &config);
        assert!(id.is_some());
        assert_eq!(queue.next_pending().unwrap().priority, JobPriority::Low);
    }

    #[test]
    fn auto_enqueue_refuses_duplicate_pending() {
        let mut queue = JobQueue::new();
        let config = QueueConfig::default();
        let files: Vec<String> = (0..150).map(|i| format!("f{i}.rs")).collect();
        let first = auto_enqueue_job(&mut queue, "repo", "/tmp", "main", files.clone(), &config);
        let second = auto_enqueue_job(&mut queue, "repo", "/tmp", "main", files, &config);
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
