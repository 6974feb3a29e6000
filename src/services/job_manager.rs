// Job Manager
// Purpose: asynchronous pipeline execution with progress, cancellation,
// result storage, and terminal-job cleanup.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::job::{Job, JobKind, JobState, JobSummary};
use crate::models::metadata::GenerateOptions;
use crate::services::pipeline::{MetadataPipeline, RunHooks};
use crate::services::storage::MetadataStore;
use crate::utils::{ApiError, ApiResult, ScheduledTask};

/// One queued generation target
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub owner: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub options: GenerateOptions,
}

pub struct JobManager {
    jobs: Arc<DashMap<String, Job>>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    pipeline: Arc<MetadataPipeline>,
    store: Arc<MetadataStore>,
    max_age: Duration,
}

impl JobManager {
    pub fn new(
        pipeline: Arc<MetadataPipeline>,
        store: Arc<MetadataStore>,
        max_age_hours: i64,
    ) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            cancel_flags: DashMap::new(),
            pipeline,
            store,
            max_age: Duration::hours(max_age_hours.max(1)),
        }
    }

    /// Submit a generation job; returns immediately with the job id
    pub fn submit(self: &Arc<Self>, kind: JobKind, request: JobRequest) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), kind);
        let cancel = Arc::new(AtomicBool::new(false));

        self.jobs.insert(job_id.clone(), job);
        self.cancel_flags.insert(job_id.clone(), Arc::clone(&cancel));

        tracing::info!(
            "Submitted {:?} job {} for {}.{}.{}",
            kind,
            job_id,
            request.database,
            request.schema,
            request.table
        );

        let manager = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            manager.run_job(&id, request, cancel).await;
        });

        job_id
    }

    async fn run_job(&self, job_id: &str, request: JobRequest, cancel: Arc<AtomicBool>) {
        self.transition(job_id, JobState::Running, None);

        let progress_jobs = Arc::clone(&self.jobs);
        let progress_id = job_id.to_string();
        let hooks = RunHooks {
            cancel: Some(cancel),
            progress: Some(Arc::new(move |progress: f64| {
                if let Some(mut job) = progress_jobs.get_mut(&progress_id) {
                    if !job.state.is_terminal() {
                        job.progress = progress;
                        job.updated_at = Utc::now();
                    }
                }
            })),
        };

        let result = self
            .pipeline
            .generate(
                &request.owner,
                &request.database,
                &request.schema,
                &request.table,
                &request.options,
                &hooks,
            )
            .await;

        match result {
            Ok(document) => {
                // Persist before the job turns terminal so a completed job
                // always has a stored document behind it
                if let Err(e) = self.store.write(&document).await {
                    tracing::error!("Job {} could not store its document: {}", job_id, e);
                    self.transition(job_id, JobState::Failed, Some(e.to_string()));
                    return;
                }
                if let Some(mut job) = self.jobs.get_mut(job_id) {
                    if !job.state.is_terminal() {
                        job.result = Some(Box::new(document));
                        job.progress = 1.0;
                        job.state = JobState::Completed;
                        job.updated_at = Utc::now();
                    }
                }
                tracing::info!("Job {} completed", job_id);
            }
            Err(e) => {
                let cause = match &e {
                    ApiError::Cancelled => "Cancelled".to_string(),
                    other => other.to_string(),
                };
                tracing::warn!("Job {} failed: {}", job_id, cause);
                self.transition(job_id, JobState::Failed, Some(cause));
            }
        }

        self.cancel_flags.remove(job_id);
    }

    /// Terminal states are sticky: transitions out of them are rejected
    fn transition(&self, job_id: &str, state: JobState, error: Option<String>) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            if job.state.is_terminal() {
                tracing::debug!(
                    "Ignoring transition of terminal job {} to {:?}",
                    job_id,
                    state
                );
                return;
            }
            job.state = state;
            job.error = error;
            job.updated_at = Utc::now();
        }
    }

    pub fn status(&self, job_id: &str) -> ApiResult<Job> {
        self.jobs
            .get(job_id)
            .map(|job| job.clone())
            .ok_or_else(|| ApiError::not_found(format!("job '{}'", job_id)))
    }

    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> =
            self.jobs.iter().map(|entry| JobSummary::from(entry.value())).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Request cancellation. The signal is honored at stage boundaries;
    /// in-flight queries run to completion and are discarded.
    pub fn cancel(&self, job_id: &str) -> ApiResult<Job> {
        let job = self.status(job_id)?;
        if job.state.is_terminal() {
            return Ok(job);
        }
        if let Some(flag) = self.cancel_flags.get(job_id) {
            flag.store(true, Ordering::Relaxed);
            tracing::info!("Cancellation requested for job {}", job_id);
        }
        self.status(job_id)
    }

    /// Drop terminal jobs older than the horizon; running jobs are kept
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.max_age;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.state.is_terminal() && job.updated_at < cutoff));
        let removed = before - self.jobs.len();
        if removed > 0 {
            tracing::info!("Cleaned up {} finished jobs", removed);
        }
        removed
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

/// Periodic cleanup hook for the scheduled executor
pub struct JobCleanupTask {
    manager: Arc<JobManager>,
}

impl JobCleanupTask {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }
}

impl ScheduledTask for JobCleanupTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            self.manager.cleanup();
            Ok(())
        })
    }
}
