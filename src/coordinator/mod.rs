//! Job lifecycle: start, stop (and hand-off to archiving), tagging and
//! deletion. Everything that writes jobs goes through [`JobCoordinator`].

pub mod archiving;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::archive::MetricArchiver;
use crate::errors::{JobmonError, Result};
use crate::models::job::{validate_start_request, DUPLICATE_WINDOW_SECS};
use crate::models::{
    ClusterConfig, DeleteJobRequest, Job, JobState, MonitoringStatus, StartJobRequest,
    StopJobRequest, TagRequest,
};
use crate::storage::{JobStore, TagStore};

pub use archiving::ArchiveTracker;

/// How a stop request names its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    /// By database id, taken from the request path.
    ById(i64),
    /// By `jobId` plus the optional `cluster`/`startTime` of the body.
    ByRequest,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub disable_archive: bool,
    /// Known clusters. Empty accepts any cluster.
    pub clusters: Vec<ClusterConfig>,
}

pub struct JobCoordinator {
    job_store: Arc<dyn JobStore>,
    tag_store: Arc<dyn TagStore>,
    archiver: Arc<dyn MetricArchiver>,
    tracker: ArchiveTracker,
    /// Serializes the duplicate check with the insert of new jobs.
    start_lock: Mutex<()>,
    settings: CoordinatorSettings,
}

impl JobCoordinator {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        tag_store: Arc<dyn TagStore>,
        archiver: Arc<dyn MetricArchiver>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            job_store,
            tag_store,
            archiver,
            tracker: ArchiveTracker::new(),
            start_lock: Mutex::new(()),
            settings,
        }
    }

    pub fn tracker(&self) -> &ArchiveTracker {
        &self.tracker
    }

    /// Validate and insert a new running job, then attach its tags.
    /// Returns the database id.
    pub async fn start_job(&self, req: StartJobRequest) -> Result<i64> {
        validate_start_request(&req, &self.settings.clusters)?;
        let job = req.to_job(self.settings.disable_archive);

        let id = {
            let _guard = self.start_lock.lock().await;

            let existing = self
                .job_store
                .find_all(job.job_id, Some(&job.cluster), None)
                .await?;
            if let Some(dup) = existing
                .iter()
                .find(|j| (j.start_time - job.start_time).abs() < DUPLICATE_WINDOW_SECS)
            {
                return Err(JobmonError::DuplicateJob { id: dup.id });
            }

            self.job_store.start(&job).await?
        };

        for tag in &req.tags {
            if let Err(e) = self
                .tag_store
                .add_tag_or_create(id, &tag.tag_type, &tag.name)
                .await
            {
                return Err(JobmonError::PartialStart {
                    id,
                    source: Box::new(e),
                });
            }
        }

        tracing::info!(
            "new job (id: {}): cluster={}, jobId={}, user={}, startTime={}",
            id,
            job.cluster,
            job.job_id,
            job.user,
            job.start_time
        );
        Ok(id)
    }

    /// Mark a running job as finished and schedule its archiving. The
    /// returned job reflects the persisted stop; archiving runs detached.
    pub async fn stop_job(&self, target: StopTarget, req: StopJobRequest) -> Result<Job> {
        let mut job = match target {
            StopTarget::ById(id) => self
                .job_store
                .find_by_id(id)
                .await?
                .ok_or_else(|| JobmonError::NotFound(format!("finding job with id {} failed", id)))?,
            StopTarget::ByRequest => {
                let job_id = req.job_id.ok_or_else(|| {
                    JobmonError::Validation("the field 'jobId' is required".to_string())
                })?;
                self.job_store
                    .find(job_id, req.cluster.as_deref(), req.start_time)
                    .await?
                    .ok_or_else(|| {
                        JobmonError::NotFound(format!("finding job with jobId {} failed", job_id))
                    })?
            }
        };

        if job.state != JobState::Running || req.stop_time <= job.start_time {
            return Err(JobmonError::InvalidTransition(
                "stopTime must be larger than startTime and only running jobs can be stopped"
                    .to_string(),
            ));
        }
        let state = req.state.unwrap_or(JobState::Completed);
        if !state.is_terminal() {
            return Err(JobmonError::InvalidTransition("invalid job state".to_string()));
        }

        job.duration = req.stop_time - job.start_time;
        job.state = state;
        self.job_store
            .stop(job.id, job.duration, job.state, job.monitoring_status)
            .await?;

        tracing::info!(
            "stopped job (dbid: {}): cluster={}, jobId={}, user={}, duration={}s, state={}",
            job.id,
            job.cluster,
            job.job_id,
            job.user,
            job.duration,
            job.state
        );

        if job.monitoring_status == MonitoringStatus::Disabled {
            return Ok(job);
        }

        self.tracker.spawn(archiving::archive_stopped_job(
            self.job_store.clone(),
            self.tag_store.clone(),
            self.archiver.clone(),
            job.clone(),
        ));
        Ok(job)
    }

    /// Attach tags to a job, creating unknown tags on the way.
    pub async fn add_tags(&self, id: i64, tags: &[TagRequest]) -> Result<Job> {
        let mut job = self.find_existing(id).await?;
        for tag in tags {
            tag.validate()?;
        }

        for tag in tags {
            self.tag_store
                .add_tag_or_create(id, &tag.tag_type, &tag.name)
                .await?;
        }

        job.tags = self.tag_store.get_tags(Some(id)).await?;
        self.mirror_tags(&job).await?;
        Ok(job)
    }

    /// Detach tags from a job. Every tag must exist.
    pub async fn remove_tags(&self, id: i64, tags: &[TagRequest]) -> Result<Job> {
        let mut job = self.find_existing(id).await?;

        let mut tag_ids = Vec::with_capacity(tags.len());
        for tag in tags {
            tag.validate()?;
            let tag_id = self
                .tag_store
                .tag_id(&tag.tag_type, &tag.name)
                .await?
                .ok_or_else(|| {
                    JobmonError::NotFound(format!(
                        "tag '{}:{}' does not exist",
                        tag.tag_type, tag.name
                    ))
                })?;
            tag_ids.push(tag_id);
        }
        for tag_id in tag_ids {
            self.tag_store.remove_tag(id, tag_id).await?;
        }

        job.tags = self.tag_store.get_tags(Some(id)).await?;
        self.mirror_tags(&job).await?;
        Ok(job)
    }

    pub async fn delete_job_by_id(&self, id: i64) -> Result<()> {
        self.job_store.delete_job_by_id(id).await?;
        tracing::info!("deleted job (dbid: {})", id);
        Ok(())
    }

    /// Look the job up by its natural key and delete it. Returns the
    /// database id of the deleted job.
    pub async fn delete_job_by_request(&self, req: &DeleteJobRequest) -> Result<i64> {
        let job_id = req.job_id.ok_or_else(|| {
            JobmonError::Validation("the field 'jobId' is required".to_string())
        })?;
        let job = self
            .job_store
            .find(job_id, req.cluster.as_deref(), req.start_time)
            .await?
            .ok_or_else(|| {
                JobmonError::NotFound(format!("finding job with jobId {} failed", job_id))
            })?;

        self.delete_job_by_id(job.id).await?;
        Ok(job.id)
    }

    pub async fn delete_jobs_before(&self, start_time: i64) -> Result<usize> {
        let count = self.job_store.delete_jobs_before(start_time).await?;
        tracing::info!("deleted {} jobs started before {}", count, start_time);
        Ok(count)
    }

    /// Fail running jobs that overran their walltime by more than
    /// `grace_secs`.
    pub async fn stop_jobs_exceeding_walltime(&self, grace_secs: i64) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let count = self
            .job_store
            .stop_jobs_exceeding_walltime(now, grace_secs)
            .await?;
        if count > 0 {
            tracing::warn!("marked {} jobs exceeding their walltime as failed", count);
        }
        Ok(count)
    }

    async fn find_existing(&self, id: i64) -> Result<Job> {
        self.job_store
            .find_by_id(id)
            .await?
            .ok_or_else(|| JobmonError::NotFound(format!("job with id {} not found", id)))
    }

    /// Archived jobs keep a copy of their tags in the archive.
    async fn mirror_tags(&self, job: &Job) -> Result<()> {
        if job.monitoring_status != MonitoringStatus::ArchivingSuccessful {
            return Ok(());
        }
        self.archiver
            .update_tags(job, &job.tags)
            .await
            .map_err(|e| JobmonError::Storage(format!("updating archived tags failed: {}", e)))
    }
}
