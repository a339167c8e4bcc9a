//! Background archiving of stopped jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::archive::MetricArchiver;
use crate::errors::JobmonError;
use crate::models::{Job, MonitoringStatus};
use crate::storage::{JobStore, TagStore};

/// Keeps track of archiving tasks that are still in flight so shutdown can
/// wait for them.
#[derive(Clone, Default)]
pub struct ArchiveTracker {
    tracker: TaskTracker,
}

impl ArchiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every task spawned so far has finished. New tasks may be
    /// spawned again afterwards.
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait for outstanding archivings, giving up after `timeout`.
    /// Returns `true` when everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            tracing::info!("Waiting for {} outstanding archiving(s)", outstanding);
        }

        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "Gave up waiting for archivings after {:?}; {} still outstanding",
                    timeout,
                    self.outstanding()
                );
                false
            }
        }
    }
}

/// Collect metadata and tags, hand the job to the archiver and record the
/// outcome. Runs detached from the stop request.
pub(crate) async fn archive_stopped_job(
    job_store: Arc<dyn JobStore>,
    tag_store: Arc<dyn TagStore>,
    archiver: Arc<dyn MetricArchiver>,
    mut job: Job,
) {
    let id = job.id;

    match job_store.fetch_metadata(id).await {
        Ok(meta) => job.meta_data = meta,
        Err(e) => {
            mark_failed(job_store.as_ref(), &job, "fetching metadata", e).await;
            return;
        }
    }
    match tag_store.get_tags(Some(id)).await {
        Ok(tags) => job.tags = tags,
        Err(e) => {
            mark_failed(job_store.as_ref(), &job, "loading tags", e).await;
            return;
        }
    }

    let statistics = match archiver.archive_job(&job).await {
        Ok(statistics) => statistics,
        Err(e) => {
            mark_failed(job_store.as_ref(), &job, "archiving", e).await;
            return;
        }
    };

    let status = match job
        .monitoring_status
        .transition(MonitoringStatus::ArchivingSuccessful)
    {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("archiving job (dbid: {}) finished but: {}", id, e);
            return;
        }
    };

    // the archive is written; a failure here leaves the row at its old status
    if let Err(e) = job_store.archive(id, status, &statistics).await {
        tracing::error!(
            "archiving job (dbid: {}) succeeded but updating the job failed: {}",
            id,
            e
        );
        return;
    }

    tracing::info!(
        "archiving job (dbid: {}) successful: {} metrics",
        id,
        statistics.len()
    );
}

async fn mark_failed(job_store: &dyn JobStore, job: &Job, step: &str, err: JobmonError) {
    tracing::error!("archiving job (dbid: {}) failed at {}: {}", job.id, step, err);

    let status = match job
        .monitoring_status
        .transition(MonitoringStatus::ArchivingFailed)
    {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("job (dbid: {}): {}", job.id, e);
            return;
        }
    };
    if let Err(e) = job_store.update_monitoring_status(job.id, status).await {
        tracing::error!(
            "job (dbid: {}): recording the failed archiving failed: {}",
            job.id,
            e
        );
    }
}
