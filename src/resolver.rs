//! Read side: job listings, single jobs, metric data and tags.

use std::sync::Arc;

use crate::archive::{filter_metrics, MetricArchiver, MetricRepositories};
use crate::errors::{JobmonError, Result};
use crate::models::{
    Job, JobFilter, JobMetricWithName, MonitoringStatus, OrderBy, PageRequest, Tag,
};
use crate::storage::{JobStore, TagStore};

#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub filter: JobFilter,
    pub page: Option<PageRequest>,
    pub order: OrderBy,
    pub with_metadata: bool,
}

pub struct JobResolver {
    job_store: Arc<dyn JobStore>,
    tag_store: Arc<dyn TagStore>,
    archiver: Arc<dyn MetricArchiver>,
    repos: MetricRepositories,
}

impl JobResolver {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        tag_store: Arc<dyn TagStore>,
        archiver: Arc<dyn MetricArchiver>,
        repos: MetricRepositories,
    ) -> Self {
        Self {
            job_store,
            tag_store,
            archiver,
            repos,
        }
    }

    pub async fn jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let mut jobs = self
            .job_store
            .query_jobs(&query.filter, query.page, query.order)
            .await?;

        for job in &mut jobs {
            job.tags = self.tag_store.get_tags(Some(job.id)).await?;
            if query.with_metadata {
                job.meta_data = self.job_store.fetch_metadata(job.id).await?;
            }
        }
        Ok(jobs)
    }

    /// A single job with its tags and metadata.
    pub async fn job(&self, id: i64) -> Result<Job> {
        let mut job = self
            .job_store
            .find_by_id(id)
            .await?
            .ok_or_else(|| JobmonError::NotFound(format!("job with id {} not found", id)))?;
        job.tags = self.tag_store.get_tags(Some(id)).await?;
        job.meta_data = self.job_store.fetch_metadata(id).await?;
        Ok(job)
    }

    /// Metric data of a job: from the archive once it is archived, from the
    /// cluster's metric data repository before that.
    pub async fn job_metrics(
        &self,
        id: i64,
        metrics: Option<&[String]>,
    ) -> Result<Vec<JobMetricWithName>> {
        let job = self
            .job_store
            .find_by_id(id)
            .await?
            .ok_or_else(|| JobmonError::NotFound(format!("job with id {} not found", id)))?;

        let data = if job.monitoring_status == MonitoringStatus::ArchivingSuccessful {
            let data = self.archiver.load_job_data(&job).await?;
            filter_metrics(data, metrics)
        } else {
            let repo = self.repos.for_cluster(&job.cluster)?;
            repo.load_data(&job, metrics).await?
        };

        Ok(data
            .into_iter()
            .map(|(name, metric)| JobMetricWithName { name, metric })
            .collect())
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.tag_store.get_tags(None).await
    }
}
