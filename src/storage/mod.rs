pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{
    Job, JobFilter, JobState, JobStatistics, MonitoringStatus, OrderBy, PageRequest, Tag,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Job>>;
    /// Newest job matching the natural key; `cluster` and `start_time`
    /// narrow the match when given.
    async fn find(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Option<Job>>;
    async fn find_all(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Vec<Job>>;
    /// Insert a new job row and return its database id. `job.id` is ignored.
    async fn start(&self, job: &Job) -> Result<i64>;
    /// Persist the stop transition. Fails with `InvalidTransition` when the
    /// row is no longer running.
    async fn stop(
        &self,
        id: i64,
        duration: i64,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()>;
    /// Updates of rows that no longer exist are ignored.
    async fn update_monitoring_status(&self, id: i64, status: MonitoringStatus) -> Result<()>;
    /// Record the archiving outcome. Updates of rows that no longer exist
    /// are ignored.
    async fn archive(
        &self,
        id: i64,
        status: MonitoringStatus,
        statistics: &JobStatistics,
    ) -> Result<()>;
    async fn delete_job_by_id(&self, id: i64) -> Result<()>;
    /// Delete every job that started before `start_time`, returning the count.
    async fn delete_jobs_before(&self, start_time: i64) -> Result<usize>;
    async fn fetch_metadata(&self, id: i64) -> Result<BTreeMap<String, String>>;
    async fn query_jobs(
        &self,
        filter: &JobFilter,
        page: Option<PageRequest>,
        order: OrderBy,
    ) -> Result<Vec<Job>>;
    /// Mark running jobs that exceeded `walltime + grace_secs` as failed.
    async fn stop_jobs_exceeding_walltime(&self, now: i64, grace_secs: i64) -> Result<usize>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Tags of one job, or every known tag when `job` is `None`.
    async fn get_tags(&self, job: Option<i64>) -> Result<Vec<Tag>>;
    async fn tag_id(&self, tag_type: &str, name: &str) -> Result<Option<i64>>;
    /// Attach the tag to the job, creating the tag first if needed.
    /// Attaching an already attached tag is a no-op.
    async fn add_tag_or_create(&self, job: i64, tag_type: &str, name: &str) -> Result<i64>;
    async fn remove_tag(&self, job: i64, tag: i64) -> Result<()>;
}
