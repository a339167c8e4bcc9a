//! Metric archive: where finished jobs' metric data ends up, and where the
//! live data for running jobs is fetched from.

pub mod fs;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{JobmonError, Result};
use crate::models::{ClusterConfig, Job, JobData, JobStatistics, Tag};

pub use fs::FsArchive;
pub use http::HttpMetricDataRepository;

/// Source of per-node time series for a job (a metric store).
#[async_trait]
pub trait MetricDataRepository: Send + Sync {
    /// Load the series of `job`, restricted to `metrics` when given.
    async fn load_data(&self, job: &Job, metrics: Option<&[String]>) -> Result<JobData>;
}

#[async_trait]
pub trait MetricArchiver: Send + Sync {
    /// Pull the job's metric data, write it to the archive together with the
    /// job metadata, and return the computed statistics.
    async fn archive_job(&self, job: &Job) -> Result<JobStatistics>;
    /// Rewrite the tag list stored with an already archived job.
    async fn update_tags(&self, job: &Job, tags: &[Tag]) -> Result<()>;
    async fn load_job_data(&self, job: &Job) -> Result<JobData>;
}

/// Metric data repositories keyed by cluster name.
#[derive(Clone, Default)]
pub struct MetricRepositories {
    repos: HashMap<String, Arc<dyn MetricDataRepository>>,
}

impl MetricRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP repository per cluster that configures a metric data
    /// repository. All of them share a single connection pool.
    pub fn from_config(clusters: &[ClusterConfig]) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        let mut repos = Self::new();
        for cluster in clusters {
            if let Some(ref repo) = cluster.metric_data_repository {
                tracing::debug!(
                    "cluster '{}' uses metric data repository at {}",
                    cluster.name,
                    repo.url
                );
                repos.insert(
                    &cluster.name,
                    Arc::new(HttpMetricDataRepository::new(client.clone(), repo)),
                );
            }
        }
        Ok(repos)
    }

    pub fn insert(&mut self, cluster: &str, repo: Arc<dyn MetricDataRepository>) {
        self.repos.insert(cluster.to_string(), repo);
    }

    pub fn for_cluster(&self, cluster: &str) -> Result<Arc<dyn MetricDataRepository>> {
        self.repos.get(cluster).cloned().ok_or_else(|| {
            JobmonError::Archival(format!(
                "no metric data repository configured for cluster '{}'",
                cluster
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

/// Keep only the named metrics. `None` or an empty list keeps everything.
pub fn filter_metrics(data: JobData, metrics: Option<&[String]>) -> JobData {
    match metrics {
        Some(names) if !names.is_empty() => data
            .into_iter()
            .filter(|(name, _)| names.contains(name))
            .collect(),
        _ => data,
    }
}
