//! File-system job archive.
//!
//! Layout: `{root}/{cluster}/{jobId / 1000}/{jobId % 1000:03}/{startTime}/`
//! holding `meta.json` (the job, its tags and statistics) and `data.json`
//! (the metric series).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{MetricArchiver, MetricRepositories};
use crate::errors::{JobmonError, Result};
use crate::models::metrics::compute_statistics;
use crate::models::{Job, JobData, JobStatistics, MonitoringStatus, Tag};

const META_FILE: &str = "meta.json";
const DATA_FILE: &str = "data.json";

pub struct FsArchive {
    root: PathBuf,
    repos: MetricRepositories,
}

impl FsArchive {
    pub fn new(root: PathBuf, repos: MetricRepositories) -> Self {
        Self { root, repos }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.root
            .join(&job.cluster)
            .join((job.job_id / 1000).to_string())
            .join(format!("{:03}", job.job_id % 1000))
            .join(job.start_time.to_string())
    }

    /// The archived metadata of a job.
    pub async fn load_meta(&self, job: &Job) -> Result<Job> {
        let path = self.job_dir(job).join(META_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| archival_error(&path, "reading", e))?;
        serde_json::from_slice(&bytes).map_err(|e| archival_error(&path, "parsing", e))
    }
}

fn archival_error(path: &Path, action: &str, err: impl std::fmt::Display) -> JobmonError {
    JobmonError::Archival(format!("{} {} failed: {}", action, path.display(), err))
}

/// Write through a temporary sibling and rename, so readers never see a
/// half-written file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| archival_error(&tmp, "writing", e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| archival_error(path, "renaming into", e))?;
    Ok(())
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| archival_error(path, "encoding", e))?;
    write_atomic(path, &bytes).await
}

#[async_trait]
impl MetricArchiver for FsArchive {
    async fn archive_job(&self, job: &Job) -> Result<JobStatistics> {
        let repo = self.repos.for_cluster(&job.cluster)?;
        let data = repo.load_data(job, None).await?;
        let statistics = compute_statistics(&data);

        let dir = self.job_dir(job);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| archival_error(&dir, "creating", e))?;

        let mut meta = job.clone();
        meta.monitoring_status = MonitoringStatus::ArchivingSuccessful;
        meta.statistics = Some(statistics.clone());

        write_json(&dir.join(DATA_FILE), &data).await?;
        write_json(&dir.join(META_FILE), &meta).await?;

        tracing::debug!(
            "archived job {} ({} metrics) to {}",
            job.id,
            data.len(),
            dir.display()
        );
        Ok(statistics)
    }

    async fn update_tags(&self, job: &Job, tags: &[Tag]) -> Result<()> {
        let mut meta = self.load_meta(job).await?;
        meta.tags = tags.to_vec();
        write_json(&self.job_dir(job).join(META_FILE), &meta).await
    }

    async fn load_job_data(&self, job: &Job) -> Result<JobData> {
        let path = self.job_dir(job).join(DATA_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| archival_error(&path, "reading", e))?;
        serde_json::from_slice(&bytes).map_err(|e| archival_error(&path, "parsing", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::archive::MetricDataRepository;
    use crate::models::{JobMetric, JobState, Resource, Series};

    struct FixedRepo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricDataRepository for FixedRepo {
        async fn load_data(&self, _job: &Job, _metrics: Option<&[String]>) -> Result<JobData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobData::from([(
                "cpu_load".to_string(),
                JobMetric {
                    unit: "load".to_string(),
                    timestep: 60,
                    series: vec![Series {
                        hostname: "f0101".to_string(),
                        id: None,
                        data: vec![Some(1.0), Some(3.0), None],
                    }],
                },
            )]))
        }
    }

    fn job() -> Job {
        Job {
            id: 7,
            job_id: 123456,
            user: "alice".to_string(),
            project: String::new(),
            cluster: "fritz".to_string(),
            sub_cluster: String::new(),
            partition: String::new(),
            array_job_id: 0,
            num_nodes: 1,
            num_hwthreads: 0,
            num_acc: 0,
            exclusive: 1,
            monitoring_status: MonitoringStatus::RunningOrArchiving,
            smt: 1,
            state: JobState::Completed,
            start_time: 1649723812,
            duration: 3600,
            walltime: 0,
            resources: vec![Resource {
                hostname: "f0101".to_string(),
                hwthreads: None,
                accelerators: None,
                configuration: None,
            }],
            meta_data: BTreeMap::new(),
            tags: vec![Tag {
                id: 1,
                tag_type: "Debug".to_string(),
                name: "Test".to_string(),
            }],
            statistics: None,
        }
    }

    fn archive(root: &Path) -> (FsArchive, Arc<FixedRepo>) {
        let repo = Arc::new(FixedRepo {
            calls: AtomicUsize::new(0),
        });
        let mut repos = MetricRepositories::new();
        repos.insert("fritz", repo.clone());
        (FsArchive::new(root.to_path_buf(), repos), repo)
    }

    #[test]
    fn test_job_dir_layout() {
        let (archive, _) = archive(Path::new("/var/archive"));
        assert_eq!(
            archive.job_dir(&job()),
            PathBuf::from("/var/archive/fritz/123/456/1649723812")
        );

        let mut small = job();
        small.job_id = 7;
        assert_eq!(
            archive.job_dir(&small),
            PathBuf::from("/var/archive/fritz/0/007/1649723812")
        );
    }

    #[tokio::test]
    async fn test_archive_job_writes_meta_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, repo) = archive(dir.path());

        let stats = archive.archive_job(&job()).await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
        let cpu = &stats["cpu_load"];
        assert_eq!(cpu.avg, 2.0);
        assert_eq!(cpu.min, 1.0);
        assert_eq!(cpu.max, 3.0);

        let meta = archive.load_meta(&job()).await.unwrap();
        assert_eq!(meta.monitoring_status, MonitoringStatus::ArchivingSuccessful);
        assert_eq!(meta.statistics, Some(stats));
        assert_eq!(meta.tags.len(), 1);

        let data = archive.load_job_data(&job()).await.unwrap();
        assert_eq!(data["cpu_load"].series[0].data.len(), 3);

        let leftovers: Vec<_> = std::fs::read_dir(archive.job_dir(&job()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_update_tags_rewrites_meta() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, _) = archive(dir.path());
        archive.archive_job(&job()).await.unwrap();

        let tags = vec![
            Tag {
                id: 1,
                tag_type: "Debug".to_string(),
                name: "Test".to_string(),
            },
            Tag {
                id: 2,
                tag_type: "Perf".to_string(),
                name: "memory-bound".to_string(),
            },
        ];
        archive.update_tags(&job(), &tags).await.unwrap();

        let meta = archive.load_meta(&job()).await.unwrap();
        assert_eq!(meta.tags, tags);
        assert!(meta.statistics.is_some(), "statistics survive the rewrite");
    }

    #[tokio::test]
    async fn test_update_tags_of_unarchived_job_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, _) = archive(dir.path());
        match archive.update_tags(&job(), &[]).await {
            Err(JobmonError::Archival(_)) => {}
            other => panic!("Expected Archival, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_archive_job_without_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, repo) = archive(dir.path());
        let mut other = job();
        other.cluster = "alex".to_string();

        assert!(matches!(
            archive.archive_job(&other).await,
            Err(JobmonError::Archival(_))
        ));
        assert_eq!(repo.calls.load(Ordering::SeqCst), 0);
        assert!(!archive.job_dir(&other).exists());
    }
}
