//! Periodic enforcement of job walltimes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::coordinator::JobCoordinator;

/// Every `interval`, fail running jobs that exceeded their walltime by more
/// than `grace_secs`. Stops when `shutdown` fires.
pub fn spawn(
    coordinator: Arc<JobCoordinator>,
    grace_secs: i64,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = coordinator.stop_jobs_exceeding_walltime(grace_secs).await {
                        tracing::error!("Walltime check failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("Walltime checker stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use crate::archive::MetricArchiver;
    use crate::coordinator::CoordinatorSettings;
    use crate::errors::Result;
    use crate::models::{Job, JobData, JobState, JobStatistics, MonitoringStatus, Resource, Tag};
    use crate::storage::sqlite::{Database, SqliteJobStore, SqliteTagStore};
    use crate::storage::JobStore;

    struct NullArchiver;

    #[async_trait]
    impl MetricArchiver for NullArchiver {
        async fn archive_job(&self, _job: &Job) -> Result<JobStatistics> {
            Ok(JobStatistics::new())
        }
        async fn update_tags(&self, _job: &Job, _tags: &[Tag]) -> Result<()> {
            Ok(())
        }
        async fn load_job_data(&self, _job: &Job) -> Result<JobData> {
            Ok(JobData::new())
        }
    }

    #[tokio::test]
    async fn test_checker_fails_overdue_jobs_and_stops_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let jobs = Arc::new(SqliteJobStore::new(db.clone()));
        let coordinator = Arc::new(JobCoordinator::new(
            jobs.clone(),
            Arc::new(SqliteTagStore::new(db)),
            Arc::new(NullArchiver),
            CoordinatorSettings::default(),
        ));

        let now = chrono::Utc::now().timestamp();
        let id = jobs
            .start(&Job {
                id: 0,
                job_id: 1,
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
                state: JobState::Running,
                start_time: now - 7200,
                duration: 0,
                walltime: 60,
                resources: vec![Resource {
                    hostname: "f0101".to_string(),
                    hwthreads: None,
                    accelerators: None,
                    configuration: None,
                }],
                meta_data: BTreeMap::new(),
                tags: Vec::new(),
                statistics: None,
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(());
        let handle = spawn(coordinator, 10, Duration::from_millis(10), rx);

        let mut failed = false;
        for _ in 0..100 {
            let job = jobs.find_by_id(id).await.unwrap().unwrap();
            if job.state == JobState::Failed {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed, "overdue job should be marked failed");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("checker stops on shutdown")
            .unwrap();
    }
}
