use async_trait::async_trait;

use super::{filter_metrics, MetricDataRepository};
use crate::errors::{JobmonError, Result};
use crate::models::{Job, JobData, MetricRepositoryConfig};

/// Metric store reached over HTTP:
/// `GET {url}/api/jobs/{cluster}/{jobId}?from=..&to=..[&metric=..]`.
pub struct HttpMetricDataRepository {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpMetricDataRepository {
    pub fn new(client: reqwest::Client, config: &MetricRepositoryConfig) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl MetricDataRepository for HttpMetricDataRepository {
    async fn load_data(&self, job: &Job, metrics: Option<&[String]>) -> Result<JobData> {
        // running jobs have no duration yet
        let to = if job.duration > 0 {
            job.start_time + job.duration
        } else {
            chrono::Utc::now().timestamp()
        };

        let mut query = vec![
            ("from", job.start_time.to_string()),
            ("to", to.to_string()),
        ];
        for metric in metrics.unwrap_or_default() {
            query.push(("metric", metric.clone()));
        }

        let url = format!("{}/api/jobs/{}/{}", self.url, job.cluster, job.job_id);
        let mut request = self.client.get(&url).query(&query);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobmonError::Archival(format!(
                "metric data repository returned {} for job {} on {}",
                status, job.job_id, job.cluster
            )));
        }

        let data: JobData = response.json().await?;
        Ok(filter_metrics(data, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};

    use crate::models::{JobMetric, JobState, MonitoringStatus, Series};

    async fn metrics_handler(
        Path((cluster, job_id)): Path<(String, i64)>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> std::result::Result<Json<JobData>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if cluster != "fritz" || job_id != 123000 {
            return Err(StatusCode::NOT_FOUND);
        }
        assert_eq!(params.get("from").map(String::as_str), Some("1000"));
        assert_eq!(params.get("to").map(String::as_str), Some("4600"));

        let metric = JobMetric {
            unit: "GB/s".to_string(),
            timestep: 60,
            series: vec![Series {
                hostname: "f0101".to_string(),
                id: None,
                data: vec![Some(1.5)],
            }],
        };
        Ok(Json(JobData::from([
            ("mem_bw".to_string(), metric.clone()),
            ("flops_any".to_string(), metric),
        ])))
    }

    async fn serve() -> String {
        let app = Router::new().route("/api/jobs/{cluster}/{job_id}", get(metrics_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn job(job_id: i64) -> Job {
        Job {
            id: 1,
            job_id,
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
            start_time: 1000,
            duration: 3600,
            walltime: 0,
            resources: Vec::new(),
            meta_data: BTreeMap::new(),
            tags: Vec::new(),
            statistics: None,
        }
    }

    fn repo(url: String, token: Option<&str>) -> HttpMetricDataRepository {
        HttpMetricDataRepository::new(
            reqwest::Client::new(),
            &MetricRepositoryConfig {
                url,
                token: token.map(str::to_string),
            },
        )
    }

    #[tokio::test]
    async fn test_load_data_with_token_and_filter() {
        let url = serve().await;
        let repo = repo(url, Some("secret"));

        let all = repo.load_data(&job(123000), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let names = vec!["mem_bw".to_string()];
        let some = repo.load_data(&job(123000), Some(&names)).await.unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some["mem_bw"].series[0].data, vec![Some(1.5)]);
    }

    #[tokio::test]
    async fn test_error_status_is_archival_error() {
        let url = serve().await;

        match repo(url.clone(), None).load_data(&job(123000), None).await {
            Err(JobmonError::Archival(msg)) => assert!(msg.contains("401")),
            other => panic!("Expected Archival, got: {:?}", other),
        }
        match repo(url, Some("secret")).load_data(&job(1), None).await {
            Err(JobmonError::Archival(msg)) => assert!(msg.contains("404")),
            other => panic!("Expected Archival, got: {:?}", other),
        }
    }
}
