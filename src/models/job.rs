use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::JobmonError;
use crate::models::config::ClusterConfig;
use crate::models::metrics::JobStatistics;
use crate::models::tag::{Tag, TagRequest};

/// Two starts of the same (jobId, cluster) closer than this are duplicates.
pub const DUPLICATE_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
    Stopped,
    Timeout,
    Preempted,
    OutOfMemory,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
        JobState::Stopped,
        JobState::Timeout,
        JobState::Preempted,
        JobState::OutOfMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Stopped => "stopped",
            JobState::Timeout => "timeout",
            JobState::Preempted => "preempted",
            JobState::OutOfMemory => "out_of_memory",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobmonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| JobmonError::Validation(format!("invalid job state: '{}'", s)))
    }
}

/// Whether and how the metric archive of a job was written.
///
/// Encoded as an integer on the wire and in the database:
/// `0` disabled, `1` running or archiving, `2` archiving failed,
/// `3` archiving successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MonitoringStatus {
    Disabled,
    RunningOrArchiving,
    ArchivingFailed,
    ArchivingSuccessful,
}

impl MonitoringStatus {
    /// The transition table. `Disabled` and both archiving outcomes are
    /// sinks; staying in the current status is always allowed.
    pub fn can_transition_to(self, next: MonitoringStatus) -> bool {
        use MonitoringStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (RunningOrArchiving, ArchivingSuccessful) | (RunningOrArchiving, ArchivingFailed)
        )
    }

    pub fn transition(self, next: MonitoringStatus) -> Result<MonitoringStatus, JobmonError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JobmonError::InvalidTransition(format!(
                "monitoring status cannot move from {} to {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for MonitoringStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitoringStatus::Disabled => "disabled",
            MonitoringStatus::RunningOrArchiving => "running_or_archiving",
            MonitoringStatus::ArchivingFailed => "archiving_failed",
            MonitoringStatus::ArchivingSuccessful => "archiving_successful",
        };
        f.write_str(s)
    }
}

impl From<MonitoringStatus> for i32 {
    fn from(status: MonitoringStatus) -> i32 {
        match status {
            MonitoringStatus::Disabled => 0,
            MonitoringStatus::RunningOrArchiving => 1,
            MonitoringStatus::ArchivingFailed => 2,
            MonitoringStatus::ArchivingSuccessful => 3,
        }
    }
}

impl TryFrom<i32> for MonitoringStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MonitoringStatus::Disabled),
            1 => Ok(MonitoringStatus::RunningOrArchiving),
            2 => Ok(MonitoringStatus::ArchivingFailed),
            3 => Ok(MonitoringStatus::ArchivingSuccessful),
            other => Err(format!("invalid monitoring status: {}", other)),
        }
    }
}

/// One node allocated to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Resource {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwthreads: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub job_id: i64,
    pub user: String,
    pub project: String,
    pub cluster: String,
    pub sub_cluster: String,
    pub partition: String,
    pub array_job_id: i64,
    pub num_nodes: i32,
    pub num_hwthreads: i32,
    pub num_acc: i32,
    pub exclusive: i32,
    pub monitoring_status: MonitoringStatus,
    pub smt: i32,
    #[serde(rename = "jobState")]
    pub state: JobState,
    pub start_time: i64,
    pub duration: i64,
    pub walltime: i64,
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta_data: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<JobStatistics>,
}

/// Body of a start request. Unset fields take the documented defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartJobRequest {
    pub job_id: i64,
    pub user: String,
    #[serde(default)]
    pub project: String,
    pub cluster: String,
    #[serde(default)]
    pub sub_cluster: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub array_job_id: i64,
    pub num_nodes: i32,
    #[serde(default)]
    pub num_hwthreads: i32,
    #[serde(default)]
    pub num_acc: i32,
    #[serde(default = "default_exclusive")]
    pub exclusive: i32,
    #[serde(default)]
    pub monitoring_status: Option<MonitoringStatus>,
    #[serde(default = "default_smt")]
    pub smt: i32,
    #[serde(default, rename = "jobState")]
    pub state: Option<JobState>,
    pub start_time: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub walltime: i64,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub meta_data: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<TagRequest>,
}

fn default_exclusive() -> i32 {
    1
}

fn default_smt() -> i32 {
    1
}

impl StartJobRequest {
    /// Build the row to insert. `disable_archive` forces monitoring off.
    pub fn to_job(&self, disable_archive: bool) -> Job {
        let monitoring_status = if disable_archive {
            MonitoringStatus::Disabled
        } else {
            self.monitoring_status
                .unwrap_or(MonitoringStatus::RunningOrArchiving)
        };

        Job {
            id: 0,
            job_id: self.job_id,
            user: self.user.clone(),
            project: self.project.clone(),
            cluster: self.cluster.clone(),
            sub_cluster: self.sub_cluster.clone(),
            partition: self.partition.clone(),
            array_job_id: self.array_job_id,
            num_nodes: self.num_nodes,
            num_hwthreads: self.num_hwthreads,
            num_acc: self.num_acc,
            exclusive: self.exclusive,
            monitoring_status,
            smt: self.smt,
            state: self.state.unwrap_or(JobState::Running),
            start_time: self.start_time,
            duration: self.duration,
            walltime: self.walltime,
            resources: self.resources.clone(),
            meta_data: self.meta_data.clone(),
            tags: Vec::new(),
            statistics: None,
        }
    }
}

/// Body of a stop request. Addressing fields are only read when the
/// job is not named by database id in the path.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StopJobRequest {
    pub stop_time: i64,
    #[serde(default, rename = "jobState")]
    pub state: Option<JobState>,
    #[serde(default)]
    pub job_id: Option<i64>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteJobRequest {
    #[serde(default)]
    pub job_id: Option<i64>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
}

/// Sanity checks on a start request. Nothing here touches storage.
///
/// When `clusters` is empty every cluster is accepted.
pub fn validate_start_request(
    req: &StartJobRequest,
    clusters: &[ClusterConfig],
) -> Result<(), JobmonError> {
    if req.job_id <= 0 {
        return Err(JobmonError::Validation("jobId must be positive".to_string()));
    }
    if req.user.trim().is_empty() {
        return Err(JobmonError::Validation("user cannot be empty".to_string()));
    }
    if req.cluster.trim().is_empty() {
        return Err(JobmonError::Validation("cluster cannot be empty".to_string()));
    }
    if req.start_time <= 0 {
        return Err(JobmonError::Validation(
            "startTime must be a positive unix timestamp".to_string(),
        ));
    }
    if req.num_nodes <= 0 {
        return Err(JobmonError::Validation("numNodes must be positive".to_string()));
    }
    if req.num_hwthreads < 0 || req.num_acc < 0 {
        return Err(JobmonError::Validation(
            "numHwthreads and numAcc cannot be negative".to_string(),
        ));
    }
    if req.resources.is_empty() {
        return Err(JobmonError::Validation("resources cannot be empty".to_string()));
    }
    if req.resources.len() != req.num_nodes as usize {
        return Err(JobmonError::Validation(format!(
            "numNodes is {} but {} resources were given",
            req.num_nodes,
            req.resources.len()
        )));
    }
    if let Some(resource) = req.resources.iter().find(|r| r.hostname.trim().is_empty()) {
        return Err(JobmonError::Validation(format!(
            "resource hostname cannot be empty: {:?}",
            resource
        )));
    }
    if !(0..=2).contains(&req.exclusive) {
        return Err(JobmonError::Validation(format!(
            "exclusive must be 0, 1 or 2, got {}",
            req.exclusive
        )));
    }
    if !(0..=1).contains(&req.smt) {
        return Err(JobmonError::Validation(format!(
            "smt must be 0 or 1, got {}",
            req.smt
        )));
    }
    if let Some(state) = req.state {
        if state != JobState::Running {
            return Err(JobmonError::Validation(format!(
                "a new job must be running, got '{}'",
                state
            )));
        }
    }
    if let Some(status) = req.monitoring_status {
        if !matches!(
            status,
            MonitoringStatus::Disabled | MonitoringStatus::RunningOrArchiving
        ) {
            return Err(JobmonError::Validation(format!(
                "a new job cannot start with monitoring status {}",
                status
            )));
        }
    }
    if req.duration != 0 {
        return Err(JobmonError::Validation(
            "duration must be 0 for a running job".to_string(),
        ));
    }
    if req.walltime < 0 {
        return Err(JobmonError::Validation("walltime cannot be negative".to_string()));
    }
    for tag in &req.tags {
        tag.validate()?;
    }

    if !clusters.is_empty() {
        let cluster = clusters
            .iter()
            .find(|c| c.name == req.cluster)
            .ok_or_else(|| {
                JobmonError::Validation(format!("unknown cluster: '{}'", req.cluster))
            })?;
        if !cluster.partitions.is_empty()
            && !req.partition.is_empty()
            && !cluster.partitions.contains(&req.partition)
        {
            return Err(JobmonError::Validation(format!(
                "unknown partition '{}' for cluster '{}'",
                req.partition, req.cluster
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_json() -> serde_json::Value {
        serde_json::json!({
            "jobId": 123000,
            "user": "alice",
            "cluster": "fritz",
            "numNodes": 1,
            "startTime": 1649723812,
            "resources": [{"hostname": "f0101"}]
        })
    }

    fn start_request() -> StartJobRequest {
        serde_json::from_value(start_json()).expect("deserialize")
    }

    #[test]
    fn test_start_request_defaults() {
        let req = start_request();
        assert_eq!(req.exclusive, 1);
        assert_eq!(req.smt, 1);
        assert!(req.state.is_none());
        assert!(req.tags.is_empty());

        let job = req.to_job(false);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.monitoring_status, MonitoringStatus::RunningOrArchiving);
        assert_eq!(job.duration, 0);
    }

    #[test]
    fn test_disable_archive_forces_monitoring_off() {
        let job = start_request().to_job(true);
        assert_eq!(job.monitoring_status, MonitoringStatus::Disabled);
    }

    #[test]
    fn test_start_request_rejects_unknown_fields() {
        let mut json = start_json();
        json["bogus"] = serde_json::json!(1);
        assert!(serde_json::from_value::<StartJobRequest>(json).is_err());
    }

    #[test]
    fn test_start_request_missing_cluster_fails_to_parse() {
        let mut json = start_json();
        json.as_object_mut().unwrap().remove("cluster");
        assert!(serde_json::from_value::<StartJobRequest>(json).is_err());
    }

    #[test]
    fn test_validate_accepts_minimal_request() {
        assert!(validate_start_request(&start_request(), &[]).is_ok());
    }

    #[test]
    fn test_validate_rejects_resource_count_mismatch() {
        let mut req = start_request();
        req.num_nodes = 2;
        match validate_start_request(&req, &[]) {
            Err(JobmonError::Validation(msg)) => assert!(msg.contains("resources")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_negative_counts() {
        let mut req = start_request();
        req.num_acc = -1;
        assert!(validate_start_request(&req, &[]).is_err());
    }

    #[test]
    fn test_validate_rejects_non_running_state() {
        let mut req = start_request();
        req.state = Some(JobState::Completed);
        assert!(validate_start_request(&req, &[]).is_err());
    }

    #[test]
    fn test_validate_rejects_archiving_outcome_as_initial_status() {
        for status in [
            MonitoringStatus::ArchivingFailed,
            MonitoringStatus::ArchivingSuccessful,
        ] {
            let mut req = start_request();
            req.monitoring_status = Some(status);
            match validate_start_request(&req, &[]) {
                Err(JobmonError::Validation(msg)) => assert!(msg.contains("monitoring status")),
                other => panic!("Expected Validation for {}, got: {:?}", status, other),
            }
        }

        for status in [MonitoringStatus::Disabled, MonitoringStatus::RunningOrArchiving] {
            let mut req = start_request();
            req.monitoring_status = Some(status);
            assert!(validate_start_request(&req, &[]).is_ok(), "{}", status);
        }
    }

    #[test]
    fn test_validate_rejects_nonzero_duration() {
        let mut req = start_request();
        req.duration = 10;
        assert!(validate_start_request(&req, &[]).is_err());
    }

    #[test]
    fn test_validate_checks_known_clusters_and_partitions() {
        let clusters = vec![ClusterConfig {
            name: "fritz".to_string(),
            partitions: vec!["singlenode".to_string()],
            metric_data_repository: None,
        }];

        let mut req = start_request();
        req.partition = "singlenode".to_string();
        assert!(validate_start_request(&req, &clusters).is_ok());

        req.partition = "gpu".to_string();
        assert!(validate_start_request(&req, &clusters).is_err());

        req.partition = String::new();
        req.cluster = "alex".to_string();
        match validate_start_request(&req, &clusters) {
            Err(JobmonError::Validation(msg)) => assert!(msg.contains("unknown cluster")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_job_state_parse_and_display() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("exploded".parse::<JobState>().is_err());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::OutOfMemory.is_terminal());
    }

    #[test]
    fn test_job_state_serde_names() {
        let json = serde_json::to_string(&JobState::OutOfMemory).unwrap();
        assert_eq!(json, "\"out_of_memory\"");
    }

    #[test]
    fn test_monitoring_status_wire_encoding() {
        let json = serde_json::to_string(&MonitoringStatus::ArchivingSuccessful).unwrap();
        assert_eq!(json, "3");
        let parsed: MonitoringStatus = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, MonitoringStatus::Disabled);
        assert!(serde_json::from_str::<MonitoringStatus>("7").is_err());
    }

    #[test]
    fn test_monitoring_status_transition_table() {
        use MonitoringStatus::*;
        assert!(RunningOrArchiving.can_transition_to(ArchivingSuccessful));
        assert!(RunningOrArchiving.can_transition_to(ArchivingFailed));
        assert!(RunningOrArchiving.can_transition_to(RunningOrArchiving));

        assert!(!Disabled.can_transition_to(RunningOrArchiving));
        assert!(!Disabled.can_transition_to(ArchivingFailed));
        assert!(!ArchivingSuccessful.can_transition_to(RunningOrArchiving));
        assert!(!ArchivingFailed.can_transition_to(ArchivingSuccessful));

        match Disabled.transition(ArchivingSuccessful) {
            Err(JobmonError::InvalidTransition(msg)) => assert!(msg.contains("disabled")),
            other => panic!("Expected InvalidTransition, got: {:?}", other),
        }
    }

    #[test]
    fn test_stop_request_parses_camel_case() {
        let req: StopJobRequest = serde_json::from_str(
            r#"{"stopTime": 1649727412, "jobState": "completed", "jobId": 123000, "cluster": "fritz"}"#,
        )
        .unwrap();
        assert_eq!(req.stop_time, 1649727412);
        assert_eq!(req.state, Some(JobState::Completed));
        assert_eq!(req.job_id, Some(123000));
        assert!(req.start_time.is_none());
    }

    #[test]
    fn test_stop_request_rejects_unknown_state() {
        let result = serde_json::from_str::<StopJobRequest>(
            r#"{"stopTime": 1649727412, "jobState": "exploded"}"#,
        );
        assert!(result.is_err());
    }
}
