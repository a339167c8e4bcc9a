use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::errors::JobmonError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// SQLite database file. Defaults to `{data_dir}/job.db`.
    #[serde(default)]
    pub db: Option<PathBuf>,
    /// Root of the file based job archive. Defaults to `{data_dir}/job-archive`.
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// Keep metric data in the metric repositories only; new jobs start
    /// with monitoring disabled.
    #[serde(default)]
    pub disable_archive: bool,
    #[serde(default)]
    pub disable_authentication: bool,
    /// Static API tokens mapped to the requester they authenticate.
    #[serde(default)]
    pub api_tokens: HashMap<String, ApiTokenConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// If not zero, running jobs exceeding their walltime by this many
    /// seconds are marked as failed.
    #[serde(default)]
    pub stop_jobs_exceeding_walltime: u64,
    #[serde(default = "default_walltime_check_interval_secs")]
    pub walltime_check_interval_secs: u64,
    #[serde(default = "default_archive_drain_timeout_secs")]
    pub archive_drain_timeout_secs: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTokenConfig {
    pub username: String,
    #[serde(default = "default_token_roles")]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub partitions: Vec<String>,
    #[serde(default)]
    pub metric_data_repository: Option<MetricRepositoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRepositoryConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_walltime_check_interval_secs() -> u64 {
    300
}

fn default_archive_drain_timeout_secs() -> u64 {
    60
}

fn default_token_roles() -> Vec<Role> {
    vec![Role::Api]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            db: None,
            archive_dir: None,
            disable_archive: false,
            disable_authentication: false,
            api_tokens: HashMap::new(),
            clusters: Vec::new(),
            stop_jobs_exceeding_walltime: 0,
            walltime_check_interval_secs: default_walltime_check_interval_secs(),
            archive_drain_timeout_secs: default_archive_drain_timeout_secs(),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        self.db.clone().unwrap_or_else(|| data_dir.join("job.db"))
    }

    pub fn archive_path(&self, data_dir: &Path) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("job-archive"))
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Walltime grace in seconds as used in timestamp arithmetic.
    pub fn walltime_grace_secs(&self) -> Result<i64, JobmonError> {
        i64::try_from(self.stop_jobs_exceeding_walltime).map_err(|_| {
            JobmonError::Validation(format!(
                "stop_jobs_exceeding_walltime is out of range: {}",
                self.stop_jobs_exceeding_walltime
            ))
        })
    }
}
