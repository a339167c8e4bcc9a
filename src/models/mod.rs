pub mod config;
pub mod filter;
pub mod job;
pub mod metrics;
pub mod tag;

pub use config::{ApiTokenConfig, ClusterConfig, MetricRepositoryConfig, ServerConfig};
pub use filter::{JobFilter, OrderBy, OrderField, PageRequest, SortDirection, TimeRange};
pub use job::{
    DeleteJobRequest, Job, JobState, MonitoringStatus, Resource, StartJobRequest, StopJobRequest,
};
pub use metrics::{JobData, JobMetric, JobMetricWithName, JobStatistics, MetricStatistics, Series};
pub use tag::{Tag, TagRequest};
