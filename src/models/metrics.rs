use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Time series of one metric on one host (or one hardware thread /
/// accelerator when `id` is set). Missing samples are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetric {
    pub unit: String,
    pub timestep: i64,
    pub series: Vec<Series>,
}

/// Metric name to time series, as delivered by a metric data repository
/// and stored as `data.json` in the archive.
pub type JobData = BTreeMap<String, JobMetric>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    pub unit: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

pub type JobStatistics = BTreeMap<String, MetricStatistics>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMetricWithName {
    pub name: String,
    pub metric: JobMetric,
}

/// Summarise every metric: the average of the per-series averages and the
/// extremes across all series. Metrics without a single sample are skipped.
pub fn compute_statistics(data: &JobData) -> JobStatistics {
    let mut statistics = JobStatistics::new();

    for (name, metric) in data {
        let mut avgs = Vec::with_capacity(metric.series.len());
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for series in &metric.series {
            let samples: Vec<f64> = series
                .data
                .iter()
                .flatten()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            if samples.is_empty() {
                continue;
            }
            let sum: f64 = samples.iter().sum();
            avgs.push(sum / samples.len() as f64);
            min = samples.iter().copied().fold(min, f64::min);
            max = samples.iter().copied().fold(max, f64::max);
        }

        if avgs.is_empty() {
            continue;
        }

        statistics.insert(
            name.clone(),
            MetricStatistics {
                unit: metric.unit.clone(),
                avg: avgs.iter().sum::<f64>() / avgs.len() as f64,
                min,
                max,
            },
        );
    }

    statistics
}
