//! Job repository backed by the `job` table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::Database;
use crate::errors::{JobmonError, Result};
use crate::models::{
    Job, JobFilter, JobState, JobStatistics, MonitoringStatus, OrderBy, PageRequest, Resource,
};
use crate::storage::JobStore;

const JOB_COLUMNS: &str = "id, job_id, cluster, subcluster, start_time, hpc_user, project, \
     partition_name, array_job_id, duration, walltime, job_state, resources, num_nodes, \
     num_hwthreads, num_acc, smt, exclusive, monitoring_status, statistics";

pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let state: String = row.get("job_state")?;
    let state = state
        .parse::<JobState>()
        .map_err(|e| conversion_error(11, e))?;

    let resources: String = row.get("resources")?;
    let resources: Vec<Resource> =
        serde_json::from_str(&resources).map_err(|e| conversion_error(12, e))?;

    let monitoring_status: i32 = row.get("monitoring_status")?;
    let monitoring_status = MonitoringStatus::try_from(monitoring_status)
        .map_err(|e| conversion_error(18, JobmonError::Storage(e)))?;

    let statistics: Option<String> = row.get("statistics")?;
    let statistics = statistics
        .map(|s| serde_json::from_str::<JobStatistics>(&s))
        .transpose()
        .map_err(|e| conversion_error(19, e))?;

    Ok(Job {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        user: row.get("hpc_user")?,
        project: row.get("project")?,
        cluster: row.get("cluster")?,
        sub_cluster: row.get("subcluster")?,
        partition: row.get("partition_name")?,
        array_job_id: row.get("array_job_id")?,
        num_nodes: row.get("num_nodes")?,
        num_hwthreads: row.get("num_hwthreads")?,
        num_acc: row.get("num_acc")?,
        exclusive: row.get("exclusive")?,
        monitoring_status,
        smt: row.get("smt")?,
        state,
        start_time: row.get("start_time")?,
        duration: row.get("duration")?,
        walltime: row.get("walltime")?,
        resources,
        meta_data: BTreeMap::new(),
        tags: Vec::new(),
        statistics,
    })
}

/// WHERE clause and positional values for a natural-key lookup.
fn natural_key_clause(
    job_id: i64,
    cluster: Option<String>,
    start_time: Option<i64>,
) -> (String, Vec<Value>) {
    let mut conditions = vec!["job_id = ?1".to_string()];
    let mut values = vec![Value::Integer(job_id)];

    if let Some(cluster) = cluster {
        values.push(Value::Text(cluster));
        conditions.push(format!("cluster = ?{}", values.len()));
    }
    if let Some(start_time) = start_time {
        values.push(Value::Integer(start_time));
        conditions.push(format!("start_time = ?{}", values.len()));
    }

    (format!("WHERE {}", conditions.join(" AND ")), values)
}

fn filter_clause(filter: &JobFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if !filter.states.is_empty() {
        let mut placeholders = Vec::with_capacity(filter.states.len());
        for state in &filter.states {
            values.push(Value::Text(state.as_str().to_string()));
            placeholders.push(format!("?{}", values.len()));
        }
        conditions.push(format!("job_state IN ({})", placeholders.join(", ")));
    }
    if let Some(ref cluster) = filter.cluster {
        values.push(Value::Text(cluster.clone()));
        conditions.push(format!("cluster = ?{}", values.len()));
    }
    if let Some(ref user) = filter.user {
        values.push(Value::Text(user.clone()));
        conditions.push(format!("hpc_user = ?{}", values.len()));
    }
    if let Some(job_id) = filter.job_id {
        values.push(Value::Integer(job_id));
        conditions.push(format!("job_id = ?{}", values.len()));
    }
    if let Some(range) = filter.start_time {
        if let Some(from) = range.from {
            values.push(Value::Integer(from));
            conditions.push(format!("start_time >= ?{}", values.len()));
        }
        if let Some(to) = range.to {
            values.push(Value::Integer(to));
            conditions.push(format!("start_time <= ?{}", values.len()));
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, values)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Job>> {
        self.db
            .call(move |conn| {
                let sql = format!("SELECT {} FROM job WHERE id = ?1", JOB_COLUMNS);
                let job = conn.query_row(&sql, params![id], job_from_row).optional()?;
                Ok(job)
            })
            .await
    }

    async fn find(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Option<Job>> {
        let jobs = self.find_all(job_id, cluster, start_time).await?;
        Ok(jobs.into_iter().next())
    }

    async fn find_all(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Vec<Job>> {
        let cluster = cluster.map(str::to_string);
        self.db
            .call(move |conn| {
                let (where_clause, values) = natural_key_clause(job_id, cluster, start_time);
                let sql = format!(
                    "SELECT {} FROM job {} ORDER BY start_time DESC",
                    JOB_COLUMNS, where_clause
                );
                let mut stmt = conn.prepare(&sql)?;
                let jobs = stmt
                    .query_map(params_from_iter(values.iter()), job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    async fn start(&self, job: &Job) -> Result<i64> {
        let job = job.clone();
        let resources = serde_json::to_string(&job.resources)?;
        let meta_data = if job.meta_data.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&job.meta_data)?)
        };

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO job (job_id, cluster, subcluster, start_time, hpc_user, project,
                     partition_name, array_job_id, duration, walltime, job_state, meta_data,
                     resources, num_nodes, num_hwthreads, num_acc, smt, exclusive,
                     monitoring_status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19)",
                    params![
                        job.job_id,
                        job.cluster,
                        job.sub_cluster,
                        job.start_time,
                        job.user,
                        job.project,
                        job.partition,
                        job.array_job_id,
                        job.duration,
                        job.walltime,
                        job.state.as_str(),
                        meta_data,
                        resources,
                        job.num_nodes,
                        job.num_hwthreads,
                        job.num_acc,
                        job.smt,
                        job.exclusive,
                        i32::from(job.monitoring_status),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn stop(
        &self,
        id: i64,
        duration: i64,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()> {
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE job SET duration = ?2, job_state = ?3, monitoring_status = ?4
                     WHERE id = ?1 AND job_state = 'running'",
                    params![id, duration, state.as_str(), i32::from(monitoring_status)],
                )?;
                if updated == 0 {
                    return Err(JobmonError::InvalidTransition(format!(
                        "job {} is no longer running",
                        id
                    )));
                }
                Ok(())
            })
            .await
    }

    async fn update_monitoring_status(&self, id: i64, status: MonitoringStatus) -> Result<()> {
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE job SET monitoring_status = ?2 WHERE id = ?1",
                    params![id, i32::from(status)],
                )?;
                if updated == 0 {
                    tracing::debug!("monitoring status update for missing job {} ignored", id);
                }
                Ok(())
            })
            .await
    }

    async fn archive(
        &self,
        id: i64,
        status: MonitoringStatus,
        statistics: &JobStatistics,
    ) -> Result<()> {
        let statistics = serde_json::to_string(statistics)?;
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE job SET monitoring_status = ?2, statistics = ?3 WHERE id = ?1",
                    params![id, i32::from(status), statistics],
                )?;
                if updated == 0 {
                    tracing::debug!("archive update for missing job {} ignored", id);
                }
                Ok(())
            })
            .await
    }

    async fn delete_job_by_id(&self, id: i64) -> Result<()> {
        self.db
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM job WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    return Err(JobmonError::NotFound(format!("job with id {} not found", id)));
                }
                Ok(())
            })
            .await
    }

    async fn delete_jobs_before(&self, start_time: i64) -> Result<usize> {
        self.db
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM job WHERE start_time < ?1", params![start_time])?;
                Ok(deleted)
            })
            .await
    }

    async fn fetch_metadata(&self, id: i64) -> Result<BTreeMap<String, String>> {
        self.db
            .call(move |conn| {
                let meta: Option<Option<String>> = conn
                    .query_row(
                        "SELECT meta_data FROM job WHERE id = ?1",
                        params![id],
                        |r| r.get(0),
                    )
                    .optional()?;
                match meta {
                    None => Err(JobmonError::NotFound(format!("job with id {} not found", id))),
                    Some(None) => Ok(BTreeMap::new()),
                    Some(Some(text)) => Ok(serde_json::from_str(&text)?),
                }
            })
            .await
    }

    async fn query_jobs(
        &self,
        filter: &JobFilter,
        page: Option<PageRequest>,
        order: OrderBy,
    ) -> Result<Vec<Job>> {
        let (where_clause, mut values) = filter_clause(filter);
        self.db
            .call(move |conn| {
                let mut sql = format!(
                    "SELECT {} FROM job {} ORDER BY {}, id DESC",
                    JOB_COLUMNS,
                    where_clause,
                    order.to_sql()
                );
                if let Some(page) = page {
                    values.push(Value::Integer(page.items_per_page));
                    values.push(Value::Integer(page.offset()));
                    sql.push_str(&format!(
                        " LIMIT ?{} OFFSET ?{}",
                        values.len() - 1,
                        values.len()
                    ));
                }

                let mut stmt = conn.prepare(&sql)?;
                let jobs = stmt
                    .query_map(params_from_iter(values.iter()), job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    async fn stop_jobs_exceeding_walltime(&self, now: i64, grace_secs: i64) -> Result<usize> {
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE job SET job_state = 'failed', duration = ?1 - start_time,
                     monitoring_status = CASE WHEN monitoring_status = 0 THEN 0 ELSE 2 END
                     WHERE job_state = 'running' AND walltime > 0
                     AND (?1 - start_time) > (walltime + ?2)",
                    params![now, grace_secs],
                )?;
                Ok(updated)
            })
            .await
    }
}
