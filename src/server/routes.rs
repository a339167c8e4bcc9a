use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::AppState;
use crate::coordinator::StopTarget;
use crate::errors::JobmonError;
use crate::models::{
    DeleteJobRequest, Job, JobMetricWithName, JobState, PageRequest, StartJobRequest,
    StopJobRequest, Tag, TagRequest, TimeRange,
};
use crate::resolver::JobQuery;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

/// JSON error body `{status, error}` with the given status code.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        status: status.canonical_reason().unwrap_or("Unknown").to_string(),
        error: message.into(),
    };
    (status, Json(body)).into_response()
}

/// Status code of a domain error. `not_found` differs between endpoints.
fn status_for(err: &JobmonError, not_found: StatusCode) -> StatusCode {
    match err {
        JobmonError::Validation(_) | JobmonError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
        JobmonError::DuplicateJob { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        JobmonError::NotFound(_) => not_found,
        JobmonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        JobmonError::Forbidden(_) => StatusCode::FORBIDDEN,
        JobmonError::Storage(_) | JobmonError::PartialStart { .. } | JobmonError::Archival(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn handle_error(err: JobmonError, not_found: StatusCode) -> Response {
    let status = status_for(&err, not_found);
    tracing::warn!("{} {}", status.as_u16(), err);
    error_response(status, err.to_string())
}

fn bad_request(message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!("400 {}", message);
    error_response(StatusCode::BAD_REQUEST, message)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|e| bad_request(format!("parsing request body failed: {}", e)))
}

fn parse_id(raw: &str) -> Result<i64, Response> {
    raw.parse::<i64>()
        .map_err(|_| bad_request(format!("invalid id: '{}'", raw)))
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub msg: String,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetricsData {
    pub job_metrics: Vec<JobMetricWithName>,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Body of the metrics endpoint: either `data` or `error` is set.
#[derive(Debug, Serialize)]
pub struct JobMetricsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JobMetricsData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMessage>,
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// POST|PUT /api/jobs/start_job/
pub async fn start_job(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: StartJobRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state.coordinator.start_job(req).await {
        Ok(id) => (StatusCode::CREATED, Json(StartJobResponse { id })).into_response(),
        Err(e) => handle_error(e, StatusCode::UNPROCESSABLE_ENTITY),
    }
}

/// POST|PUT /api/jobs/stop_job/{id}
pub async fn stop_job_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    stop_job(&state, StopTarget::ById(id), &body).await
}

/// POST|PUT /api/jobs/stop_job/
pub async fn stop_job_by_request(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    stop_job(&state, StopTarget::ByRequest, &body).await
}

async fn stop_job(state: &AppState, target: StopTarget, body: &Bytes) -> Response {
    let req: StopJobRequest = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state.coordinator.stop_job(target, req).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => handle_error(e, StatusCode::UNPROCESSABLE_ENTITY),
    }
}

/// DELETE /api/jobs/delete_job/{id}
pub async fn delete_job_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.delete_job_by_id(id).await {
        Ok(()) => deleted_job(id),
        Err(e) => delete_failed(e),
    }
}

/// DELETE /api/jobs/delete_job/
pub async fn delete_job_by_request(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: DeleteJobRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state.coordinator.delete_job_by_request(&req).await {
        Ok(id) => deleted_job(id),
        Err(e) => delete_failed(e),
    }
}

/// DELETE /api/jobs/delete_job_before/{ts}
pub async fn delete_jobs_before(
    State(state): State<Arc<AppState>>,
    Path(ts): Path<String>,
) -> Response {
    let ts = match ts.parse::<i64>() {
        Ok(ts) => ts,
        Err(_) => return bad_request(format!("invalid timestamp: '{}'", ts)),
    };

    match state.coordinator.delete_jobs_before(ts).await {
        Ok(count) => (
            StatusCode::OK,
            Json(MessageResponse {
                msg: format!("Successfully deleted {} jobs", count),
            }),
        )
            .into_response(),
        Err(e) => delete_failed(e),
    }
}

fn deleted_job(id: i64) -> Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            msg: format!("Successfully deleted job {}", id),
        }),
    )
        .into_response()
}

/// Failed deletions are all reported as 422, bad input aside.
fn delete_failed(err: JobmonError) -> Response {
    match err {
        JobmonError::Validation(_) => handle_error(err, StatusCode::UNPROCESSABLE_ENTITY),
        other => {
            tracing::warn!("422 {}", other);
            error_response(StatusCode::UNPROCESSABLE_ENTITY, other.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// POST|PATCH /api/jobs/tag_job/{id}
pub async fn tag_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tags: Vec<TagRequest> = match parse_body(&body) {
        Ok(tags) => tags,
        Err(resp) => return resp,
    };

    match state.coordinator.add_tags(id, &tags).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => handle_error(e, StatusCode::NOT_FOUND),
    }
}

/// DELETE /api/jobs/tag_job/{id}
pub async fn untag_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tags: Vec<TagRequest> = match parse_body(&body) {
        Ok(tags) => tags,
        Err(resp) => return resp,
    };

    match state.coordinator.remove_tags(id, &tags).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => handle_error(e, StatusCode::NOT_FOUND),
    }
}

/// GET /api/tags/
pub async fn list_tags(State(state): State<Arc<AppState>>) -> Response {
    match state.resolver.tags().await {
        Ok(tags) => (StatusCode::OK, Json(TagsResponse { tags })).into_response(),
        Err(e) => handle_error(e, StatusCode::NOT_FOUND),
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn parse_positive(key: &str, value: &str) -> Result<i64, Response> {
    match value.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(bad_request(format!(
            "invalid value for '{}': '{}'",
            key, value
        ))),
    }
}

/// `start-time=<from>-<to>`, both unix timestamps.
fn parse_time_range(value: &str) -> Option<TimeRange> {
    let (from, to) = value.split_once('-')?;
    let from = from.trim().parse::<i64>().ok()?;
    let to = to.trim().parse::<i64>().ok()?;
    Some(TimeRange {
        from: Some(from),
        to: Some(to),
    })
}

fn parse_job_query(params: &[(String, String)]) -> Result<JobQuery, Response> {
    let mut query = JobQuery::default();
    let mut page = PageRequest::default();

    for (key, value) in params {
        match key.as_str() {
            "state" => {
                let state = value
                    .parse::<JobState>()
                    .map_err(|e| bad_request(e.to_string()))?;
                query.filter.states.push(state);
            }
            "cluster" => query.filter.cluster = Some(value.clone()),
            "start-time" => {
                let range = parse_time_range(value)
                    .ok_or_else(|| bad_request(format!("invalid time range: '{}'", value)))?;
                query.filter.start_time = Some(range);
            }
            "page" => page.page = parse_positive(key, value)?,
            "items-per-page" => page.items_per_page = parse_positive(key, value)?,
            "with-metadata" => {
                query.with_metadata = value
                    .parse::<bool>()
                    .map_err(|_| bad_request(format!("invalid value for '{}': '{}'", key, value)))?;
            }
            other => return Err(bad_request(format!("invalid query parameter: '{}'", other))),
        }
    }

    if page.checked_offset().is_none() {
        return Err(bad_request(format!(
            "page {} with {} items per page is out of range",
            page.page, page.items_per_page
        )));
    }
    query.page = Some(page);
    Ok(query)
}

/// GET /api/jobs/
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return bad_request(e.body_text()),
    };
    let query = match parse_job_query(&params) {
        Ok(query) => query,
        Err(resp) => return resp,
    };

    match state.resolver.jobs(&query).await {
        Ok(jobs) => (StatusCode::OK, Json(JobsResponse { jobs })).into_response(),
        Err(e) => handle_error(e, StatusCode::NOT_FOUND),
    }
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.resolver.job(id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => handle_error(e, StatusCode::NOT_FOUND),
    }
}

/// GET /api/jobs/metrics/{id}?metric=..
///
/// Loading failures are reported in the body as `{error: {message}}`.
pub async fn job_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return bad_request(e.body_text()),
    };

    let mut metrics = Vec::new();
    for (key, value) in params {
        if key != "metric" {
            return bad_request(format!("invalid query parameter: '{}'", key));
        }
        metrics.push(value);
    }
    let metrics = (!metrics.is_empty()).then_some(metrics.as_slice());

    let body = match state.resolver.job_metrics(id, metrics).await {
        Ok(job_metrics) => JobMetricsResponse {
            data: Some(JobMetricsData { job_metrics }),
            error: None,
        },
        Err(e) => {
            tracing::warn!("loading metrics of job {} failed: {}", id, e);
            JobMetricsResponse {
                data: None,
                error: Some(ErrorMessage {
                    message: e.to_string(),
                }),
            }
        }
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_job_query_defaults() {
        let query = parse_job_query(&[]).unwrap();
        assert!(query.filter.states.is_empty());
        assert_eq!(query.page, Some(PageRequest::default()));
        assert!(!query.with_metadata);
    }

    #[test]
    fn test_parse_job_query_all_params() {
        let query = parse_job_query(&params(&[
            ("state", "completed"),
            ("state", "failed"),
            ("cluster", "fritz"),
            ("start-time", "1649723800-1649723900"),
            ("page", "3"),
            ("items-per-page", "10"),
            ("with-metadata", "true"),
        ]))
        .unwrap();

        assert_eq!(
            query.filter.states,
            vec![JobState::Completed, JobState::Failed]
        );
        assert_eq!(query.filter.cluster.as_deref(), Some("fritz"));
        assert_eq!(
            query.filter.start_time,
            Some(TimeRange {
                from: Some(1649723800),
                to: Some(1649723900)
            })
        );
        assert_eq!(
            query.page,
            Some(PageRequest {
                items_per_page: 10,
                page: 3
            })
        );
        assert!(query.with_metadata);
    }

    #[test]
    fn test_parse_job_query_rejects_bad_input() {
        for bad in [
            ("bogus", "1"),
            ("state", "exploded"),
            ("start-time", "yesterday"),
            ("page", "0"),
            ("items-per-page", "-5"),
            ("with-metadata", "maybe"),
        ] {
            let result = parse_job_query(&params(&[bad]));
            match result {
                Err(resp) => assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{:?}", bad),
                Ok(_) => panic!("Expected 400 for {:?}", bad),
            }
        }

        let huge = params(&[
            ("page", "1000000000000"),
            ("items-per-page", "1000000000000"),
        ]);
        match parse_job_query(&huge) {
            Err(resp) => assert_eq!(resp.status(), StatusCode::BAD_REQUEST),
            Ok(_) => panic!("Expected 400 for an offset that overflows"),
        }
    }

    #[test]
    fn test_status_mapping() {
        let nf = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(
            status_for(&JobmonError::Validation("x".into()), nf),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&JobmonError::DuplicateJob { id: 1 }, nf),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&JobmonError::NotFound("x".into()), StatusCode::NOT_FOUND),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&JobmonError::InvalidTransition("x".into()), nf),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(
                &JobmonError::PartialStart {
                    id: 1,
                    source: Box::new(JobmonError::Storage("x".into()))
                },
                nf
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&JobmonError::Forbidden("x".into()), nf),
            StatusCode::FORBIDDEN
        );
    }
}
