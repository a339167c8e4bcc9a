pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_token, Authenticator, Role};
use crate::coordinator::JobCoordinator;
use crate::models::ServerConfig;
use crate::resolver::JobResolver;

/// Shared application state for the Axum server.
pub struct AppState {
    pub coordinator: Arc<JobCoordinator>,
    pub resolver: Arc<JobResolver>,
    /// `None` disables authentication.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/jobs/", get(routes::list_jobs))
        .route(
            "/jobs/start_job/",
            post(routes::start_job).put(routes::start_job),
        )
        .route(
            "/jobs/stop_job/",
            post(routes::stop_job_by_request).put(routes::stop_job_by_request),
        )
        .route(
            "/jobs/stop_job/{id}",
            post(routes::stop_job_by_id).put(routes::stop_job_by_id),
        )
        .route("/jobs/delete_job/", delete(routes::delete_job_by_request))
        .route("/jobs/delete_job/{id}", delete(routes::delete_job_by_id))
        .route(
            "/jobs/delete_job_before/{ts}",
            delete(routes::delete_jobs_before),
        )
        .route(
            "/jobs/tag_job/{id}",
            post(routes::tag_job)
                .patch(routes::tag_job)
                .delete(routes::untag_job),
        )
        .route("/jobs/metrics/{id}", get(routes::job_metrics))
        .route("/jobs/{id}", get(routes::get_job))
        .route("/tags/", get(routes::list_tags))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_role,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Only requesters holding the `api` role may use the REST API.
async fn require_api_role(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(ref authenticator) = state.authenticator else {
        return next.run(req).await;
    };

    let requester = extract_token(req.headers()).and_then(|t| authenticator.authenticate(t));
    let Some(requester) = requester else {
        tracing::warn!("401 {} {}: unknown or missing token", req.method(), req.uri());
        return routes::error_response(StatusCode::UNAUTHORIZED, "unknown or missing token");
    };
    if !requester.has_role(Role::Api) {
        tracing::warn!(
            "403 {} {}: user '{}' lacks the api role",
            req.method(),
            req.uri(),
            requester.username
        );
        return routes::error_response(StatusCode::FORBIDDEN, "missing role");
    }

    tracing::debug!("{} {} by '{}'", req.method(), req.uri(), requester.username);
    req.extensions_mut().insert(requester);
    next.run(req).await
}
