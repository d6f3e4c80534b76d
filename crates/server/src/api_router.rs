//! API Router
//!
//! Single point of entry for all routes, used by the binary and by tests.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::admin_api::admin_resources;
use crate::bootstrap::AppState;
use crate::dtos::{ConformanceDto, LandingPageDto, LinkDto};
use crate::job_api::{
    dismiss_job, get_job, get_job_logs, get_job_metadata, get_job_results, list_jobs,
};
use crate::process_api::{describe_process, execute_process, list_processes};

/// OGC API Processes conformance classes this server implements.
const CONFORMS_TO: &[&str] = &[
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/ogc-process-description",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/json",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/job-list",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/dismiss",
];

async fn landing_page(State(state): State<AppState>) -> Json<LandingPageDto> {
    let link = |href: &str, rel: &str, title: &str| LinkDto {
        href: href.to_string(),
        rel: Some(rel.to_string()),
        media_type: Some("application/json".to_string()),
        title: Some(title.to_string()),
    };
    Json(LandingPageDto {
        title: state.config.api_name.clone(),
        description:
            "SEPEX - Service for Encapsulated Processes Execution. An OGC API - Processes \
             compliant server for executing processes locally or on cloud at scale."
                .to_string(),
        links: vec![
            link("/", "self", "this document"),
            link("/conformance", "conformance", "conformance classes"),
            link("/processes", "processes", "registered processes"),
            link("/jobs", "jobs", "job list"),
        ],
    })
}

async fn conformance() -> Json<ConformanceDto> {
    Json(ConformanceDto {
        conforms_to: CONFORMS_TO.iter().map(|s| s.to_string()).collect(),
    })
}

pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/conformance", get(conformance))
        .route("/processes", get(list_processes))
        .route("/processes/:process_id", get(describe_process))
        .route(
            "/processes/:process_id/execution",
            axum::routing::post(execute_process),
        )
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job).delete(dismiss_job))
        .route("/jobs/:job_id/logs", get(get_job_logs))
        .route("/jobs/:job_id/results", get(get_job_results))
        .route("/jobs/:job_id/metadata", get(get_job_metadata))
        .route("/admin/resources", get(admin_resources))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
