//! REST API for job submission and cluster inspection.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobState, JobType};
use crate::scheduler::{ClusterStatus, Handler};

/// Shared, mutex-guarded handle to the authoritative scheduler state.
pub struct AppState {
    pub handler: Mutex<Handler>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/{job_id}", get(get_job))
        .route("/api/v1/resources/free", post(free_resources))
        .route("/api/v1/cluster/status", get(cluster_status))
        .route("/health", get(health_check))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: i32,
    pub job_type: JobType,
    pub k: u32,
    #[serde(default)]
    pub priority: i32,
    pub duration_fast: f64,
    pub duration_slow: f64,
}

#[derive(Debug, Deserialize)]
pub struct FreeResourcesRequest {
    pub machine_ids: BTreeSet<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: i32,
    pub job_type: JobType,
    pub k: u32,
    pub state: String,
    pub preferred: bool,
    pub assigned: BTreeSet<u32>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn job_to_response(job: &Job) -> JobResponse {
    JobResponse {
        job_id: job.job_id,
        job_type: job.job_type,
        k: job.k,
        state: match job.state() {
            JobState::Pending => "pending".to_string(),
            JobState::Running => "running".to_string(),
        },
        preferred: job.preferred,
        assigned: job.assigned.clone(),
    }
}

async fn submit_job(State(state): State<Arc<AppState>>, Json(request): Json<SubmitJobRequest>) -> impl IntoResponse {
    let mut handler = state.handler.lock();
    let now = chrono::Utc::now();
    match handler.add_job(
        request.job_id,
        request.job_type,
        request.k,
        request.priority,
        request.duration_fast,
        request.duration_slow,
        now,
    ) {
        Ok(()) => {
            let job = handler.job(request.job_id).expect("just added");
            (StatusCode::ACCEPTED, Json(job_to_response(job)).into_response())
        }
        Err(e) => (StatusCode::CONFLICT, Json(ErrorResponse { error: e.to_string() }).into_response()),
    }
}

async fn get_job(State(state): State<Arc<AppState>>, Path(job_id): Path<i32>) -> impl IntoResponse {
    let handler = state.handler.lock();
    match handler.job(job_id) {
        Some(job) => (StatusCode::OK, Json(job_to_response(job)).into_response()),
        None => (StatusCode::NOT_FOUND, Json(ErrorResponse { error: format!("job {job_id} not found") }).into_response()),
    }
}

async fn free_resources(State(state): State<Arc<AppState>>, Json(request): Json<FreeResourcesRequest>) -> impl IntoResponse {
    let mut handler = state.handler.lock();
    let now = chrono::Utc::now();
    let ids: Vec<u32> = request.machine_ids.into_iter().collect();
    handler.free_resources(&ids, now);
    StatusCode::OK
}

async fn cluster_status(State(state): State<Arc<AppState>>) -> Json<ClusterStatus> {
    let handler = state.handler.lock();
    Json(handler.status())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
