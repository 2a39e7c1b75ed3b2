use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use datamover_domain::repositories::JobRepository;
use datamover_infrastructure::WorkerLogStore;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    health::health_check,
    jobs::{
        create_job, get_element, get_element_attempt_output, get_element_output, get_job,
        get_job_output, get_job_status, list_elements, list_jobs,
    },
    worker::{claim_work, report_element},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub job_repo: Arc<dyn JobRepository>,
    pub log_store: Arc<WorkerLogStore>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 作业属主API
        .route("/api/workqueue/jobs", get(list_jobs).post(create_job))
        .route("/api/workqueue/jobs/{job_id}", get(get_job))
        .route("/api/workqueue/jobs/{job_id}/status", get(get_job_status))
        .route("/api/workqueue/jobs/{job_id}/output", get(get_job_output))
        .route("/api/workqueue/jobs/{job_id}/elements", get(list_elements))
        .route(
            "/api/workqueue/jobs/{job_id}/elements/{element_id}",
            get(get_element),
        )
        .route(
            "/api/workqueue/jobs/{job_id}/elements/{element_id}/output",
            get(get_element_output),
        )
        .route(
            "/api/workqueue/jobs/{job_id}/elements/{element_id}/output/{attempt}",
            get(get_element_attempt_output),
        )
        // Worker派发API
        .route("/api/workqueue/worker", post(claim_work))
        .route(
            "/api/workqueue/worker/{job_id}/elements/{element_id}",
            put(report_element),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
