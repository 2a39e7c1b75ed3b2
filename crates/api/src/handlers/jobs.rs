use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use datamover_domain::entities::{
    Job, JobElement, JobProtocol, JobStatus, JobType, Listing, NewJob,
};
use datamover_errors::DatamoverError;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success};
use crate::routes::AppState;

/// 解析外部认证层注入的用户标识请求头
pub(crate) fn user_id_from(headers: &HeaderMap) -> ApiResult<i64> {
    let value = headers
        .get("X-User-Id")
        .ok_or_else(|| ApiError::Unauthorized("缺少 X-User-Id 请求头".to_string()))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest("X-User-Id 必须是整数".to_string()))
}

/// 返回给作业属主的视图，凭证字段永不外泄
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: i64,
    pub user_id: i64,
    pub log_uid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: i64,
    pub protocol: JobProtocol,
    pub src_siteid: i64,
    pub src_filepath: String,
    pub dst_siteid: Option<i64>,
    pub dst_filepath: Option<String>,
    pub extra_opts: Option<String>,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            user_id: job.user_id,
            log_uid: job.log_uid,
            job_type: job.job_type,
            priority: job.priority,
            protocol: job.protocol,
            src_siteid: job.src_siteid,
            src_filepath: job.src_filepath,
            dst_siteid: job.dst_siteid,
            dst_filepath: job.dst_filepath,
            extra_opts: job.extra_opts,
            status: job.status,
            timestamp: job.timestamp,
        }
    }
}

/// 属主视角的元素视图，不含派发令牌
#[derive(Debug, Serialize)]
pub struct ElementView {
    pub job_id: i64,
    pub element_id: i64,
    #[serde(rename = "type")]
    pub element_type: JobType,
    pub src_filepath: String,
    pub dst_filepath: Option<String>,
    pub size: i64,
    pub max_tries: i64,
    pub attempts: i64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
    pub timestamp: DateTime<Utc>,
}

impl From<JobElement> for ElementView {
    fn from(element: JobElement) -> Self {
        Self {
            job_id: element.job_id,
            element_id: element.element_id,
            element_type: element.element_type,
            src_filepath: element.src_filepath,
            dst_filepath: element.dst_filepath,
            size: element.size,
            max_tries: element.max_tries,
            attempts: element.attempts,
            status: element.status,
            listing: element.listing,
            timestamp: element.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobStatusView {
    pub id: i64,
    pub status: JobStatus,
    pub elements: Vec<ElementStatusView>,
}

#[derive(Debug, Serialize)]
pub struct ElementStatusView {
    pub element_id: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_tries: i64,
}

#[derive(Debug, Serialize)]
pub struct OutputView {
    pub job_id: i64,
    pub element_id: i64,
    pub attempt: i64,
    pub log: String,
}

pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new_job): Json<NewJob>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let job = state.job_repo.create_job(user_id, new_job).await?;
    Ok(created(JobView::from(job)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let jobs = state.job_repo.get_jobs(user_id).await?;
    let views: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
    Ok(success(views))
}

pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let job = state.job_repo.get_job(job_id, user_id).await?;
    Ok(success(JobView::from(job)))
}

pub async fn get_job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let job = state.job_repo.get_job(job_id, user_id).await?;
    let elements = state.job_repo.get_elements(job_id, user_id).await?;
    Ok(success(JobStatusView {
        id: job.id,
        status: job.status,
        elements: elements
            .into_iter()
            .map(|e| ElementStatusView {
                element_id: e.element_id,
                status: e.status,
                attempts: e.attempts,
                max_tries: e.max_tries,
            })
            .collect(),
    }))
}

pub async fn list_elements(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let elements = state.job_repo.get_elements(job_id, user_id).await?;
    let views: Vec<ElementView> = elements.into_iter().map(ElementView::from).collect();
    Ok(success(views))
}

pub async fn get_element(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((job_id, element_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let element = state.job_repo.get_element(job_id, element_id, user_id).await?;
    Ok(success(ElementView::from(element)))
}

/// 作业整体的输出即0号种子元素的输出
pub async fn get_job_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let output = element_output(&state, user_id, job_id, 0, None).await?;
    Ok(success(output))
}

pub async fn get_element_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((job_id, element_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let output = element_output(&state, user_id, job_id, element_id, None).await?;
    Ok(success(output))
}

pub async fn get_element_attempt_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((job_id, element_id, attempt)): Path<(i64, i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user_id_from(&headers)?;
    let output = element_output(&state, user_id, job_id, element_id, Some(attempt)).await?;
    Ok(success(output))
}

/// 读取某次尝试的落盘日志，缺省取最近一次尝试
async fn element_output(
    state: &AppState,
    user_id: i64,
    job_id: i64,
    element_id: i64,
    attempt: Option<i64>,
) -> ApiResult<OutputView> {
    let job = state.job_repo.get_job(job_id, user_id).await?;
    let element = state.job_repo.get_element(job_id, element_id, user_id).await?;
    let attempt = attempt.unwrap_or(element.attempts);
    if attempt < 1 || attempt > element.attempts {
        return Err(DatamoverError::NoSuchAttempt {
            job_id,
            element_id,
            attempt,
        }
        .into());
    }
    let log = state
        .log_store
        .read_attempt(job_id, &job.log_uid, element_id, attempt)
        .await?;
    Ok(OutputView {
        job_id,
        element_id,
        attempt,
        log,
    })
}
