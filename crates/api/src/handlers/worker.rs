use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use datamover_domain::entities::{JobStatus, JobType, Listing};
use datamover_domain::expansion;
use datamover_errors::DatamoverError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Worker愿意执行的作业类型，缺省为全部
    #[serde(default)]
    pub types: Option<Vec<JobType>>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub alg_args: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    /// 外部传输工具的退出码，0为成功
    pub returncode: i64,
    pub host: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub listing: Option<Listing>,
}

#[derive(Debug, Serialize)]
pub struct ReportOutcome {
    pub job_id: i64,
    pub element_id: i64,
    pub attempt: i64,
    pub job_status: JobStatus,
}

/// Worker领取一批工作。选中的元素已置为SUBMITTED并带上单次令牌，
/// 无工作可领时返回404。
pub async fn claim_work(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<impl IntoResponse> {
    let algorithm =
        datamover_domain::selection::SelectionAlgorithm::from_request(
            request.algorithm.as_deref(),
            request.alg_args.as_ref(),
        )?;
    let types = request.types.unwrap_or_else(|| {
        vec![
            JobType::List,
            JobType::Copy,
            JobType::Remove,
            JobType::Rename,
            JobType::Mkdir,
        ]
    });

    let claimed = state.job_repo.claim_elements(&types, algorithm).await?;
    if claimed.is_empty() {
        return Err(DatamoverError::NoWork.into());
    }
    info!(
        "派发 {} 个作业共 {} 个元素",
        claimed.len(),
        claimed.iter().map(|c| c.elements.len()).sum::<usize>()
    );
    Ok(success(claimed))
}

/// Worker上报一次尝试的结果。
///
/// 令牌单次有效: 校验通过后立即清除，重复上报和展开重放都会被
/// 403拒绝。成功的LIST结果在这里触发展开。
pub async fn report_element(
    State(state): State<AppState>,
    Path((job_id, element_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(report): Json<ReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let supplied = headers
        .get("X-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or(DatamoverError::TokenMismatch)?;

    let mut element = state.job_repo.find_element(job_id, element_id).await?;
    match element.token.as_deref() {
        Some(token) if token == supplied => {}
        _ => return Err(DatamoverError::TokenMismatch.into()),
    }

    let outcome = if report.returncode == 0 {
        JobStatus::Done
    } else {
        JobStatus::Failed
    };
    let attempt = element.attempts + 1;
    if attempt > element.max_tries {
        return Err(DatamoverError::RetriesExhausted {
            job_id,
            element_id,
            max_tries: element.max_tries,
        }
        .into());
    }

    let job = state.job_repo.find_job(job_id).await?;
    state
        .log_store
        .write_attempt(&job.log_uid, element_id, attempt, &report.host, &report.log)
        .await?;

    element.attempts = attempt;
    element.status = outcome;
    element.token = None;
    if outcome == JobStatus::Done && element.element_type == JobType::List {
        element.listing = report.listing;
    }
    state.job_repo.update_element(&element).await?;

    if element.status == JobStatus::Done {
        if let Some(listing) = element.listing.as_ref() {
            match expansion::expand(&job, &element, listing) {
                Ok(new_elements) => {
                    if !new_elements.is_empty() {
                        let added = state.job_repo.add_elements(job_id, new_elements).await?;
                        debug!("作业 {} 展开出 {} 个新元素", job_id, added.len());
                        // 新元素都是NEW，作业强制回到SUBMITTED等待下一轮领取
                        state
                            .job_repo
                            .set_job_status(job_id, JobStatus::Submitted)
                            .await?;
                        return Ok(success(ReportOutcome {
                            job_id,
                            element_id,
                            attempt,
                            job_status: JobStatus::Submitted,
                        }));
                    }
                }
                Err(err @ DatamoverError::Conflict(_)) => {
                    // 目标路径冲突无法自动恢复，作业整体判失败
                    state
                        .job_repo
                        .set_job_status(job_id, JobStatus::Failed)
                        .await?;
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    let job_status = state.job_repo.recompute_job_status(job_id).await?;
    Ok(success(ReportOutcome {
        job_id,
        element_id,
        attempt,
        job_status,
    }))
}
