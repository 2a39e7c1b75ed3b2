use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use datamover_errors::DatamoverError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("数据移动错误: {0}")]
    Datamover(#[from] DatamoverError),

    #[error("缺少认证信息: {0}")]
    Unauthorized(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Datamover(DatamoverError::JobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("作业 {} 不存在", id),
                "JOB_NOT_FOUND",
            ),
            ApiError::Datamover(DatamoverError::ElementNotFound { job_id, element_id }) => (
                StatusCode::NOT_FOUND,
                format!("作业元素 {}.{} 不存在", job_id, element_id),
                "ELEMENT_NOT_FOUND",
            ),
            ApiError::Datamover(DatamoverError::NoWork) => (
                StatusCode::NOT_FOUND,
                "暂无可领取的工作".to_string(),
                "NO_WORK",
            ),
            ApiError::Datamover(DatamoverError::NoSuchAttempt {
                job_id,
                element_id,
                attempt,
            }) => (
                StatusCode::NOT_FOUND,
                format!("作业 {}.{} 没有第 {} 次尝试的日志", job_id, element_id, attempt),
                "NO_SUCH_ATTEMPT",
            ),
            ApiError::Datamover(DatamoverError::SiteNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("站点 {} 不存在", id),
                "SITE_NOT_FOUND",
            ),
            ApiError::Datamover(DatamoverError::TokenMismatch) => (
                StatusCode::FORBIDDEN,
                "元素令牌不匹配或已被消费".to_string(),
                "TOKEN_MISMATCH",
            ),
            ApiError::Datamover(DatamoverError::RetriesExhausted {
                job_id,
                element_id,
                max_tries,
            }) => (
                StatusCode::CONFLICT,
                format!(
                    "作业元素 {}.{} 重试次数已耗尽 (max_tries={})",
                    job_id, element_id, max_tries
                ),
                "RETRIES_EXHAUSTED",
            ),
            ApiError::Datamover(DatamoverError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("数据验证失败: {}", msg),
                "VALIDATION_ERROR",
            ),
            ApiError::Datamover(DatamoverError::Conflict(msg)) => (
                StatusCode::CONFLICT,
                format!("请求冲突: {}", msg),
                "CONFLICT",
            ),
            ApiError::Datamover(DatamoverError::Serialization(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("请求数据格式错误: {}", msg),
                "SERIALIZATION_ERROR",
            ),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                format!("缺少认证信息: {}", msg),
                "UNAUTHORIZED",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {}", msg),
                "BAD_REQUEST",
            ),
            ApiError::Datamover(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
