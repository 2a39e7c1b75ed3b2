use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatamoverError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("作业元素未找到: {job_id}.{element_id}")]
    ElementNotFound { job_id: i64, element_id: i64 },
    #[error("站点未找到: {id}")]
    SiteNotFound { id: i64 },
    #[error("暂无可领取的工作")]
    NoWork,
    #[error("作业 {job_id}.{element_id} 尚无第 {attempt} 次尝试的日志")]
    NoSuchAttempt {
        job_id: i64,
        element_id: i64,
        attempt: i64,
    },
    #[error("作业元素 {job_id}.{element_id} 重试次数已耗尽 (max_tries={max_tries})")]
    RetriesExhausted {
        job_id: i64,
        element_id: i64,
        max_tries: i64,
    },
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("请求冲突: {0}")]
    Conflict(String),
    #[error("元素令牌不匹配")]
    TokenMismatch,
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("请求超时")]
    Timeout,
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DatamoverResult<T> = Result<T, DatamoverError>;

impl DatamoverError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn job_not_found(id: i64) -> Self {
        Self::JobNotFound { id }
    }
    pub fn element_not_found(job_id: i64, element_id: i64) -> Self {
        Self::ElementNotFound { job_id, element_id }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 瞬时错误：Worker遇到时只重试，不上报给作业所有者
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatamoverError::DatabaseOperation(_)
                | DatamoverError::Network(_)
                | DatamoverError::Timeout
                | DatamoverError::Database(_)
        )
    }
}

impl From<serde_json::Error> for DatamoverError {
    fn from(err: serde_json::Error) -> Self {
        DatamoverError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DatamoverError {
    fn from(err: anyhow::Error) -> Self {
        DatamoverError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DatamoverError::JobNotFound { id: 42 };
        assert_eq!(format!("{err}"), "作业未找到: 42");

        let err = DatamoverError::RetriesExhausted {
            job_id: 1,
            element_id: 3,
            max_tries: 2,
        };
        assert!(format!("{err}").contains("1.3"));
        assert!(format!("{err}").contains("max_tries=2"));
    }

    #[test]
    fn test_helper_constructors() {
        match DatamoverError::element_not_found(7, 0) {
            DatamoverError::ElementNotFound { job_id, element_id } => {
                assert_eq!(job_id, 7);
                assert_eq!(element_id, 0);
            }
            _ => panic!("Expected ElementNotFound"),
        }

        match DatamoverError::validation_error("bad path") {
            DatamoverError::Validation(msg) => assert_eq!(msg, "bad path"),
            _ => panic!("Expected Validation"),
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(DatamoverError::Network("connection reset".to_string()).is_retryable());
        assert!(DatamoverError::Timeout.is_retryable());
        assert!(DatamoverError::DatabaseOperation("busy".to_string()).is_retryable());
        assert!(!DatamoverError::TokenMismatch.is_retryable());
        assert!(!DatamoverError::NoWork.is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: DatamoverError = json_err.into();
        assert!(matches!(err, DatamoverError::Serialization(_)));
    }

    #[test]
    fn test_retries_exhausted_is_distinct_from_database_error() {
        let err = DatamoverError::RetriesExhausted {
            job_id: 1,
            element_id: 1,
            max_tries: 2,
        };
        assert!(!matches!(err, DatamoverError::DatabaseOperation(_)));
        assert!(!err.is_retryable());
    }
}
