use std::time::Duration;

use async_trait::async_trait;
use datamover_domain::entities::Listing;
use datamover_domain::repositories::ClaimedJob;
use datamover_errors::{DatamoverError, DatamoverResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 上报一次尝试结果的请求体
#[derive(Debug, Clone, Serialize)]
pub struct WorkReport {
    pub returncode: i64,
    pub host: String,
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
}

/// Worker对工作队列服务的访问接口
#[async_trait]
pub trait WorkClient: Send + Sync {
    /// 领取一批工作。暂无工作时返回None。
    async fn claim(
        &self,
        types: &[String],
        algorithm: Option<&str>,
        alg_args: Option<&serde_json::Value>,
    ) -> DatamoverResult<Option<Vec<ClaimedJob>>>;

    /// 上报一次尝试的结果，令牌放在X-Token请求头
    async fn report(
        &self,
        job_id: i64,
        element_id: i64,
        token: &str,
        report: &WorkReport,
    ) -> DatamoverResult<()>;
}

#[derive(Debug, Serialize)]
struct ClaimBody<'a> {
    types: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    algorithm: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alg_args: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// 工作队列服务的HTTP客户端
pub struct WorkqueueClient {
    http: reqwest::Client,
    base_url: String,
}

impl WorkqueueClient {
    pub fn new(base_url: impl Into<String>) -> DatamoverResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DatamoverError::Network(format!("构建HTTP客户端失败: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// 超时和普通网络故障区别对待: 超时可以立刻重试
fn request_error(context: &str, err: reqwest::Error) -> DatamoverError {
    if err.is_timeout() {
        DatamoverError::Timeout
    } else {
        DatamoverError::Network(format!("{context}: {err}"))
    }
}

#[async_trait]
impl WorkClient for WorkqueueClient {
    async fn claim(
        &self,
        types: &[String],
        algorithm: Option<&str>,
        alg_args: Option<&serde_json::Value>,
    ) -> DatamoverResult<Option<Vec<ClaimedJob>>> {
        let url = format!("{}/api/workqueue/worker", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ClaimBody {
                types,
                algorithm,
                alg_args,
            })
            .send()
            .await
            .map_err(|e| request_error("领取请求失败", e))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let envelope: Envelope<Vec<ClaimedJob>> = response
                    .json()
                    .await
                    .map_err(|e| request_error("解析领取响应失败", e))?;
                Ok(envelope.data)
            }
            status => Err(DatamoverError::Network(format!(
                "领取请求被拒绝: HTTP {status}"
            ))),
        }
    }

    async fn report(
        &self,
        job_id: i64,
        element_id: i64,
        token: &str,
        report: &WorkReport,
    ) -> DatamoverResult<()> {
        let url = format!(
            "{}/api/workqueue/worker/{}/elements/{}",
            self.base_url, job_id, element_id
        );
        let response = self
            .http
            .put(&url)
            .header("X-Token", token)
            .json(report)
            .send()
            .await
            .map_err(|e| request_error("上报请求失败", e))?;

        match response.status() {
            status if status.is_success() => {
                debug!("上报 {}.{} 完成 (rc={})", job_id, element_id, report.returncode);
                Ok(())
            }
            reqwest::StatusCode::FORBIDDEN => Err(DatamoverError::TokenMismatch),
            reqwest::StatusCode::CONFLICT => Err(DatamoverError::conflict(format!(
                "元素 {job_id}.{element_id} 的上报被服务端拒绝"
            ))),
            status => Err(DatamoverError::Network(format!(
                "上报请求被拒绝: HTTP {status}"
            ))),
        }
    }
}
