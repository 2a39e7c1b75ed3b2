use async_trait::async_trait;
use datamover_errors::{DatamoverError, DatamoverResult};
use serde::Deserialize;

/// 站点目录服务: 站点id到具体传输端点URI列表的解析
#[async_trait]
pub trait SiteCatalog: Send + Sync {
    async fn endpoints(&self, site_id: i64) -> DatamoverResult<Vec<String>>;
}

/// 凭证服务: 按用户和站点取回委托凭证(PEM文本)
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn credential(&self, user_id: i64, site_id: i64) -> DatamoverResult<String>;
}

#[derive(Debug, Deserialize)]
struct EndpointsResponse {
    endpoints: Vec<String>,
}

pub struct HttpSiteCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSiteCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SiteCatalog for HttpSiteCatalog {
    async fn endpoints(&self, site_id: i64) -> DatamoverResult<Vec<String>> {
        let url = format!("{}/api/sites/{}/endpoints", self.base_url, site_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DatamoverError::Network(format!("站点查询失败: {e}")))?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => {
                Err(DatamoverError::SiteNotFound { id: site_id })
            }
            status if status.is_success() => {
                let body: EndpointsResponse = response
                    .json()
                    .await
                    .map_err(|e| DatamoverError::Network(format!("解析站点响应失败: {e}")))?;
                Ok(body.endpoints)
            }
            status => Err(DatamoverError::Network(format!(
                "站点查询被拒绝: HTTP {status}"
            ))),
        }
    }
}

pub struct HttpCredentialBroker {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCredentialBroker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CredentialBroker for HttpCredentialBroker {
    async fn credential(&self, user_id: i64, site_id: i64) -> DatamoverResult<String> {
        let url = format!(
            "{}/api/credentials/{}/{}",
            self.base_url, user_id, site_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DatamoverError::Network(format!("凭证查询失败: {e}")))?;
        if !response.status().is_success() {
            return Err(DatamoverError::Network(format!(
                "凭证查询被拒绝: HTTP {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| DatamoverError::Network(format!("读取凭证失败: {e}")))
    }
}
