use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use datamover_config::WorkerConfig;
use datamover_domain::entities::{Job, JobElement, JobProtocol, JobType, Listing};
use datamover_errors::{DatamoverError, DatamoverResult};
use rand::seq::IndexedRandom;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::client::{WorkClient, WorkReport, WorkqueueClient};
use crate::collaborators::{CredentialBroker, SiteCatalog};
use crate::command_map::command_for;
use crate::executor::run_command;

/// 单个外部命令的最长运行时间
const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// 轮询式传输Worker。
///
/// 每个轮询周期领取一批元素，逐个执行外部传输工具并上报结果。
/// 凭证只落在临时文件里，命令结束后立即删除。
pub struct WorkerService {
    client: Arc<dyn WorkClient>,
    sites: Arc<dyn SiteCatalog>,
    credentials: Arc<dyn CredentialBroker>,
    types: Vec<String>,
    poll_interval: Duration,
    script_path: String,
    hostname: String,
}

impl WorkerService {
    pub fn new(
        config: &WorkerConfig,
        sites: Arc<dyn SiteCatalog>,
        credentials: Arc<dyn CredentialBroker>,
    ) -> DatamoverResult<Self> {
        let client = Arc::new(WorkqueueClient::new(config.service_url.as_str())?);
        Ok(Self::with_client(client, sites, credentials, config))
    }

    pub fn with_client(
        client: Arc<dyn WorkClient>,
        sites: Arc<dyn SiteCatalog>,
        credentials: Arc<dyn CredentialBroker>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            client,
            sites,
            credentials,
            types: config.types.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            script_path: config.script_path.clone(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    /// 轮询主循环，收到ctrl-c后停止; kill_on_drop保证在途子进程被回收
    pub async fn run(&self) -> DatamoverResult<()> {
        info!("Worker启动, 主机 {}, 类型 {:?}", self.hostname, self.types);
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("收到退出信号，停止轮询");
                    break;
                }
                _ = ticker.tick() => self.poll_cycle().await,
            }
        }
        Ok(())
    }

    /// 一个轮询周期。超时立刻重试，其他失败等下一个周期。
    async fn poll_cycle(&self) {
        loop {
            match self.poll_once().await {
                Ok(0) => return,
                Ok(handled) => {
                    debug!("本轮处理了 {} 个元素", handled);
                    return;
                }
                Err(DatamoverError::Timeout) => warn!("领取请求超时，立即重试"),
                Err(err) if err.is_retryable() => {
                    warn!("轮询失败(将重试): {err}");
                    return;
                }
                Err(err) => {
                    error!("轮询失败: {err}");
                    return;
                }
            }
        }
    }

    /// 领取并执行一批工作，返回成功上报的元素数
    pub async fn poll_once(&self) -> DatamoverResult<usize> {
        let claimed = match self.client.claim(&self.types, None, None).await? {
            Some(jobs) => jobs,
            None => {
                debug!("暂无可领取的工作");
                return Ok(0);
            }
        };

        let mut handled = 0;
        for claimed_job in &claimed {
            for element in &claimed_job.elements {
                let Some(token) = element.token.as_deref() else {
                    warn!(
                        "元素 {}.{} 没带令牌，跳过",
                        element.job_id, element.element_id
                    );
                    continue;
                };
                let report = self.execute_element(&claimed_job.job, element).await;
                match self
                    .client
                    .report(element.job_id, element.element_id, token, &report)
                    .await
                {
                    Ok(()) => handled += 1,
                    // 展开冲突或令牌失效只影响这一个元素
                    Err(DatamoverError::Conflict(msg)) => warn!("{msg}"),
                    Err(DatamoverError::TokenMismatch) => {
                        warn!("元素 {}.{} 的令牌已失效", element.job_id, element.element_id)
                    }
                    // 单次上报失败不放弃批内剩余元素
                    Err(err) => error!(
                        "上报 {}.{} 失败: {err}",
                        element.job_id, element.element_id
                    ),
                }
            }
        }
        Ok(handled)
    }

    async fn execute_element(&self, job: &Job, element: &JobElement) -> WorkReport {
        match self.try_execute(job, element).await {
            Ok(report) => report,
            Err(err) => self.failure_report(format!("执行失败: {err}")),
        }
    }

    fn failure_report(&self, log: String) -> WorkReport {
        WorkReport {
            returncode: 1,
            host: self.hostname.clone(),
            log,
            listing: None,
        }
    }

    async fn try_execute(&self, job: &Job, element: &JobElement) -> DatamoverResult<WorkReport> {
        let Some(program) = command_for(element.element_type, job.protocol) else {
            return Ok(self.failure_report(format!(
                "没有 {}/{} 组合对应的传输工具",
                element.element_type.as_str(),
                job.protocol.scheme()
            )));
        };

        let Some(src_endpoint) = self.pick_endpoint(job.src_siteid, job.protocol).await? else {
            return Ok(self.failure_report(format!(
                "站点 {} 没有 {} 协议的端点",
                job.src_siteid,
                job.protocol.scheme()
            )));
        };
        let src_url = join_endpoint(&src_endpoint, &element.src_filepath);

        let mut dst_url = None;
        if let (Some(dst_path), Some(dst_siteid)) =
            (element.dst_filepath.as_deref(), job.dst_siteid)
        {
            let Some(endpoint) = self.pick_endpoint(dst_siteid, job.protocol).await? else {
                return Ok(self.failure_report(format!(
                    "目标站点 {} 没有 {} 协议的端点",
                    dst_siteid,
                    job.protocol.scheme()
                )));
            };
            dst_url = Some(join_endpoint(&endpoint, dst_path));
        }

        // 优先用作业自带的委托凭证，没有就向凭证服务取
        let credential = match job.src_credentials.clone() {
            Some(pem) => pem,
            None => {
                self.credentials
                    .credential(job.user_id, job.src_siteid)
                    .await?
            }
        };
        let proxy_file = write_credential_file(&credential)?;

        let mut command = Command::new(program);
        command.env("PATH", prepend_path(&self.script_path));
        command.env("X509_USER_PROXY", proxy_file.path());
        command.env("SRC_PATH", &element.src_filepath);
        if let Some(dst_path) = element.dst_filepath.as_deref() {
            command.env("DST_PATH", dst_path);
        }
        if let Some(opts) = job.extra_opts.as_deref() {
            for opt in opts.split_whitespace() {
                command.arg(opt);
            }
        }
        command.arg(&src_url);
        if let Some(dst) = &dst_url {
            command.arg(dst);
        }

        debug!(
            "执行 {} ({}.{})",
            program, element.job_id, element.element_id
        );
        let outcome = run_command(command, COMMAND_TIMEOUT).await?;
        drop(proxy_file);

        let mut report = WorkReport {
            returncode: outcome.returncode,
            host: self.hostname.clone(),
            log: outcome.output,
            listing: None,
        };
        if element.element_type == JobType::List && report.returncode == 0 {
            match parse_listing(&report.log) {
                Some(listing) => report.listing = Some(listing),
                None => {
                    // LIST的产出必须是结构化清单，解析不了视为失败
                    report.returncode = 1;
                    report.log.push_str("\n无法解析目录清单输出");
                }
            }
        }
        Ok(report)
    }

    /// 解析站点端点并按作业协议过滤，多个匹配时随机选一个
    async fn pick_endpoint(
        &self,
        site_id: i64,
        protocol: JobProtocol,
    ) -> DatamoverResult<Option<String>> {
        let endpoints = self.sites.endpoints(site_id).await?;
        let matching = matching_endpoints(&endpoints, protocol);
        let mut rng = rand::rng();
        Ok(matching.choose(&mut rng).map(|s| (*s).clone()))
    }
}

/// 协议scheme决定哪些端点可用
pub fn matching_endpoints(endpoints: &[String], protocol: JobProtocol) -> Vec<&String> {
    let prefix = format!("{}://", protocol.scheme());
    endpoints.iter().filter(|e| e.starts_with(&prefix)).collect()
}

fn join_endpoint(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn prepend_path(script_path: &str) -> String {
    match std::env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{script_path}:{path}"),
        _ => script_path.to_string(),
    }
}

fn write_credential_file(pem: &str) -> DatamoverResult<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(pem.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// 列目录工具把清单以JSON打印在输出末尾，前面可能混有告警文本
fn parse_listing(output: &str) -> Option<Listing> {
    let trimmed = output.trim();
    if let Ok(listing) = serde_json::from_str::<Listing>(trimmed) {
        return Some(listing);
    }
    trimmed
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line.trim()).ok())
}
