use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 进程启动时装配一次的显式配置，替代原实现的全局单例配置服务。
/// 调度端和Worker各自持有自己需要的部分。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub workqueue: WorkqueueConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkqueueConfig {
    /// 每次尝试的输出日志落盘根目录
    pub workerlogs_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub service_url: String,
    pub site_service_url: String,
    pub cred_service_url: String,
    /// Worker愿意执行的作业类型
    pub types: Vec<String>,
    pub poll_interval_seconds: u64,
    /// 外部传输工具的查找路径
    pub script_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:datamover.db".to_string(),
                max_connections: 5,
            },
            api: ApiConfig {
                bind_address: "0.0.0.0:8080".to_string(),
            },
            workqueue: WorkqueueConfig {
                workerlogs_root: "/tmp/workers".to_string(),
            },
            worker: WorkerConfig {
                service_url: "http://127.0.0.1:8080".to_string(),
                site_service_url: "http://127.0.0.1:8081".to_string(),
                cred_service_url: "http://127.0.0.1:8082".to_string(),
                types: vec![
                    "LIST".to_string(),
                    "COPY".to_string(),
                    "REMOVE".to_string(),
                ],
                poll_interval_seconds: 2,
                script_path: "/usr/libexec/datamover".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 从TOML文件加载，环境变量 DATAMOVER_* 可覆盖任意字段
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/datamover.toml", "datamover.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let defaults = AppConfig::default();
        let config = builder
            .add_source(Environment::with_prefix("DATAMOVER").separator("__"))
            .set_default("database.url", defaults.database.url)?
            .set_default(
                "database.max_connections",
                defaults.database.max_connections as i64,
            )?
            .set_default("api.bind_address", defaults.api.bind_address)?
            .set_default("workqueue.workerlogs_root", defaults.workqueue.workerlogs_root)?
            .set_default("worker.service_url", defaults.worker.service_url)?
            .set_default("worker.site_service_url", defaults.worker.site_service_url)?
            .set_default("worker.cred_service_url", defaults.worker.cred_service_url)?
            .set_default("worker.types", defaults.worker.types)?
            .set_default(
                "worker.poll_interval_seconds",
                defaults.worker.poll_interval_seconds as i64,
            )?
            .set_default("worker.script_path", defaults.worker.script_path)?
            .build()
            .context("构建配置失败")?;

        let app_config: AppConfig = config.try_deserialize().context("解析配置失败")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("database.url 不能为空"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("database.max_connections 必须大于0"));
        }
        if self.api.bind_address.is_empty() {
            return Err(anyhow::anyhow!("api.bind_address 不能为空"));
        }
        if self.workqueue.workerlogs_root.is_empty() {
            return Err(anyhow::anyhow!("workqueue.workerlogs_root 不能为空"));
        }
        if self.worker.types.is_empty() {
            return Err(anyhow::anyhow!("worker.types 不能为空"));
        }
        if self.worker.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("worker.poll_interval_seconds 必须大于0"));
        }
        Ok(())
    }
}
