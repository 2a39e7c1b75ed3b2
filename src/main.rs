use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use datamover_api::{create_routes, AppState};
use datamover_config::AppConfig;
use datamover_infrastructure::{SqliteJobRepository, WorkerLogStore};
use datamover_worker::{HttpCredentialBroker, HttpSiteCatalog, WorkerService};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("datamover")
        .version(env!("CARGO_PKG_VERSION"))
        .about("批量文件传输工作队列系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["api", "worker"])
                .default_value("api"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    match matches.get_one::<String>("mode").map(String::as_str) {
        Some("worker") => run_worker(config).await,
        _ => run_api(config).await,
    }
}

async fn run_api(config: AppConfig) -> Result<()> {
    let repo = SqliteJobRepository::new_embedded(
        &config.database.url,
        config.database.max_connections,
    )
    .await
    .context("初始化作业仓库失败")?;

    let state = AppState {
        job_repo: Arc::new(repo),
        log_store: Arc::new(WorkerLogStore::new(
            config.workqueue.workerlogs_root.clone(),
        )),
    };
    let app = create_routes(state);

    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .context("绑定监听地址失败")?;
    info!("API服务监听 {}", config.api.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API服务退出异常")?;
    Ok(())
}

async fn run_worker(config: AppConfig) -> Result<()> {
    let sites = Arc::new(HttpSiteCatalog::new(config.worker.site_service_url.clone()));
    let credentials = Arc::new(HttpCredentialBroker::new(
        config.worker.cred_service_url.clone(),
    ));
    let service = WorkerService::new(&config.worker, sites, credentials)
        .context("初始化Worker失败")?;
    service.run().await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("收到退出信号，正在关闭");
}
