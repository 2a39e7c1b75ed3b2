use std::path::{Path, PathBuf};

use datamover_errors::{DatamoverError, DatamoverResult};
use tracing::debug;

/// Worker输出日志的落盘存储。
///
/// 目录布局: `<root>/<log_uid前两位>/<log_uid>/<element_id>/attempt<N>.log`，
/// 前两位分片避免单目录下作业目录过多。
pub struct WorkerLogStore {
    root: PathBuf,
}

impl WorkerLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn attempt_path(&self, log_uid: &str, element_id: i64, attempt: i64) -> PathBuf {
        let shard = log_uid.get(..2).unwrap_or(log_uid);
        self.root
            .join(shard)
            .join(log_uid)
            .join(element_id.to_string())
            .join(format!("attempt{attempt}.log"))
    }

    /// 写入一次尝试的完整输出，首行记录执行主机
    pub async fn write_attempt(
        &self,
        log_uid: &str,
        element_id: i64,
        attempt: i64,
        host: &str,
        output: &str,
    ) -> DatamoverResult<PathBuf> {
        let path = self.attempt_path(log_uid, element_id, attempt);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = format!("Job run on host: {host}\n{output}");
        tokio::fs::write(&path, contents).await?;
        debug!("Wrote attempt log to {}", path.display());
        Ok(path)
    }

    /// 读取某次尝试的输出; 日志不存在时按"尝试不存在"上报
    pub async fn read_attempt(
        &self,
        job_id: i64,
        log_uid: &str,
        element_id: i64,
        attempt: i64,
    ) -> DatamoverResult<String> {
        let path = self.attempt_path(log_uid, element_id, attempt);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DatamoverError::NoSuchAttempt {
                    job_id,
                    element_id,
                    attempt,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
