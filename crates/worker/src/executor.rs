use std::process::Stdio;
use std::time::Duration;

use datamover_errors::DatamoverResult;
use tokio::process::Command;
use tracing::warn;

/// 外部命令的执行结果，stdout和stderr合并成一份输出文本
#[derive(Debug)]
pub struct CommandOutcome {
    pub returncode: i64,
    pub output: String,
}

/// 运行外部传输工具，超时后杀掉子进程并按失败处理
pub async fn run_command(
    mut command: Command,
    timeout: Duration,
) -> DatamoverResult<CommandOutcome> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            // 工具不存在也按失败上报，作业属主能从日志里看到原因
            return Ok(CommandOutcome {
                returncode: 127,
                output: format!("无法启动命令: {err}"),
            });
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            Ok(CommandOutcome {
                returncode: output.status.code().unwrap_or(-1) as i64,
                output: text,
            })
        }
        Ok(Err(err)) => Ok(CommandOutcome {
            returncode: -1,
            output: format!("等待命令结束失败: {err}"),
        }),
        Err(_) => {
            warn!("命令执行超时 ({}s)，子进程已终止", timeout.as_secs());
            Ok(CommandOutcome {
                returncode: 124,
                output: format!("命令执行超时 ({}s)", timeout.as_secs()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command_captures_output() {
        let mut command = Command::new("echo");
        command.arg("hello");
        let outcome = run_command(command, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.returncode, 0);
        assert!(outcome.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_command_reports_returncode() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo boom >&2; exit 3"]);
        let outcome = run_command(command, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.returncode, 3);
        assert!(outcome.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_command_is_reported_not_fatal() {
        let command = Command::new("/nonexistent/datamover-tool");
        let outcome = run_command(command, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.returncode, 127);
        assert!(outcome.output.contains("无法启动命令"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let outcome = run_command(command, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(outcome.returncode, 124);
    }
}
