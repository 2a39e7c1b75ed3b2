use std::collections::HashMap;
use std::sync::OnceLock;

use datamover_errors::{DatamoverError, DatamoverResult};

use crate::entities::{JobType, NewJob};

/// 每种作业类型的必填字段表。
///
/// 启动时计算一次的显式模式表，替代原实现里按持久层列元数据
/// 反射出来的required/allowed字段列表。
pub fn validation_schema() -> &'static HashMap<JobType, &'static [&'static str]> {
    static SCHEMA: OnceLock<HashMap<JobType, &'static [&'static str]>> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        const SRC_ONLY: &[&str] = &["src_siteid", "src_filepath"];
        const SRC_DST: &[&str] = &["src_siteid", "src_filepath", "dst_siteid", "dst_filepath"];
        let mut schema = HashMap::new();
        schema.insert(JobType::List, SRC_ONLY);
        schema.insert(JobType::Remove, SRC_ONLY);
        schema.insert(JobType::Mkdir, SRC_ONLY);
        schema.insert(JobType::Copy, SRC_DST);
        schema.insert(JobType::Rename, SRC_DST);
        schema
    })
}

/// 校验路径可安全拼入外部命令行: 以 / 或 ~ 开头，且只含受限字符集
pub fn sanitise_shellpath(path: &str) -> DatamoverResult<()> {
    let mut chars = path.chars();
    let first = chars
        .next()
        .ok_or_else(|| DatamoverError::validation_error("路径不能为空"))?;
    if first != '/' && first != '~' {
        return Err(DatamoverError::validation_error(format!(
            "路径必须以 / 或 ~ 开头: {path}"
        )));
    }
    if let Some(bad) = chars.find(|c| !is_safe_path_char(*c)) {
        return Err(DatamoverError::validation_error(format!(
            "路径含有非法字符 '{bad}': {path}"
        )));
    }
    Ok(())
}

fn is_safe_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~')
}

/// 按类型模式表校验一份作业提交，并对路径做shell注入检查
pub fn validate_submission(new_job: &NewJob) -> DatamoverResult<()> {
    let required = validation_schema()
        .get(&new_job.job_type)
        .copied()
        .unwrap_or_default();

    for field in required {
        let present = match *field {
            "src_siteid" => new_job.src_siteid.is_some(),
            "src_filepath" => new_job.src_filepath.is_some(),
            "dst_siteid" => new_job.dst_siteid.is_some(),
            "dst_filepath" => new_job.dst_filepath.is_some(),
            _ => true,
        };
        if !present {
            return Err(DatamoverError::validation_error(format!(
                "{} 作业缺少必填字段 {field}",
                new_job.job_type.as_str()
            )));
        }
    }

    if !(0..=9).contains(&new_job.priority) {
        return Err(DatamoverError::validation_error(format!(
            "优先级必须在0-9之间: {}",
            new_job.priority
        )));
    }
    if new_job.max_tries < 1 {
        return Err(DatamoverError::validation_error(format!(
            "max_tries必须至少为1: {}",
            new_job.max_tries
        )));
    }

    if let Some(ref path) = new_job.src_filepath {
        sanitise_shellpath(path)?;
    }
    if let Some(ref path) = new_job.dst_filepath {
        sanitise_shellpath(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::JobProtocol;

    fn submission(job_type: JobType) -> NewJob {
        NewJob {
            job_type,
            priority: 5,
            protocol: JobProtocol::Gridftp,
            src_siteid: Some(1),
            src_filepath: Some("/data".to_string()),
            dst_siteid: Some(2),
            dst_filepath: Some("/backup".to_string()),
            extra_opts: None,
            src_credentials: None,
            dst_credentials: None,
            max_tries: 2,
        }
    }

    #[test]
    fn test_schema_covers_all_types() {
        let schema = validation_schema();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema[&JobType::Copy].len(), 4);
        assert_eq!(schema[&JobType::List].len(), 2);
    }

    #[test]
    fn test_copy_requires_destination() {
        let mut sub = submission(JobType::Copy);
        sub.dst_filepath = None;
        let err = validate_submission(&sub).unwrap_err();
        assert!(format!("{err}").contains("dst_filepath"));
    }

    #[test]
    fn test_list_does_not_require_destination() {
        let mut sub = submission(JobType::List);
        sub.dst_siteid = None;
        sub.dst_filepath = None;
        assert!(validate_submission(&sub).is_ok());
    }

    #[test]
    fn test_shell_metacharacters_rejected() {
        for path in [
            "/data; rm -rf /",
            "/data`id`",
            "/data$(id)",
            "/data with space",
            "relative/path",
            "/data|pipe",
            "",
        ] {
            assert!(
                sanitise_shellpath(path).is_err(),
                "path should be rejected: {path:?}"
            );
        }
    }

    #[test]
    fn test_safe_paths_accepted() {
        for path in ["/data", "/a-b_c.d/e", "~/files", "/", "/data/sub.dir/file.txt"] {
            assert!(sanitise_shellpath(path).is_ok(), "path should pass: {path}");
        }
    }

    #[test]
    fn test_priority_range() {
        let mut sub = submission(JobType::List);
        sub.priority = 10;
        assert!(validate_submission(&sub).is_err());
        sub.priority = 0;
        assert!(validate_submission(&sub).is_ok());
    }
}
