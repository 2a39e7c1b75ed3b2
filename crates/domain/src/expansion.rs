use std::path::Path;

use datamover_errors::{DatamoverError, DatamoverResult};

use crate::entities::{Job, JobElement, JobType, Listing, NewElement};

/// 把一个成功完成的LIST元素的目录清单展开成具体的传输元素。
///
/// 只有COPY/REMOVE作业会展开; RENAME/MKDIR及纯LIST作业的种子元素
/// 就是终点。每个LIST元素至多展开一次(由上报令牌的单次性保证)。
pub fn expand(job: &Job, element: &JobElement, listing: &Listing) -> DatamoverResult<Vec<NewElement>> {
    if element.element_type != JobType::List || !job.job_type.expands() {
        return Ok(Vec::new());
    }
    match job.job_type {
        JobType::Copy => expand_copy(job, element, listing),
        JobType::Remove => Ok(expand_remove(element, listing)),
        _ => Ok(Vec::new()),
    }
}

fn expand_copy(job: &Job, element: &JobElement, listing: &Listing) -> DatamoverResult<Vec<NewElement>> {
    let dst_root = job.dst_filepath.as_deref().ok_or_else(|| {
        DatamoverError::validation_error(format!("COPY作业 {} 没有目标路径", job.id))
    })?;
    let src_root = job.src_filepath.as_str();

    let files: Vec<(&str, &crate::entities::StatEntry)> = listing
        .iter()
        .flat_map(|(dir, entries)| {
            entries
                .iter()
                .filter(|entry| entry.is_regular())
                .map(move |entry| (dir.as_str(), entry))
        })
        .collect();

    // 目标路径带扩展名后缀时视为"目标是单个文件"
    if destination_names_file(dst_root) {
        if files.len() != 1 {
            return Err(DatamoverError::conflict(format!(
                "目标路径 {dst_root} 指向单个文件，但源端找到 {} 个文件",
                files.len()
            )));
        }
        let (dir, entry) = files[0];
        return Ok(vec![NewElement {
            element_type: JobType::Copy,
            src_filepath: join_path(dir, &entry.name),
            dst_filepath: Some(dst_root.to_string()),
            size: entry.st_size,
            max_tries: element.max_tries,
        }]);
    }

    // 目标是目录: 保留源端子目录结构
    Ok(files
        .into_iter()
        .map(|(dir, entry)| {
            let rel = relative_to(dir, src_root);
            let dst = join_path(&join_path(dst_root, rel), &entry.name);
            NewElement {
                element_type: JobType::Copy,
                src_filepath: join_path(dir, &entry.name),
                dst_filepath: Some(dst),
                size: entry.st_size,
                max_tries: element.max_tries,
            }
        })
        .collect())
}

fn expand_remove(element: &JobElement, listing: &Listing) -> Vec<NewElement> {
    let mut elements = Vec::new();
    for (dir, entries) in listing {
        let mut entries: Vec<_> = entries
            .iter()
            .filter(|entry| entry.name != "." && entry.name != "..")
            .collect();
        // 普通文件排在目录前面: 目录必须先清空才能删除
        entries.sort_by_key(|entry| entry.is_directory());
        for entry in entries {
            let mut src = join_path(dir, &entry.name);
            let mut size = entry.st_size;
            if entry.is_directory() {
                // 结尾的路径分隔符让外部工具能区分目录
                src.push('/');
                size = 0;
            }
            elements.push(NewElement {
                element_type: JobType::Remove,
                src_filepath: src,
                dst_filepath: None,
                size,
                max_tries: element.max_tries,
            });
        }
    }
    elements
}

/// 目标路径的最后一段是否带有类似文件扩展名的后缀
fn destination_names_file(dst: &str) -> bool {
    Path::new(dst).extension().is_some()
}

fn relative_to<'a>(dir: &'a str, root: &str) -> &'a str {
    if dir == root {
        return "";
    }
    let root_trimmed = root.trim_end_matches('/');
    match dir.strip_prefix(root_trimmed) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        // 源路径指向单个文件时，清单键是其父目录
        _ => "",
    }
}

fn join_path(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rest.trim_start_matches('/'))
}
