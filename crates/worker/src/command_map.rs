use datamover_domain::entities::{JobProtocol, JobType};

/// 元素类型+协议到外部传输工具的映射。
///
/// 表里没有的组合说明本Worker不具备执行能力，领取前就该被
/// types过滤掉，运行期遇到按失败上报。
pub fn command_for(job_type: JobType, protocol: JobProtocol) -> Option<&'static str> {
    match (job_type, protocol) {
        (JobType::List, JobProtocol::Gridftp) => Some("gfal-ls"),
        (JobType::Copy, JobProtocol::Gridftp) => Some("globus-url-copy"),
        (JobType::Remove, JobProtocol::Gridftp) => Some("gfal-rm"),
        (JobType::Rename, JobProtocol::Gridftp) => Some("gfal-rename"),
        (JobType::Mkdir, JobProtocol::Gridftp) => Some("gfal-mkdir"),
        (JobType::List, JobProtocol::Ssh) => Some("sftp"),
        (JobType::Copy, JobProtocol::Ssh) => Some("scp"),
        (JobType::Remove, JobProtocol::Ssh) => Some("sftp"),
        (JobType::Rename, JobProtocol::Ssh) => Some("sftp"),
        (JobType::Mkdir, JobProtocol::Ssh) => Some("sftp"),
    }
}
