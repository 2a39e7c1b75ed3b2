use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业状态枚举。
///
/// 数值顺序即聚合顺序: 作业状态 = 所有元素状态的最大值，
/// 因此只要有一个元素处于SUBMITTED，作业整体就显示为SUBMITTED。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStatus {
    #[serde(rename = "NEW")]
    New = 0,
    #[serde(rename = "DONE")]
    Done = 1,
    #[serde(rename = "FAILED")]
    Failed = 2,
    #[serde(rename = "SUBMITTED")]
    Submitted = 3,
}

impl JobStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(JobStatus::New),
            1 => Some(JobStatus::Done),
            2 => Some(JobStatus::Failed),
            3 => Some(JobStatus::Submitted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Submitted => "SUBMITTED",
        }
    }

    /// 按照 NEW < DONE < FAILED < SUBMITTED 的顺序聚合元素状态
    pub fn aggregate<I: IntoIterator<Item = JobStatus>>(statuses: I) -> JobStatus {
        statuses.into_iter().max().unwrap_or(JobStatus::New)
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        JobStatus::from_i64(v).ok_or_else(|| format!("Invalid job status: {v}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i64 as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_i64(), buf)
    }
}

/// 作业/元素类型枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobType {
    #[serde(rename = "LIST")]
    List = 0,
    #[serde(rename = "COPY")]
    Copy = 1,
    #[serde(rename = "REMOVE")]
    Remove = 2,
    #[serde(rename = "RENAME")]
    Rename = 3,
    #[serde(rename = "MKDIR")]
    Mkdir = 4,
}

impl JobType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(JobType::List),
            1 => Some(JobType::Copy),
            2 => Some(JobType::Remove),
            3 => Some(JobType::Rename),
            4 => Some(JobType::Mkdir),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::List => "LIST",
            JobType::Copy => "COPY",
            JobType::Remove => "REMOVE",
            JobType::Rename => "RENAME",
            JobType::Mkdir => "MKDIR",
        }
    }

    /// 需要目标站点/路径的类型
    pub fn requires_destination(self) -> bool {
        matches!(self, JobType::Copy | JobType::Rename)
    }

    /// 种子元素类型: MKDIR作业直接可执行，其余先做一次LIST侦察
    pub fn seed_element_type(self) -> JobType {
        match self {
            JobType::Mkdir => JobType::Mkdir,
            _ => JobType::List,
        }
    }

    /// LIST完成后会动态展开出具体传输元素的作业类型
    pub fn expands(self) -> bool {
        matches!(self, JobType::Copy | JobType::Remove)
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        JobType::from_i64(v).ok_or_else(|| format!("Invalid job type: {v}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i64 as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_i64(), buf)
    }
}

/// 传输协议枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobProtocol {
    #[serde(rename = "GRIDFTP")]
    Gridftp = 0,
    #[serde(rename = "SSH")]
    Ssh = 1,
}

impl JobProtocol {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(JobProtocol::Gridftp),
            1 => Some(JobProtocol::Ssh),
            _ => None,
        }
    }

    /// 端点URI对应的scheme
    pub fn scheme(self) -> &'static str {
        match self {
            JobProtocol::Gridftp => "gsiftp",
            JobProtocol::Ssh => "ssh",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobProtocol {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobProtocol {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        JobProtocol::from_i64(v).ok_or_else(|| format!("Invalid job protocol: {v}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobProtocol {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i64 as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_i64(), buf)
    }
}

const S_IFMT: i64 = 0o170000;
const S_IFDIR: i64 = 0o040000;
const S_IFREG: i64 = 0o100000;

/// 目录清单中的单个stat记录，字段名沿用列目录工具的输出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatEntry {
    pub st_mode: i64,
    #[serde(default)]
    pub st_uid: i64,
    #[serde(default)]
    pub st_gid: i64,
    #[serde(default)]
    pub st_size: i64,
    #[serde(default)]
    pub st_mtime: i64,
    #[serde(default = "default_nlink")]
    pub st_nlink: i64,
    pub name: String,
}

fn default_nlink() -> i64 {
    1
}

impl StatEntry {
    pub fn is_regular(&self) -> bool {
        self.st_mode & S_IFMT == S_IFREG
    }

    pub fn is_directory(&self) -> bool {
        self.st_mode & S_IFMT == S_IFDIR
    }
}

/// 捕获的目录清单: 绝对目录路径 -> stat记录列表
pub type Listing = BTreeMap<String, Vec<StatEntry>>;

/// 作业: 用户提交的一次批量传输请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    /// 随机日志分片键，取前两个字符做日志目录分片
    pub log_uid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// 0-9，数值越小优先级越高
    pub priority: i64,
    pub protocol: JobProtocol,
    pub src_siteid: i64,
    pub src_filepath: String,
    pub dst_siteid: Option<i64>,
    pub dst_filepath: Option<String>,
    pub extra_opts: Option<String>,
    pub src_credentials: Option<String>,
    pub dst_credentials: Option<String>,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl Job {
    pub fn entity_description(&self) -> String {
        format!(
            "作业 '{}' (ID: {}, 类型: {})",
            self.log_uid,
            self.id,
            self.job_type.as_str()
        )
    }
}

/// 作业元素: 一次具体的列目录/拷贝/删除/重命名/建目录操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobElement {
    pub job_id: i64,
    /// 作业内从0起连续分配，0号永远是种子元素
    pub element_id: i64,
    #[serde(rename = "type")]
    pub element_type: JobType,
    pub src_filepath: String,
    pub dst_filepath: Option<String>,
    /// 字节大小，执行前未知时为0
    pub size: i64,
    pub max_tries: i64,
    pub attempts: i64,
    pub status: JobStatus,
    /// 单次领取令牌，上报后清除
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// 仅在LIST元素成功完成后存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
    pub timestamp: DateTime<Utc>,
}

impl JobElement {
    /// 元素是否还能被选取引擎领走
    pub fn is_claimable(&self) -> bool {
        matches!(self.status, JobStatus::New | JobStatus::Failed)
            && self.attempts < self.max_tries
    }

    pub fn entity_description(&self) -> String {
        format!(
            "作业元素 {}.{} (类型: {})",
            self.job_id,
            self.element_id,
            self.element_type.as_str()
        )
    }
}

/// 作业提交请求(服务端补上user_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_protocol")]
    pub protocol: JobProtocol,
    pub src_siteid: Option<i64>,
    pub src_filepath: Option<String>,
    pub dst_siteid: Option<i64>,
    pub dst_filepath: Option<String>,
    pub extra_opts: Option<String>,
    pub src_credentials: Option<String>,
    pub dst_credentials: Option<String>,
    #[serde(default = "default_max_tries")]
    pub max_tries: i64,
}

fn default_priority() -> i64 {
    5
}

fn default_protocol() -> JobProtocol {
    JobProtocol::Gridftp
}

fn default_max_tries() -> i64 {
    2
}

impl NewJob {
    pub fn fresh_log_uid() -> String {
        Uuid::new_v4().to_string()
    }
}

/// 展开引擎生成的新元素
#[derive(Debug, Clone, PartialEq)]
pub struct NewElement {
    pub element_type: JobType,
    pub src_filepath: String,
    pub dst_filepath: Option<String>,
    pub size: i64,
    pub max_tries: i64,
}
