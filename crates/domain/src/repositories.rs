use async_trait::async_trait;
use datamover_errors::DatamoverResult;
use serde::{Deserialize, Serialize};

use crate::entities::{Job, JobElement, JobStatus, JobType, NewElement, NewJob};
use crate::selection::SelectionAlgorithm;

/// 领取结果: 一个作业及其本次被领走的元素(已带上各自的令牌)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    #[serde(flatten)]
    pub job: Job,
    pub elements: Vec<JobElement>,
}

/// 作业/元素存储的统一接口。
///
/// 存储层是作业和元素的唯一属主; 所有修改都在单个事务内完成，
/// 失败时整体回滚。
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建作业并原子地创建其0号种子元素
    async fn create_job(&self, user_id: i64, new_job: NewJob) -> DatamoverResult<Job>;

    async fn get_jobs(&self, user_id: i64) -> DatamoverResult<Vec<Job>>;

    async fn get_job(&self, id: i64, user_id: i64) -> DatamoverResult<Job>;

    /// 不做用户范围限制的作业查询，仅供Worker上报路径使用
    async fn find_job(&self, id: i64) -> DatamoverResult<Job>;

    async fn get_elements(&self, job_id: i64, user_id: i64) -> DatamoverResult<Vec<JobElement>>;

    async fn get_element(
        &self,
        job_id: i64,
        element_id: i64,
        user_id: i64,
    ) -> DatamoverResult<JobElement>;

    /// 不做用户范围限制的元素查询，仅供Worker上报路径使用
    async fn find_element(&self, job_id: i64, element_id: i64) -> DatamoverResult<JobElement>;

    /// 把元素当前内存状态合并回存储; 重试次数超限时返回
    /// RetriesExhausted而不是笼统的存储错误
    async fn update_element(&self, element: &JobElement) -> DatamoverResult<()>;

    /// 展开引擎专用: 在事务内按顺序分配元素id并插入
    async fn add_elements(
        &self,
        job_id: i64,
        elements: Vec<NewElement>,
    ) -> DatamoverResult<Vec<JobElement>>;

    /// 作业状态 = 当前所有元素状态按既定顺序取最大值
    async fn recompute_job_status(&self, job_id: i64) -> DatamoverResult<JobStatus>;

    /// 显式覆盖作业状态，仅用于展开时的目标路径冲突
    async fn set_job_status(&self, job_id: i64, status: JobStatus) -> DatamoverResult<()>;

    /// 运行选取算法领取一批元素: 被选中的元素在返回前已置为
    /// SUBMITTED并盖上单次令牌，并发领取互不重叠
    async fn claim_elements(
        &self,
        types: &[JobType],
        algorithm: SelectionAlgorithm,
    ) -> DatamoverResult<Vec<ClaimedJob>>;
}
