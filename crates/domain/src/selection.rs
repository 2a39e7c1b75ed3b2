use datamover_errors::{DatamoverError, DatamoverResult};
use serde::Deserialize;

use crate::entities::{JobElement, JobType};

pub const DEFAULT_BY_NUMBER_LIMIT: usize = 20;
pub const DEFAULT_SIZE_BUDGET: i64 = 150_000_000;
pub const DEFAULT_LIST_LIMIT: usize = 20;
/// by_size会跳过超预算的元素继续扫描，候选查询仍要有个上限，
/// 免得深队列把整个表拉进领取事务
pub const BY_SIZE_SCAN_LIMIT: usize = 1000;

/// 工作选取算法，封闭枚举，只有两种具名策略。
///
/// 两种算法都只考虑 status ∈ {NEW, FAILED} 且 attempts < max_tries
/// 的元素，按 (作业优先级, 作业id, 元素状态) 升序排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAlgorithm {
    /// 简单的优先级/FIFO队列，带页大小上限
    ByNumber { limit: usize },
    /// 字节预算下的贪心装箱，超预算的元素跳过而不是终止扫描;
    /// list_limit限制一批里零大小LIST侦察元素的数量
    BySize { size_budget: i64, list_limit: usize },
}

impl Default for SelectionAlgorithm {
    fn default() -> Self {
        SelectionAlgorithm::ByNumber {
            limit: DEFAULT_BY_NUMBER_LIMIT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AlgorithmArgs {
    limit: Option<usize>,
    size_budget: Option<i64>,
    list_limit: Option<usize>,
}

impl SelectionAlgorithm {
    /// 从请求里的算法名和参数解析，未知算法名是校验错误
    pub fn from_request(
        name: Option<&str>,
        args: Option<&serde_json::Value>,
    ) -> DatamoverResult<Self> {
        let args: AlgorithmArgs = match args {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| DatamoverError::validation_error(format!("无效的算法参数: {e}")))?,
            None => AlgorithmArgs::default(),
        };
        match name.unwrap_or("by_number") {
            "by_number" => Ok(SelectionAlgorithm::ByNumber {
                limit: args.limit.unwrap_or(DEFAULT_BY_NUMBER_LIMIT),
            }),
            "by_size" => Ok(SelectionAlgorithm::BySize {
                size_budget: args.size_budget.unwrap_or(DEFAULT_SIZE_BUDGET),
                list_limit: args.list_limit.unwrap_or(DEFAULT_LIST_LIMIT),
            }),
            other => Err(DatamoverError::validation_error(format!(
                "未知的选取算法: {other}"
            ))),
        }
    }

    /// by_size需要附加的 size 降序排序键
    pub fn orders_by_size(&self) -> bool {
        matches!(self, SelectionAlgorithm::BySize { .. })
    }

    /// 候选查询的行数上限。by_number选前limit个，查limit行就够;
    /// by_size可能跳过任意多的超预算元素，给一个宽松的固定上限。
    pub fn scan_limit(&self) -> usize {
        match *self {
            SelectionAlgorithm::ByNumber { limit } => limit,
            SelectionAlgorithm::BySize { .. } => BY_SIZE_SCAN_LIMIT,
        }
    }

    /// 在已按排序键排好序的候选列表上应用选取算法
    pub fn apply(&self, candidates: Vec<JobElement>) -> Vec<JobElement> {
        match *self {
            SelectionAlgorithm::ByNumber { limit } => {
                candidates.into_iter().take(limit).collect()
            }
            SelectionAlgorithm::BySize {
                size_budget,
                list_limit,
            } => {
                let mut chosen = Vec::new();
                let mut total: i64 = 0;
                let mut lists = 0usize;
                for element in candidates {
                    if element.element_type == JobType::List && element.size == 0 {
                        if lists >= list_limit {
                            continue;
                        }
                        lists += 1;
                        chosen.push(element);
                        continue;
                    }
                    // 超出预算的元素跳过，后面更小的仍有机会入选
                    if total + element.size > size_budget {
                        continue;
                    }
                    total += element.size;
                    chosen.push(element);
                }
                chosen
            }
        }
    }
}
