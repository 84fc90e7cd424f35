//! # 检验结果工作流模块
//!
//! 提供检验结果录入的完整判定流程，包括：
//! - 参考范围解析：把目录中的参考范围文本转换为比较规则
//! - 参数分类：将录入值判定为正常、偏低、偏高或危急
//! - 汇总与升级：判断检验单是否完整、是否需要医生复核
//! - 批量录入：会话内累积多个检验单后一次提交
//! - 检验单状态机与待录入工作列表

pub mod batch;
pub mod classifier;
pub mod engine;
pub mod escalation;
pub mod reference_range;
pub mod state_machine;
pub mod store;
pub mod worklist;

// 重新导出主要类型
pub use batch::{BatchAccumulator, BatchEntry};
pub use classifier::{classify, refresh_order, refresh_parameter, status_of, AbnormalMarker};
pub use engine::{ResultEntryEngine, ResultEntryForm, SaveOutcome};
pub use escalation::{ensure_complete, evaluate_order, AbnormalFinding, CompletionRecord, OrderEvaluation};
pub use reference_range::{parse_reference_range, unparsed_numeric_ranges, RangeRule, ThresholdDirection};
pub use state_machine::{OrderArena, OrderEvent, OrderStateMachine};
pub use store::{InMemoryResultStore, JsonDirResultStore, ResultStore};
pub use worklist::{PendingOrderQueue, WorkListFilter, WorkListStats};
