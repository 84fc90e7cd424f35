//! 结果汇总与复核升级
//!
//! 检验单所有参数判定后，决定是否完整、是否需要提交给复核医生，
//! 并生成交由上层持久化的完成记录。

use crate::classifier::status_of;
use chrono::{DateTime, Utc};
use lis_core::{
    utils::generate_record_id, LabTestOrder, LisError, OrderStage, Physician, Priority, Result,
    ResultStatus, TestParameter,
};
use serde::{Deserialize, Serialize};

/// 单个异常发现
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbnormalFinding {
    pub parameter_id: String,
    pub name: String,
    pub value: String,
    pub status: ResultStatus,
}

/// 检验单评估结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderEvaluation {
    /// 所有参数均已填写
    pub complete: bool,
    /// 需要提交医生复核
    pub escalate: bool,
    /// 复核提示，仅在升级时给出
    pub message: Option<String>,
    pub abnormal_findings: Vec<AbnormalFinding>,
}

impl OrderEvaluation {
    /// 评估后检验单应处的阶段
    pub fn resulting_stage(&self) -> OrderStage {
        match (self.complete, self.escalate) {
            (true, true) => OrderStage::Flagged,
            (true, false) => OrderStage::Resulted,
            _ => OrderStage::Collected,
        }
    }
}

/// 评估检验单
///
/// 只有在检验单完整、已指定医生且至少一个参数异常时才升级。未指定医生时
/// 即使存在异常也不升级，不会自动分配医生。参数状态按当前录入值重新计算，
/// 不信任检验单上保存的旧状态。
pub fn evaluate_order(order: &LabTestOrder, physician: Option<&Physician>) -> OrderEvaluation {
    let complete = order.is_complete();

    let abnormal_findings: Vec<AbnormalFinding> = order
        .parameters
        .iter()
        .filter_map(|p| {
            let status = status_of(p);
            status.is_abnormal().then(|| AbnormalFinding {
                parameter_id: p.id.clone(),
                name: p.name.clone(),
                value: p.value.clone(),
                status,
            })
        })
        .collect();

    let escalate = complete && physician.is_some() && !abnormal_findings.is_empty();
    let message = match physician {
        Some(physician) if escalate => Some(review_message(order, physician, &abnormal_findings)),
        _ => None,
    };

    if escalate {
        tracing::warn!(
            "Sample {} has {} abnormal parameter(s); flagged for review",
            order.sample_id,
            abnormal_findings.len()
        );
    } else if complete && !abnormal_findings.is_empty() {
        tracing::info!(
            "Sample {} has abnormal results but no reviewing physician; escalation skipped",
            order.sample_id
        );
    }

    OrderEvaluation { complete, escalate, message, abnormal_findings }
}

fn review_message(order: &LabTestOrder, physician: &Physician, findings: &[AbnormalFinding]) -> String {
    let summary = findings
        .iter()
        .map(|f| format!("{} {} ({})", f.name, f.value, f.status))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Abnormal results for sample {} flagged for review by {}: {}",
        order.sample_id, physician, summary
    )
}

/// 保存前的完整性校验
pub fn ensure_complete(order: &LabTestOrder) -> Result<()> {
    let missing = order.missing_parameters();
    if missing.is_empty() {
        return Ok(());
    }

    let names = missing.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
    Err(LisError::Validation(format!(
        "sample {} is missing values for: {}",
        order.sample_id, names
    )))
}

/// 交由上层持久化的完成记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub record_id: String,
    pub sample_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub test_name: String,
    pub priority: Priority,
    pub parameters: Vec<TestParameter>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physician: Option<Physician>,
    pub stage: OrderStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// 由已判定的检验单和评估结果生成记录
    pub fn new(
        order: &LabTestOrder,
        evaluation: &OrderEvaluation,
        notes: impl Into<String>,
        physician: Option<&Physician>,
    ) -> Self {
        Self {
            record_id: generate_record_id(),
            sample_id: order.sample_id.clone(),
            patient_id: order.patient_id.clone(),
            test_name: order.test_name.clone(),
            priority: order.priority,
            parameters: order.parameters.clone(),
            notes: notes.into(),
            physician: physician.cloned(),
            stage: evaluation.resulting_stage(),
            review_message: evaluation.message.clone(),
            completed_at: Utc::now(),
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.stage == OrderStage::Flagged
    }
}
