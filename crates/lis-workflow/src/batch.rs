//! 批量录入累加器
//!
//! 批量模式下，保存成功的检验单先进入累加器，由一次“提交批次”统一持久化。
//! 累加器只存在于当前会话内，放弃会话即丢弃，不做任何回滚。

use crate::classifier::refresh_parameter;
use crate::escalation::{ensure_complete, evaluate_order, CompletionRecord, OrderEvaluation};
use crate::store::ResultStore;
use lis_core::{LabTestOrder, LisError, Physician, Result, TestParameter};
use serde::{Deserialize, Serialize};

/// 批次条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub record: CompletionRecord,
    pub evaluation: OrderEvaluation,
    /// 已成功持久化
    pub completed: bool,
}

/// 会话内的批次累加器
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    entries: Vec<BatchEntry>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 尚未持久化的条目数
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.completed).count()
    }

    /// 将已判定的检验单加入批次
    ///
    /// `parameters` 会重新判定后替换检验单原有参数。同一样本尚未提交的旧条目
    /// 会被新条目替换。
    pub fn add_to_batch(
        &mut self,
        order: &LabTestOrder,
        parameters: Vec<TestParameter>,
        notes: impl Into<String>,
        physician: Option<&Physician>,
    ) -> Result<&BatchEntry> {
        let mut order = order.clone();
        order.parameters = parameters;
        for parameter in &mut order.parameters {
            refresh_parameter(parameter);
        }
        ensure_complete(&order)?;

        let evaluation = evaluate_order(&order, physician);
        let record = CompletionRecord::new(&order, &evaluation, notes, physician);
        let entry = BatchEntry { record, evaluation, completed: false };

        let position = self
            .entries
            .iter()
            .position(|e| !e.completed && e.record.sample_id == order.sample_id);
        let index = match position {
            Some(index) => {
                tracing::info!("Replacing pending batch entry for sample {}", order.sample_id);
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };

        tracing::info!(
            "Sample {} added to batch ({} pending)",
            order.sample_id,
            self.pending_count()
        );
        Ok(&self.entries[index])
    }

    /// 逐条持久化尚未完成的条目，返回本次成功数
    ///
    /// 已完成的条目直接跳过，因此重复提交不会重复保存。任一条目失败时返回
    /// 持久化错误；成功的条目已标记完成，失败的条目保持待提交，可直接重试。
    pub async fn commit_batch(&mut self, store: &dyn ResultStore) -> Result<usize> {
        let mut committed = 0;
        let mut failures = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| !e.completed) {
            match store.save_result(&entry.record).await {
                Ok(()) => {
                    entry.completed = true;
                    committed += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to commit sample {}: {}", entry.record.sample_id, e);
                    failures.push(entry.record.sample_id.clone());
                }
            }
        }

        if !failures.is_empty() {
            return Err(LisError::Persistence(format!(
                "batch commit failed for {} sample(s): {} ({} committed)",
                failures.len(),
                failures.join(", "),
                committed
            )));
        }

        tracing::info!("Batch committed: {} record(s) saved", committed);
        Ok(committed)
    }

    /// 清空累加器
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::info!("Discarding batch of {} entries", self.entries.len());
        }
        self.entries.clear();
    }
}
