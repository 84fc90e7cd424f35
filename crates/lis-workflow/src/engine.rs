//! 结果录入引擎
//!
//! 协调工作列表、阶段状态机、批次累加器和结果存储。录入界面的全部状态
//! （当前样本、备注、复核医生、批量模式）都是引擎的显式字段，不依赖全局状态。

use crate::{
    batch::BatchAccumulator,
    classifier::{refresh_order, refresh_parameter},
    escalation::{ensure_complete, evaluate_order, CompletionRecord, OrderEvaluation},
    state_machine::{OrderArena, OrderEvent},
    store::ResultStore,
    worklist::PendingOrderQueue,
};
use lis_core::{utils::normalize_sample_id, LabTestOrder, LisError, OrderStage, Physician, Result, ResultStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 当前录入表单
#[derive(Debug, Clone)]
pub struct ResultEntryForm {
    pub order: LabTestOrder,
    pub notes: String,
    pub physician: Option<Physician>,
}

/// 保存结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub sample_id: String,
    pub evaluation: OrderEvaluation,
    /// 检验单到达（或批次提交后将到达）的阶段
    pub stage: OrderStage,
    /// 已进入批次，尚未持久化
    pub batched: bool,
}

/// 结果录入引擎
pub struct ResultEntryEngine {
    worklist: PendingOrderQueue,
    arena: OrderArena,
    batch: BatchAccumulator,
    batched_orders: Vec<LabTestOrder>,
    batch_mode: bool,
    form: Option<ResultEntryForm>,
    store: Arc<dyn ResultStore>,
}

impl ResultEntryEngine {
    /// 创建新的录入引擎
    pub fn new(store: Arc<dyn ResultStore>, batch_mode: bool) -> Self {
        Self {
            worklist: PendingOrderQueue::new(),
            arena: OrderArena::new(),
            batch: BatchAccumulator::new(),
            batched_orders: Vec::new(),
            batch_mode,
            form: None,
            store,
        }
    }

    /// 接收上游已采样的检验单
    ///
    /// 已出结果、正在录入或已在批次中的样本会被拒绝。
    pub fn enqueue_order(&mut self, order: LabTestOrder) -> Result<()> {
        if let Some(stage) = self.arena.stage(&order.sample_id) {
            if stage != OrderStage::Collected {
                return Err(LisError::Validation(format!(
                    "sample {} has already been resulted",
                    order.sample_id
                )));
            }
        }
        if self.is_in_progress(&order.sample_id) {
            return Err(LisError::Validation(format!(
                "sample {} is already being resulted",
                order.sample_id
            )));
        }
        let sample_id = order.sample_id.clone();
        self.worklist.enqueue(order)?;
        self.arena.register(&sample_id, OrderStage::Collected);
        Ok(())
    }

    /// 样本是否是当前表单或批次中的检验单
    fn is_in_progress(&self, sample_id: &str) -> bool {
        let key = normalize_sample_id(sample_id);
        self.form
            .as_ref()
            .is_some_and(|form| normalize_sample_id(&form.order.sample_id) == key)
            || self
                .batched_orders
                .iter()
                .any(|order| normalize_sample_id(&order.sample_id) == key)
    }

    pub fn worklist(&self) -> &PendingOrderQueue {
        &self.worklist
    }

    pub fn stage_of(&self, sample_id: &str) -> Option<OrderStage> {
        self.arena.stage(sample_id)
    }

    pub fn batch(&self) -> &BatchAccumulator {
        &self.batch
    }

    pub fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    pub fn set_batch_mode(&mut self, enabled: bool) {
        tracing::info!("Batch mode {}", if enabled { "enabled" } else { "disabled" });
        self.batch_mode = enabled;
    }

    pub fn form(&self) -> Option<&ResultEntryForm> {
        self.form.as_ref()
    }

    fn form_mut(&mut self) -> Result<&mut ResultEntryForm> {
        self.form
            .as_mut()
            .ok_or_else(|| LisError::Validation("no sample selected".to_string()))
    }

    /// 选择样本开始录入；之前选中的样本放回工作列表
    pub fn select_sample(&mut self, sample_id: &str) -> Result<&ResultEntryForm> {
        let mut order = self.worklist.take(sample_id)?;
        self.cancel_selection();

        refresh_order(&mut order);
        tracing::info!("Selected sample {} for result entry", order.sample_id);
        Ok(&*self.form.insert(ResultEntryForm { order, notes: String::new(), physician: None }))
    }

    /// 放弃当前录入，检验单放回工作列表
    pub fn cancel_selection(&mut self) {
        if let Some(form) = self.form.take() {
            tracing::debug!("Returning sample {} to the worklist", form.order.sample_id);
            self.worklist.restore(form.order);
        }
    }

    /// 录入参数值并立即重新判定
    pub fn enter_value(&mut self, parameter_id: &str, value: impl Into<String>) -> Result<ResultStatus> {
        let form = self.form_mut()?;
        let sample_id = form.order.sample_id.clone();
        let parameter = form.order.parameter_mut(parameter_id).ok_or_else(|| {
            LisError::NotFound(format!("Parameter {} not found on sample {}", parameter_id, sample_id))
        })?;
        parameter.value = value.into();
        Ok(refresh_parameter(parameter))
    }

    /// 对文本参数做人工判定
    pub fn override_text_status(&mut self, parameter_id: &str, status: ResultStatus) -> Result<ResultStatus> {
        let form = self.form_mut()?;
        let parameter = form
            .order
            .parameter_mut(parameter_id)
            .ok_or_else(|| LisError::NotFound(format!("Parameter {} not found", parameter_id)))?;
        parameter.override_status(status)?;
        Ok(refresh_parameter(parameter))
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) -> Result<()> {
        self.form_mut()?.notes = notes.into();
        Ok(())
    }

    /// 指定（或清除）复核医生
    pub fn assign_physician(&mut self, physician: Option<Physician>) -> Result<()> {
        self.form_mut()?.physician = physician;
        Ok(())
    }

    /// 当前表单的评估结果
    pub fn current_evaluation(&self) -> Option<OrderEvaluation> {
        self.form
            .as_ref()
            .map(|form| evaluate_order(&form.order, form.physician.as_ref()))
    }

    /// 保存当前检验单
    ///
    /// 不完整时返回校验错误；持久化失败时返回错误且表单保持不变，可直接重试。
    /// 批量模式下检验单进入批次，批次本身不会因单次保存而清空。
    pub async fn save(&mut self) -> Result<SaveOutcome> {
        let form = self
            .form
            .as_ref()
            .ok_or_else(|| LisError::Validation("no sample selected".to_string()))?;

        if let Err(e) = ensure_complete(&form.order) {
            tracing::warn!("Rejected save: {}", e);
            return Err(e);
        }

        let sample_id = form.order.sample_id.clone();
        if !self.arena.can_apply(&sample_id, OrderEvent::ResultsEntered) {
            let from = self.arena.stage(&sample_id).unwrap_or_default();
            tracing::warn!("Rejected save: sample {} is already {:?}", sample_id, from);
            return Err(LisError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", OrderEvent::ResultsEntered),
            });
        }

        let evaluation = evaluate_order(&form.order, form.physician.as_ref());

        let outcome = if self.batch_mode {
            self.batch.add_to_batch(
                &form.order,
                form.order.parameters.clone(),
                form.notes.clone(),
                form.physician.as_ref(),
            )?;
            self.batched_orders.retain(|o| o.sample_id != sample_id);
            self.batched_orders.push(form.order.clone());
            SaveOutcome {
                sample_id,
                stage: evaluation.resulting_stage(),
                evaluation,
                batched: true,
            }
        } else {
            let record = CompletionRecord::new(
                &form.order,
                &evaluation,
                form.notes.clone(),
                form.physician.as_ref(),
            );
            if let Err(e) = self.store.save_result(&record).await {
                tracing::error!("Failed to save sample {}: {}", sample_id, e);
                return Err(e);
            }
            let stage = self.advance_stage(&sample_id, &evaluation)?;
            SaveOutcome { sample_id, stage, evaluation, batched: false }
        };

        self.form = None;
        Ok(outcome)
    }

    /// 提交批次，返回本次成功保存的数量
    pub async fn commit_batch(&mut self) -> Result<usize> {
        let result = self.batch.commit_batch(self.store.as_ref()).await;

        let newly_completed: Vec<(String, OrderEvaluation)> = self
            .batch
            .entries()
            .iter()
            .filter(|e| e.completed && self.arena.stage(&e.record.sample_id) == Some(OrderStage::Collected))
            .map(|e| (e.record.sample_id.clone(), e.evaluation.clone()))
            .collect();
        for (sample_id, evaluation) in &newly_completed {
            self.advance_stage(sample_id, evaluation)?;
        }

        let committed = result?;
        self.batch.clear();
        self.batched_orders.clear();
        self.cancel_selection();
        Ok(committed)
    }

    /// 放弃批次，未提交的检验单放回工作列表
    pub fn abandon_batch(&mut self) {
        let completed: Vec<&str> = self
            .batch
            .entries()
            .iter()
            .filter(|e| e.completed)
            .map(|e| e.record.sample_id.as_str())
            .collect();
        let requeue: Vec<LabTestOrder> = self
            .batched_orders
            .drain(..)
            .filter(|o| !completed.contains(&o.sample_id.as_str()))
            .collect();

        for order in requeue {
            self.worklist.restore(order);
        }
        self.batch.clear();
    }

    fn advance_stage(&mut self, sample_id: &str, evaluation: &OrderEvaluation) -> Result<OrderStage> {
        self.arena.register(sample_id, OrderStage::Collected);
        let mut stage = self.arena.apply(sample_id, OrderEvent::ResultsEntered)?;
        if evaluation.escalate {
            stage = self.arena.apply(sample_id, OrderEvent::Escalated)?;
            if let Some(message) = &evaluation.message {
                tracing::warn!("{}", message);
            }
        }
        Ok(stage)
    }
}

impl std::fmt::Debug for ResultEntryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultEntryEngine")
            .field("worklist", &self.worklist)
            .field("arena", &self.arena)
            .field("batch", &self.batch)
            .field("batch_mode", &self.batch_mode)
            .field("form", &self.form)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryResultStore;
    use lis_core::{Priority, TestParameter, ValueType};

    fn lipid_order(sample_id: &str) -> LabTestOrder {
        LabTestOrder::new(
            sample_id,
            "Lipid panel",
            Priority::Routine,
            vec![
                TestParameter::new("chol", "Total cholesterol", "mg/dL", "<200", ValueType::Number),
                TestParameter::new("hdl", "HDL", "mg/dL", ">40", ValueType::Number),
            ],
        )
    }

    fn engine(batch_mode: bool) -> (ResultEntryEngine, Arc<InMemoryResultStore>) {
        let store = Arc::new(InMemoryResultStore::new());
        (ResultEntryEngine::new(store.clone(), batch_mode), store)
    }

    #[tokio::test]
    async fn test_individual_save_resets_form() {
        let (mut engine, store) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();

        assert_eq!(engine.enter_value("chol", "180").unwrap(), ResultStatus::Normal);
        assert_eq!(engine.enter_value("hdl", "55").unwrap(), ResultStatus::Normal);
        engine.set_notes("fasting").unwrap();

        let outcome = engine.save().await.unwrap();
        assert!(!outcome.batched);
        assert_eq!(outcome.stage, OrderStage::Resulted);
        assert!(engine.form().is_none());
        assert_eq!(engine.stage_of("SMP-1"), Some(OrderStage::Resulted));
        assert_eq!(store.records().await[0].notes, "fasting");
    }

    #[tokio::test]
    async fn test_incomplete_save_is_rejected_and_form_kept() {
        let (mut engine, store) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();
        engine.enter_value("chol", "180").unwrap();

        let err = engine.save().await.unwrap_err();
        assert!(err.is_validation());
        assert!(engine.form().is_some());
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_without_selection_is_validation_error() {
        let (mut engine, _) = engine(false);
        assert!(engine.save().await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_escalation_flags_stage() {
        let (mut engine, _) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();
        engine.enter_value("chol", "450").unwrap();
        engine.enter_value("hdl", "50").unwrap();
        engine.assign_physician(Some(Physician::new("D-2", "Lindqvist"))).unwrap();

        let outcome = engine.save().await.unwrap();
        assert!(outcome.evaluation.escalate);
        assert_eq!(outcome.stage, OrderStage::Flagged);
        assert_eq!(engine.stage_of("SMP-1"), Some(OrderStage::Flagged));
    }

    #[tokio::test]
    async fn test_batch_save_keeps_accumulator_until_commit() {
        let (mut engine, store) = engine(true);
        for id in ["SMP-1", "SMP-2"] {
            engine.enqueue_order(lipid_order(id)).unwrap();
            engine.select_sample(id).unwrap();
            engine.enter_value("chol", "190").unwrap();
            engine.enter_value("hdl", "30").unwrap();
            let outcome = engine.save().await.unwrap();
            assert!(outcome.batched);
            assert!(engine.form().is_none());
        }

        assert_eq!(engine.batch().len(), 2);
        assert!(store.records().await.is_empty());
        assert_eq!(engine.stage_of("SMP-1"), Some(OrderStage::Collected));

        assert_eq!(engine.commit_batch().await.unwrap(), 2);
        assert!(engine.batch().is_empty());
        assert_eq!(store.records().await.len(), 2);
        assert_eq!(engine.stage_of("SMP-2"), Some(OrderStage::Resulted));
    }

    #[tokio::test]
    async fn test_abandon_batch_requeues_orders() {
        let (mut engine, store) = engine(true);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();
        engine.enter_value("chol", "190").unwrap();
        engine.enter_value("hdl", "60").unwrap();
        engine.save().await.unwrap();
        assert!(engine.worklist().is_empty());

        engine.abandon_batch();
        assert!(engine.batch().is_empty());
        assert!(engine.worklist().lookup("SMP-1").is_some());
        assert!(store.records().await.is_empty());
    }

    #[test]
    fn test_switching_selection_returns_previous_order() {
        let (mut engine, _) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.enqueue_order(lipid_order("SMP-2")).unwrap();

        engine.select_sample("SMP-1").unwrap();
        engine.select_sample("SMP-2").unwrap();
        assert!(engine.worklist().lookup("SMP-1").is_some());
        assert_eq!(engine.form().unwrap().order.sample_id, "SMP-2");
    }

    #[tokio::test]
    async fn test_commit_batch_returns_open_selection_to_worklist() {
        let (mut engine, _) = engine(true);
        for id in ["SMP-1", "SMP-2"] {
            engine.enqueue_order(lipid_order(id)).unwrap();
        }
        engine.select_sample("SMP-1").unwrap();
        engine.enter_value("chol", "190").unwrap();
        engine.enter_value("hdl", "60").unwrap();
        engine.save().await.unwrap();

        engine.select_sample("SMP-2").unwrap();
        engine.enter_value("chol", "210").unwrap();
        assert_eq!(engine.commit_batch().await.unwrap(), 1);

        assert!(engine.form().is_none());
        assert!(engine.worklist().lookup("SMP-2").is_some());
        assert_eq!(engine.stage_of("SMP-2"), Some(OrderStage::Collected));
        engine.select_sample("SMP-2").unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_rejects_sample_in_progress() {
        let (mut engine, _) = engine(true);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.enqueue_order(lipid_order("SMP-2")).unwrap();

        engine.select_sample("SMP-1").unwrap();
        assert!(engine.enqueue_order(lipid_order("smp-1")).unwrap_err().is_validation());

        engine.enter_value("chol", "190").unwrap();
        engine.enter_value("hdl", "60").unwrap();
        engine.save().await.unwrap();
        assert!(engine.enqueue_order(lipid_order("SMP-1")).unwrap_err().is_validation());

        engine.commit_batch().await.unwrap();
        assert!(engine.enqueue_order(lipid_order("SMP-1")).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_save_of_resulted_sample_persists_nothing() {
        let (mut engine, store) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();
        engine.enter_value("chol", "190").unwrap();
        engine.enter_value("hdl", "60").unwrap();
        engine.save().await.unwrap();

        // 绕过入队检查，直接放回一份重复的检验单
        let mut duplicate = lipid_order("SMP-1");
        duplicate.parameters[0].value = "190".to_string();
        duplicate.parameters[1].value = "60".to_string();
        engine.worklist.restore(duplicate);
        engine.select_sample("SMP-1").unwrap();

        let err = engine.save().await.unwrap_err();
        assert!(matches!(err, LisError::InvalidStateTransition { .. }));
        assert!(engine.save().await.is_err());
        assert_eq!(store.save_count("SMP-1").await, 1);
        assert_eq!(engine.stage_of("SMP-1"), Some(OrderStage::Resulted));
    }

    #[test]
    fn test_unknown_parameter() {
        let (mut engine, _) = engine(false);
        engine.enqueue_order(lipid_order("SMP-1")).unwrap();
        engine.select_sample("SMP-1").unwrap();
        assert!(matches!(engine.enter_value("ldl", "100"), Err(LisError::NotFound(_))));
    }
}
