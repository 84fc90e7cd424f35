//! 检验单状态机
//!
//! 管理检验单从采样到出结果、再到待复核的阶段转换

use lis_core::{LisError, OrderStage, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 检验单状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    ResultsEntered, // 所有参数已填写并保存
    Escalated,      // 提交医生复核
}

/// 检验单状态机
#[derive(Debug)]
pub struct OrderStateMachine {
    transitions: HashMap<(OrderStage, OrderEvent), OrderStage>,
}

impl OrderStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((OrderStage::Collected, OrderEvent::ResultsEntered), OrderStage::Resulted);
        transitions.insert((OrderStage::Resulted, OrderEvent::Escalated), OrderStage::Flagged);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: OrderStage, event: OrderEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: OrderStage, event: OrderEvent) -> Result<OrderStage> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| LisError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current: OrderStage) -> Vec<OrderEvent> {
        self.transitions
            .keys()
            .filter(|(stage, _)| *stage == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for OrderStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 样本号到当前阶段的映射
#[derive(Debug, Default)]
pub struct OrderArena {
    machine: OrderStateMachine,
    stages: HashMap<String, OrderStage>,
}

impl OrderArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个样本；已登记的样本保持原阶段
    pub fn register(&mut self, sample_id: &str, stage: OrderStage) -> OrderStage {
        *self.stages.entry(sample_id.to_string()).or_insert(stage)
    }

    pub fn stage(&self, sample_id: &str) -> Option<OrderStage> {
        self.stages.get(sample_id).copied()
    }

    /// 事件能否应用于样本；未登记的样本按采样阶段处理
    pub fn can_apply(&self, sample_id: &str, event: OrderEvent) -> bool {
        let current = self.stage(sample_id).unwrap_or_default();
        self.machine.can_transition(current, event)
    }

    /// 对样本应用事件
    pub fn apply(&mut self, sample_id: &str, event: OrderEvent) -> Result<OrderStage> {
        let current = self
            .stages
            .get(sample_id)
            .copied()
            .ok_or_else(|| LisError::NotFound(format!("Sample {} is not tracked", sample_id)))?;
        let next = self.machine.transition(current, event)?;
        self.stages.insert(sample_id.to_string(), next);

        tracing::info!("Sample {} moved from {:?} to {:?}", sample_id, current, next);
        Ok(next)
    }

    /// 处于指定阶段的样本
    pub fn samples_in(&self, stage: OrderStage) -> Vec<&str> {
        let mut samples: Vec<&str> = self
            .stages
            .iter()
            .filter(|(_, s)| **s == stage)
            .map(|(id, _)| id.as_str())
            .collect();
        samples.sort_unstable();
        samples
    }
}
