//! 待录入工作列表
//!
//! 按优先级为结果录入界面排列已采样的检验单

use lis_core::{
    utils::{is_valid_sample_id, normalize_sample_id},
    LabTestOrder, LisError, OrderStage, Priority, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 工作列表过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkListFilter {
    pub priority: Option<Vec<Priority>>,
    pub test_name: Option<String>,
    pub limit: Option<usize>,
}

/// 工作列表统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkListStats {
    pub total_orders: usize,
    pub workload_by_priority: HashMap<Priority, usize>,
}

/// 待录入检验单队列
#[derive(Debug, Default)]
pub struct PendingOrderQueue {
    orders: HashMap<String, LabTestOrder>, // 规范化样本号 -> 检验单
}

impl PendingOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// 加入队列，只接受处于采样阶段的检验单
    pub fn enqueue(&mut self, order: LabTestOrder) -> Result<()> {
        if !is_valid_sample_id(&order.sample_id) {
            return Err(LisError::Validation(format!("invalid sample id {:?}", order.sample_id)));
        }
        if order.stage != OrderStage::Collected {
            return Err(LisError::Validation(format!(
                "sample {} is already {:?}",
                order.sample_id, order.stage
            )));
        }

        let key = normalize_sample_id(&order.sample_id);
        if self.orders.contains_key(&key) {
            return Err(LisError::Validation(format!("sample {} is already queued", order.sample_id)));
        }

        tracing::info!("Queued sample {} ({:?})", order.sample_id, order.priority);
        self.orders.insert(key, order);
        Ok(())
    }

    /// 按样本号查找
    pub fn lookup(&self, sample_id: &str) -> Option<&LabTestOrder> {
        self.orders.get(&normalize_sample_id(sample_id))
    }

    /// 取出检验单
    pub fn take(&mut self, sample_id: &str) -> Result<LabTestOrder> {
        self.orders
            .remove(&normalize_sample_id(sample_id))
            .ok_or_else(|| LisError::NotFound(format!("Sample {} not found", sample_id)))
    }

    /// 放回检验单（保存失败或取消选择时使用）
    pub fn restore(&mut self, order: LabTestOrder) {
        self.orders.insert(normalize_sample_id(&order.sample_id), order);
    }

    /// 按优先级（STAT 在前）和采样时间排序
    pub fn ordered(&self) -> Vec<&LabTestOrder> {
        self.query(&WorkListFilter::default())
    }

    /// 查询工作列表
    pub fn query(&self, filter: &WorkListFilter) -> Vec<&LabTestOrder> {
        let mut items: Vec<&LabTestOrder> = self.orders.values().collect();

        if let Some(priorities) = &filter.priority {
            items.retain(|order| priorities.contains(&order.priority));
        }

        if let Some(test_name) = &filter.test_name {
            let needle = test_name.to_lowercase();
            items.retain(|order| order.test_name.to_lowercase().contains(&needle));
        }

        items.sort_by(|a, b| match b.priority.cmp(&a.priority) {
            std::cmp::Ordering::Equal => a
                .collected_at
                .cmp(&b.collected_at)
                .then_with(|| a.sample_id.cmp(&b.sample_id)),
            other => other,
        });

        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }
        items
    }

    /// 工作列表统计
    pub fn stats(&self) -> WorkListStats {
        let mut workload_by_priority = HashMap::new();
        for order in self.orders.values() {
            *workload_by_priority.entry(order.priority).or_insert(0) += 1;
        }
        WorkListStats { total_orders: self.orders.len(), workload_by_priority }
    }
}
