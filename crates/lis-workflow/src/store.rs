//! 结果持久化接口
//!
//! 持久化由宿主应用提供，引擎只通过 [`ResultStore`] 调用，失败时不重试。

use crate::escalation::CompletionRecord;
use async_trait::async_trait;
use lis_core::{
    utils::{is_valid_sample_id, normalize_sample_id},
    LisError, Result,
};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// 结果存储
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 保存一条完成记录
    async fn save_result(&self, record: &CompletionRecord) -> Result<()>;
}

/// 内存存储，用于测试和演示
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<Vec<CompletionRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<CompletionRecord> {
        self.records.read().await.clone()
    }

    /// 某样本被保存的次数
    pub async fn save_count(&self, sample_id: &str) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.sample_id == sample_id)
            .count()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(&self, record: &CompletionRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        tracing::debug!("Stored result record {} in memory", record.record_id);
        Ok(())
    }
}

/// 以目录保存 JSON 文件，每个样本一个文件
#[derive(Debug, Clone)]
pub struct JsonDirResultStore {
    root: PathBuf,
}

impl JsonDirResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, sample_id: &str) -> Result<PathBuf> {
        if !is_valid_sample_id(sample_id) {
            return Err(LisError::Persistence(format!(
                "sample id {:?} cannot be used as a file name",
                sample_id
            )));
        }
        Ok(self.root.join(format!("{}.json", normalize_sample_id(sample_id))))
    }
}

#[async_trait]
impl ResultStore for JsonDirResultStore {
    async fn save_result(&self, record: &CompletionRecord) -> Result<()> {
        let path = self.record_path(&record.sample_id)?;
        let body = serde_json::to_vec_pretty(record)?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            LisError::Persistence(format!("failed to create {}: {}", self.root.display(), e))
        })?;
        tokio::fs::write(&path, body).await.map_err(|e| {
            LisError::Persistence(format!("failed to write {}: {}", path.display(), e))
        })?;

        tracing::info!("Saved result for sample {} to {}", record.sample_id, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{evaluate_order, CompletionRecord};
    use lis_core::{LabTestOrder, Priority, TestParameter, ValueType};

    fn record(sample_id: &str) -> CompletionRecord {
        let mut param = TestParameter::new("plt", "Platelets", "x10^9/L", "150-400", ValueType::Number);
        param.value = "220".to_string();
        let order = LabTestOrder::new(sample_id, "CBC", Priority::Routine, vec![param]);
        let evaluation = evaluate_order(&order, None);
        CompletionRecord::new(&order, &evaluation, "", None)
    }

    #[tokio::test]
    async fn test_in_memory_store_counts_saves() {
        let store = InMemoryResultStore::new();
        store.save_result(&record("SMP-1")).await.unwrap();
        store.save_result(&record("SMP-2")).await.unwrap();

        assert_eq!(store.records().await.len(), 2);
        assert_eq!(store.save_count("SMP-1").await, 1);
    }

    #[tokio::test]
    async fn test_json_dir_store_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirResultStore::new(dir.path().join("results"));
        store.save_result(&record("smp-9")).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("results").join("SMP-9.json")).unwrap();
        let parsed: CompletionRecord = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.sample_id, "smp-9");
    }

    #[tokio::test]
    async fn test_json_dir_store_rejects_path_like_sample_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirResultStore::new(dir.path());
        let err = store.save_result(&record("../escape")).await.unwrap_err();
        assert!(matches!(err, LisError::Persistence(_)));
    }
}
