//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LisError, Result};

/// 检验参数的取值类型，决定采用哪种分类策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number, // 数值
    Text,   // 自由文本
    Select, // 固定选项
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Number => write!(f, "number"),
            ValueType::Text => write!(f, "text"),
            ValueType::Select => write!(f, "select"),
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = LisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" => Ok(ValueType::Number),
            "text" => Ok(ValueType::Text),
            "select" => Ok(ValueType::Select),
            other => Err(LisError::Validation(format!("unknown value type: {}", other))),
        }
    }
}

/// 结果判定状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ResultStatus {
    #[default]
    Normal,   // 正常
    Low,      // 偏低
    High,     // 偏高
    Critical, // 危急
    Abnormal, // 异常（仅人工判定）
}

impl ResultStatus {
    /// 是否需要医生复核
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ResultStatus::Normal)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResultStatus::Normal => "Normal",
            ResultStatus::Low => "Low",
            ResultStatus::High => "High",
            ResultStatus::Critical => "Critical",
            ResultStatus::Abnormal => "Abnormal",
        };
        write!(f, "{}", label)
    }
}

/// 检验单优先级，只影响队列排序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    Routine, // 常规
    High,    // 高
    Urgent,  // 紧急
    #[serde(rename = "STAT")]
    Stat,    // 立即
}

/// 检验单所处阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum OrderStage {
    #[default]
    Collected, // 已采样
    Resulted,  // 已出结果
    Flagged,   // 已出结果且待医生复核
}

/// 单个检验参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestParameter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub reference_range: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// select 类型的可选值
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub value: String,
    /// 由分类器写入，调用方不应直接修改
    #[serde(default)]
    pub status: ResultStatus,
    /// 文本类型参数的人工判定
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<ResultStatus>,
}

impl TestParameter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        reference_range: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit: unit.into(),
            reference_range: reference_range.into(),
            value_type,
            options: Vec::new(),
            value: String::new(),
            status: ResultStatus::Normal,
            status_override: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// 是否已填写结果
    pub fn is_filled(&self) -> bool {
        !self.value.trim().is_empty()
    }

    /// 对文本类型参数进行人工判定
    pub fn override_status(&mut self, status: ResultStatus) -> Result<()> {
        if self.value_type != ValueType::Text {
            return Err(LisError::Validation(format!(
                "parameter {} is of type {}; only text parameters accept a manual status",
                self.id, self.value_type
            )));
        }
        self.status_override = Some(status);
        Ok(())
    }
}

/// 复核医生（由调用方解析好的身份）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Physician {
    pub id: String,
    pub name: String,
}

impl Physician {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

impl fmt::Display for Physician {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dr. {}", self.name)
    }
}

/// 检验单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTestOrder {
    pub sample_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub test_name: String,
    #[serde(default)]
    pub priority: Priority,
    pub parameters: Vec<TestParameter>,
    #[serde(default)]
    pub stage: OrderStage,
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
}

impl LabTestOrder {
    pub fn new(
        sample_id: impl Into<String>,
        test_name: impl Into<String>,
        priority: Priority,
        parameters: Vec<TestParameter>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            patient_id: None,
            test_name: test_name.into(),
            priority,
            parameters,
            stage: OrderStage::Collected,
            collected_at: Utc::now(),
        }
    }

    /// 所有参数均已填写
    pub fn is_complete(&self) -> bool {
        self.parameters.iter().all(TestParameter::is_filled)
    }

    /// 尚未填写的参数
    pub fn missing_parameters(&self) -> Vec<&TestParameter> {
        self.parameters.iter().filter(|p| !p.is_filled()).collect()
    }

    pub fn parameter_mut(&mut self, parameter_id: &str) -> Option<&mut TestParameter> {
        self.parameters.iter_mut().find(|p| p.id == parameter_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Routine < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        assert!(Priority::Urgent < Priority::Stat);
    }

    #[test]
    fn test_parameter_deserializes_type_field() {
        let json = r#"{"id":"hb","name":"Hemoglobin","unit":"g/dL","reference_range":"13.5-17.5","type":"number","value":"11"}"#;
        let param: TestParameter = serde_json::from_str(json).unwrap();
        assert_eq!(param.value_type, ValueType::Number);
        assert_eq!(param.status, ResultStatus::Normal);
        assert!(param.is_filled());
    }

    #[test]
    fn test_stat_priority_wire_name() {
        let json = serde_json::to_string(&Priority::Stat).unwrap();
        assert_eq!(json, "\"STAT\"");
    }

    #[test]
    fn test_override_only_for_text() {
        let mut text = TestParameter::new("morph", "Morphology", "", "", ValueType::Text);
        assert!(text.override_status(ResultStatus::Abnormal).is_ok());
        assert_eq!(text.status_override, Some(ResultStatus::Abnormal));

        let mut number = TestParameter::new("hb", "Hemoglobin", "g/dL", "13.5-17.5", ValueType::Number);
        let err = number.override_status(ResultStatus::Abnormal).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_whitespace_value_is_not_filled() {
        let mut param = TestParameter::new("glu", "Glucose", "mg/dL", "70-100", ValueType::Number);
        param.value = "   ".to_string();
        let order = LabTestOrder::new("S-1", "Glucose", Priority::Routine, vec![param]);
        assert!(!order.is_complete());
        assert_eq!(order.missing_parameters().len(), 1);
    }

    #[test]
    fn test_value_type_from_str() {
        assert_eq!("Select".parse::<ValueType>().unwrap(), ValueType::Select);
        assert!("date".parse::<ValueType>().is_err());
    }
}
