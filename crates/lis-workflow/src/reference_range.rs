//! 参考范围解析
//!
//! 将检验目录中的参考范围文本解析为结构化比较规则。解析永远不会失败，
//! 无法识别的文本得到 [`RangeRule::NoRule`]，分类器据此回落为正常。

use lis_core::{TestParameter, ValueType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// 闭区间，如 `70-100`、`13.5–17.5`
static INTERVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d*\.?\d+)\s*[-–]\s*(\d*\.?\d+)").expect("interval pattern is valid")
});

/// 单侧阈值，如 `<200`、`> 40`、`<=5`、`≥60`
static THRESHOLD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([<>≤≥])\s*(=?)\s*(\d*\.?\d+)").expect("threshold pattern is valid")
});

/// 单侧阈值的方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThresholdDirection {
    /// `<N` / `<=N`
    UpperLimit,
    /// `>N` / `>=N`
    LowerLimit,
}

/// 解析后的参考范围规则
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum RangeRule {
    Interval { min: f64, max: f64 },
    /// `inclusive` 为真时（`<=`、`≤`、`>=`、`≥`）阈值本身属于参考范围
    Threshold { threshold: f64, direction: ThresholdDirection, inclusive: bool },
    /// 无可用规则（非数值类型，或文本无法解析）
    NoRule,
}

impl RangeRule {
    pub fn is_rule(&self) -> bool {
        !matches!(self, RangeRule::NoRule)
    }
}

/// 解析参考范围
///
/// 仅对数值类型尝试解析；先匹配闭区间，再匹配单侧阈值。下限大于上限的区间
/// 视为目录录入错误，返回 [`RangeRule::NoRule`]。
pub fn parse_reference_range(range_text: &str, value_type: ValueType) -> RangeRule {
    if value_type != ValueType::Number {
        return RangeRule::NoRule;
    }

    if let Some(caps) = INTERVAL_PATTERN.captures(range_text) {
        let min = caps[1].parse::<f64>();
        let max = caps[2].parse::<f64>();
        if let (Ok(min), Ok(max)) = (min, max) {
            if min <= max {
                return RangeRule::Interval { min, max };
            }
            tracing::debug!("Reference range {:?} has inverted bounds", range_text);
            return RangeRule::NoRule;
        }
    }

    if let Some(caps) = THRESHOLD_PATTERN.captures(range_text) {
        let direction = match &caps[1] {
            "<" | "≤" => ThresholdDirection::UpperLimit,
            _ => ThresholdDirection::LowerLimit,
        };
        let inclusive = matches!(&caps[1], "≤" | "≥") || !caps[2].is_empty();
        if let Ok(threshold) = caps[3].parse::<f64>() {
            return RangeRule::Threshold { threshold, direction, inclusive };
        }
    }

    tracing::debug!("Reference range {:?} did not yield a rule", range_text);
    RangeRule::NoRule
}

/// 找出参考范围无法解析的数值参数
///
/// 这类参数的分类会静默回落为正常，用于在测试或启动时审计检验目录。
pub fn unparsed_numeric_ranges(parameters: &[TestParameter]) -> Vec<&TestParameter> {
    parameters
        .iter()
        .filter(|p| p.value_type == ValueType::Number)
        .filter(|p| !parse_reference_range(&p.reference_range, p.value_type).is_rule())
        .collect()
}
