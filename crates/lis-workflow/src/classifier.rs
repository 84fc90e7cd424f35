//! 参数结果分类
//!
//! 根据参数类型把录入值判定为 Normal / Low / High / Critical。分类是纯函数，
//! 每次录入都会重新计算，不读取任何共享状态。

use crate::reference_range::{parse_reference_range, RangeRule, ThresholdDirection};
use lis_core::{LabTestOrder, ResultStatus, TestParameter, ValueType};

/// 低于下限一半即为危急
pub const CRITICAL_LOW_FACTOR: f64 = 0.5;
/// 超过上限两倍即为危急
pub const CRITICAL_HIGH_FACTOR: f64 = 2.0;

/// select 类型的异常标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbnormalMarker {
    Positive,
    Reactive,
    Detected,
    Present,
    Falciparum,
    Vivax,
    Resistant,
}

impl AbnormalMarker {
    /// 固定的标记集合，增删会改变分类行为
    pub const ALL: [AbnormalMarker; 7] = [
        AbnormalMarker::Positive,
        AbnormalMarker::Reactive,
        AbnormalMarker::Detected,
        AbnormalMarker::Present,
        AbnormalMarker::Falciparum,
        AbnormalMarker::Vivax,
        AbnormalMarker::Resistant,
    ];

    /// 小写匹配子串
    pub fn keyword(&self) -> &'static str {
        match self {
            AbnormalMarker::Positive => "positive",
            AbnormalMarker::Reactive => "reactive",
            AbnormalMarker::Detected => "detected",
            AbnormalMarker::Present => "present",
            AbnormalMarker::Falciparum => "falciparum",
            AbnormalMarker::Vivax => "vivax",
            AbnormalMarker::Resistant => "resistant",
        }
    }
}

/// 紧邻标记前出现即视为否定，如 "Non-reactive"、"Nonreactive"、"Not detected"、"Undetected"
const NEGATION_PREFIXES: [&str; 5] = ["non-", "non ", "non", "not ", "un"];

/// 在录入值中查找第一个未被否定的异常标记
///
/// 匹配不区分大小写。标记紧邻的前缀若为否定词且否定词位于词首，该次出现不计入。
pub fn find_abnormal_marker(value: &str) -> Option<AbnormalMarker> {
    let lowered = value.to_lowercase();
    AbnormalMarker::ALL.into_iter().find(|marker| {
        lowered
            .match_indices(marker.keyword())
            .any(|(idx, _)| !is_negated(&lowered[..idx]))
    })
}

fn is_negated(prefix: &str) -> bool {
    NEGATION_PREFIXES.iter().any(|neg| {
        prefix
            .strip_suffix(neg)
            .is_some_and(|before| !before.ends_with(char::is_alphanumeric))
    })
}

/// 解析数值结果，非有限数视为无法解析
fn parse_numeric_value(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 按已解析规则判定数值结果
pub fn classify_numeric(value: f64, rule: &RangeRule) -> ResultStatus {
    match *rule {
        RangeRule::Interval { min, max } => {
            if value < min * CRITICAL_LOW_FACTOR || value > max * CRITICAL_HIGH_FACTOR {
                ResultStatus::Critical
            } else if value < min {
                ResultStatus::Low
            } else if value > max {
                ResultStatus::High
            } else {
                ResultStatus::Normal
            }
        }
        RangeRule::Threshold { threshold, direction: ThresholdDirection::UpperLimit, inclusive } => {
            let above = if inclusive { value > threshold } else { value >= threshold };
            if value >= threshold * CRITICAL_HIGH_FACTOR {
                ResultStatus::Critical
            } else if above {
                ResultStatus::High
            } else {
                ResultStatus::Normal
            }
        }
        RangeRule::Threshold { threshold, direction: ThresholdDirection::LowerLimit, inclusive } => {
            let below = if inclusive { value < threshold } else { value <= threshold };
            if value <= threshold * CRITICAL_LOW_FACTOR {
                ResultStatus::Critical
            } else if below {
                ResultStatus::Low
            } else {
                ResultStatus::Normal
            }
        }
        RangeRule::NoRule => ResultStatus::Normal,
    }
}

/// 分类入口：给出录入值、参考范围文本和参数类型，返回唯一的判定状态
///
/// 空值、无法解析的数值、无法解析的参考范围以及自由文本一律返回
/// [`ResultStatus::Normal`]。
pub fn classify(value: &str, range_text: &str, value_type: ValueType) -> ResultStatus {
    if value.trim().is_empty() {
        return ResultStatus::Normal;
    }

    match value_type {
        ValueType::Select => match find_abnormal_marker(value) {
            Some(_) => ResultStatus::Critical,
            None => ResultStatus::Normal,
        },
        ValueType::Number => match parse_numeric_value(value) {
            Some(v) => classify_numeric(v, &parse_reference_range(range_text, value_type)),
            None => ResultStatus::Normal,
        },
        ValueType::Text => ResultStatus::Normal,
    }
}

/// 参数当前应有的状态，不读取已存储的 `status`
///
/// 文本参数若有人工判定且已填写，则采用人工判定。
pub fn status_of(parameter: &TestParameter) -> ResultStatus {
    match (parameter.value_type, parameter.status_override) {
        (ValueType::Text, Some(manual)) if parameter.is_filled() => manual,
        _ => classify(&parameter.value, &parameter.reference_range, parameter.value_type),
    }
}

/// 重新计算单个参数的状态并写回
pub fn refresh_parameter(parameter: &mut TestParameter) -> ResultStatus {
    let status = status_of(parameter);

    if status != parameter.status {
        tracing::debug!(
            "Parameter {} reclassified from {} to {}",
            parameter.id,
            parameter.status,
            status
        );
    }
    parameter.status = status;
    status
}

/// 重新计算检验单内所有参数的状态
pub fn refresh_order(order: &mut LabTestOrder) {
    for parameter in &mut order.parameters {
        refresh_parameter(parameter);
    }
}
