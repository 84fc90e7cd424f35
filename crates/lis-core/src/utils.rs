//! 通用工具函数

use uuid::Uuid;

/// 生成结果记录ID
pub fn generate_record_id() -> String {
    format!("LR-{}", Uuid::new_v4().simple())
}

/// 规范化样本号：去除首尾空白并统一为大写
pub fn normalize_sample_id(sample_id: &str) -> String {
    sample_id.trim().to_ascii_uppercase()
}

/// 验证样本号格式
pub fn is_valid_sample_id(sample_id: &str) -> bool {
    let trimmed = sample_id.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 64
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_record_id() {
        let a = generate_record_id();
        let b = generate_record_id();
        assert!(a.starts_with("LR-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_sample_id() {
        assert_eq!(normalize_sample_id("  smp-001 "), "SMP-001");
    }

    #[test]
    fn test_is_valid_sample_id() {
        assert!(is_valid_sample_id("SMP-2024_001"));
        assert!(!is_valid_sample_id(""));
        assert!(!is_valid_sample_id("sample/001"));
    }
}
