//! 错误定义模块

use thiserror::Error;

/// 检验系统统一错误类型
#[derive(Error, Debug)]
pub enum LisError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl LisError {
    /// 是否为保存前的校验失败（区别于分类结果和持久化失败）
    pub fn is_validation(&self) -> bool {
        matches!(self, LisError::Validation(_))
    }
}

/// 检验系统统一结果类型
pub type Result<T> = std::result::Result<T, LisError>;
