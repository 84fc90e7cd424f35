//! 配置管理
//!
//! 从 TOML 文件和 `LIS__` 前缀环境变量加载配置，提供验证、保存和重新加载

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<LisConfig>>,
    /// 配置文件路径，未指定时只使用默认值和环境变量
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 检验系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LisConfig {
    /// 录入引擎配置
    pub engine: EngineConfig,
    /// 结果存储配置
    pub store: StoreConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 录入引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 会话默认进入批量模式
    pub batch_mode: bool,
}

/// 结果存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// 结果文件输出目录
    pub results_dir: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令，如 `info`、`lis_workflow=debug`
    pub level: String,
    /// 输出 JSON 格式
    pub json: bool,
    /// 显示日志目标
    pub show_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { results_dir: "./data/results".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false, show_target: true }
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&LisConfig) -> Result<()>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    /// 依次叠加默认值、配置文件和环境变量
    fn load_config(config_path: Option<&Path>) -> Result<LisConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&LisConfig::default()).context("Failed to build default configuration")?,
        );

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("LIS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: LisConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("No configuration file given; using defaults"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> LisConfig {
        self.config.read().await.clone()
    }

    /// 更新配置；有配置文件时同时写回文件
    pub async fn update_config(&self, new_config: LisConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if self.config_path.is_some() {
            self.save_config().await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    async fn save_config(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };

        let config = self.config.read().await;
        let config_str = toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded");
        Ok(())
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    if config.logging.level.trim().is_empty() {
                        Err(anyhow::anyhow!("Log level cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "store.results_dir",
                validator: |config| {
                    if config.store.results_dir.trim().is_empty() {
                        Err(anyhow::anyhow!("Results directory cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &LisConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration value: {}", rule.field_path)));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_defaults_without_file() {
        let manager = ConfigManager::new(None).unwrap();
        let config = manager.get_config().await;
        assert!(!config.engine.batch_mode);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.store.results_dir, "./data/results");
    }

    #[tokio::test]
    async fn test_partial_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nbatch_mode = true\n\n[logging]\nlevel = \"debug\"").unwrap();

        let manager = ConfigManager::new(Some(file.path())).unwrap();
        let config = manager.get_config().await;
        assert!(config.engine.batch_mode);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.store.results_dir, "./data/results");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(ConfigManager::new(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_validator_rejects_empty_results_dir() {
        let mut config = LisConfig::default();
        config.store.results_dir = "  ".to_string();
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("store.results_dir"));
    }

    #[tokio::test]
    async fn test_update_config_writes_file() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let manager = ConfigManager::new(Some(file.path())).unwrap();

        let mut config = manager.get_config().await;
        config.engine.batch_mode = true;
        manager.update_config(config.clone()).await.unwrap();

        let written = std::fs::read_to_string(file.path()).unwrap();
        let parsed: LisConfig = toml::from_str(&written).unwrap();
        assert_eq!(parsed, config);

        manager.reload_config().await.unwrap();
        assert!(manager.get_config().await.engine.batch_mode);
    }
}
