//! 驱动配置模块
//!
//! - 日志配置(级别、JSON 输出)
//! - 查询默认值(批大小、超时)
//!
//! 支持从 TOML 文件加载配置。

use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 驱动主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,

    /// 查询默认值
    #[serde(default)]
    pub query: QueryDefaults,
}

/// 日志配置
///
/// `RUST_LOG` 环境变量优先于这里的级别。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// 查询默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefaults {
    /// 每批文档数 (0 = 由服务器决定)
    #[serde(default)]
    pub batch_size: i32,

    /// 单次发送/接收的超时(毫秒), 缺省为不限时
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            batch_size: 0,
            timeout_ms: None,
        }
    }
}

impl QueryDefaults {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl DriverConfig {
    /// # Brief
    /// 从 TOML 文件加载配置
    ///
    /// # Arguments
    /// * `path` - 配置文件路径
    ///
    /// # Returns
    /// 解析后的配置实例
    pub fn from_file(path: &Path) -> DriverResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> DriverResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DriverError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Brief
    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> DriverResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DriverError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.query.batch_size < 0 {
            return Err(DriverError::Config(format!(
                "query.batch_size must be >= 0, got {}",
                self.query.batch_size
            )));
        }
        Ok(())
    }
}
