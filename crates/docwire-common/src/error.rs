//! 错误类型定义模块
//!
//! 定义驱动层统一错误类型 DriverError 和 Result 别名。
//!
//! 错误分为两组:
//! - 编解码错误 (Format / Representation): 对当前调用是致命的，不重试也不取默认值
//! - 调用错误 (Argument / InvalidUsage): 在任何通道 I/O 之前同步抛出

use thiserror::Error;

/// 驱动错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 字节流格式错误（标记不匹配、判别字段无效、定长数组长度错误等）
    #[error("Format error: {0}")]
    Format(String),

    /// 表示形式错误（不支持的表示形式、转换器拒绝溢出或截断）
    #[error("Representation error: {0}")]
    Representation(String),

    /// 非法调用（在抽象类型上编解码、必需参数在执行时未设置）
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// 参数错误（参数为空或超出范围）
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// 连接错误
    #[error("Connection error: {0}")]
    Connection(String),

    /// 超时
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 协作式取消
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// 服务器返回的协议级错误（查询失败、游标不存在）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// I/O 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn argument(name: &str, reason: impl std::fmt::Display) -> Self {
        DriverError::Argument(format!("{}: {}", name, reason))
    }

    pub fn is_format(&self) -> bool {
        matches!(self, DriverError::Format(_))
    }

    pub fn is_representation(&self) -> bool {
        matches!(self, DriverError::Representation(_))
    }

    /// 是否属于在 I/O 之前抛出的调用错误
    pub fn is_usage(&self) -> bool {
        matches!(self, DriverError::Argument(_) | DriverError::InvalidUsage(_))
    }
}

/// 驱动 Result 类型别名
pub type DriverResult<T> = Result<T, DriverError>;
