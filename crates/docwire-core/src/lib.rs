//! docwire 核心
//!
//! 旧式线上协议的读查询会话：组装 OP_QUERY、解析 OP_REPLY，
//! 通过游标按批拉取后续结果。连接建立与服务器发现由调用方通过
//! [`ServerSelector`] 和 [`Channel`] 提供。

pub mod connection;
pub mod cursor;
pub mod operation;
pub mod protocol;
pub mod sort;

#[cfg(test)]
pub(crate) mod mock;

pub use docwire_bson as bson;
pub use docwire_common as common;

pub use connection::{
    CancellationToken, Channel, ReadPreference, ReadPreferenceMode, ServerDescription,
    ServerSelector, ServerType,
};
pub use cursor::Cursor;
pub use operation::{number_to_return_for_first_batch, QueryOperation, ValidatedQuery};
pub use protocol::{OpCode, QueryFlags, ReplyFlags};
pub use sort::{SortBy, SortOrder};

pub use docwire_bson::{Document, SerializerRegistry};
pub use docwire_common::{CollectionNamespace, DriverConfig, DriverError, DriverResult, LogConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 初始化日志
///
/// # Brief
/// `RUST_LOG` 优先，否则使用配置中的级别；`json` 为真时输出 JSON 行。
/// 重复初始化返回 Config 错误。
pub fn init_logging(config: &LogConfig) -> DriverResult<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| DriverError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };
    result.map_err(|e| DriverError::Config(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_fails() {
        let config = LogConfig {
            level: "debug".to_string(),
            json: false,
        };
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(DriverError::Config(_))));
    }

    #[test]
    fn test_invalid_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            level: "docwire=loud".to_string(),
            json: true,
        };
        assert!(matches!(init_logging(&config), Err(DriverError::Config(_))));
    }
}
