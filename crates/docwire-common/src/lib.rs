//! docwire 公共组件
//!
//! 各 crate 共享的错误分类、标识符类型和配置结构。

pub mod error;
pub mod types;
pub mod config;

pub use config::{DriverConfig, LogConfig, QueryDefaults};
pub use error::{DriverError, DriverResult};
pub use types::*;
