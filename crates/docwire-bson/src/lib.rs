//! # docwire-bson
//!
//! BSON 二进制文档格式的编解码与类型化序列化器。
//!
//! - **流式编解码**：`BsonReader` 顺序读取并支持书签回退，`BsonWriter` 只追加写入
//! - **表示形式**：每个序列化器携带一个线上类型 (`BsonType`)，数值收窄由 `RepresentationConverter` 检查
//! - **注册表**：`SerializerRegistry` 按类型查找序列化器，惰性构建、并发安全
//! - **多态解码**：先窥探判别字段再回退，交给具体类型的序列化器
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use docwire_bson::{Document, decode_document, encode_document};
//!
//! let doc = Document::new().with("name", "docwire").with("version", 1);
//! let bytes = encode_document(&doc).unwrap();
//! assert_eq!(decode_document(&bytes).unwrap(), doc);
//! ```

pub mod spec;
pub mod value;
pub mod document;
pub mod reader;
pub mod writer;
pub mod codec;
pub mod converter;
pub mod serializer;
pub mod registry;
pub mod compat;

pub use codec::{decode_document, document_length, encode_document, encode_document_into};
pub use converter::RepresentationConverter;
pub use document::Document;
pub use reader::{Bookmark, BsonReader};
pub use registry::{SerializerRegistry, SerializerRegistryBuilder, SharedSerializer};
pub use serializer::{
    deserialize_document, serialize_document, BsonSerializer, DecodeContext, EncodeContext,
    WithConverter, WithRepresentation,
};
pub use spec::{BinarySubtype, BsonType};
pub use value::{Binary, BsonValue, DateTime, DbPointer, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp};
pub use writer::BsonWriter;

use docwire_common::DriverError;
use thiserror::Error;

/// BSON 操作的错误类型
#[derive(Error, Debug)]
pub enum BsonError {
    /// 字节流格式错误，流从此处起视为损坏
    #[error("Format error: {0}")]
    Format(String),

    /// 不支持的表示形式，或数值转换会丢失数据
    #[error("Representation error: {0}")]
    Representation(String),

    /// 调用方式错误（读写器状态不对、对抽象类型编解码、类型未注册）
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// 意外的输入结束
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// 字符串不是有效的 UTF-8 编码
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// 嵌套层级过深
    #[error("Nesting too deep: max {0}")]
    NestingTooDeep(usize),

    /// 文档体积超出限制
    #[error("Document too large: max {0} bytes")]
    DocumentTooLarge(usize),
}

impl BsonError {
    /// 是否属于格式错误（包括截断、UTF-8、超限）
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            BsonError::Format(_)
                | BsonError::UnexpectedEof
                | BsonError::InvalidUtf8(_)
                | BsonError::NestingTooDeep(_)
                | BsonError::DocumentTooLarge(_)
        )
    }

    pub fn is_representation(&self) -> bool {
        matches!(self, BsonError::Representation(_))
    }
}

impl From<BsonError> for DriverError {
    fn from(err: BsonError) -> Self {
        match err {
            BsonError::Representation(msg) => DriverError::Representation(msg),
            BsonError::InvalidUsage(msg) => DriverError::InvalidUsage(msg),
            BsonError::Format(msg) => DriverError::Format(msg),
            other => DriverError::Format(other.to_string()),
        }
    }
}

/// BSON 操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;
