//! 类型化序列化器
//!
//! 每个序列化器把一个逻辑类型映射到一种或几种线上表示：
//!
//! - `primitive`: 原生类型 (i32, i64, f64, bool, String, Document, BsonValue) 以及可空包装
//! - `byte`: u8，支持 Binary / Int32 / Int64 / String(hex)
//! - `uint32`: u32，支持 Double / Int32 / Int64 / String(十进制)
//! - `geo`: 坐标对与坐标参考系，后者按 `"type"` 字段多态解码
//! - `serde_bridge`: 任意 serde 类型经由 bson 文档表示

pub mod byte;
pub mod geo;
pub mod primitive;
pub mod serde_bridge;
pub mod uint32;

pub use byte::ByteSerializer;
pub use geo::{
    CoordinateReferenceSystem, CoordinateReferenceSystemSerializer, Coordinates,
    CoordinatesSerializer, Geographic2DCoordinates, Geographic2DCoordinatesSerializer, LinkedCrs,
    LinkedCrsSerializer, NamedCrs, NamedCrsSerializer, Projected2DCoordinates,
    Projected2DCoordinatesSerializer,
};
pub use primitive::{
    BooleanSerializer, BsonValueSerializer, DocumentSerializer, DoubleSerializer, Int32Serializer,
    Int64Serializer, NullableSerializer, StringSerializer,
};
pub use serde_bridge::SerdeSerializer;
pub use uint32::UInt32Serializer;

use crate::converter::RepresentationConverter;
use crate::reader::BsonReader;
use crate::registry::SerializerRegistry;
use crate::spec::BsonType;
use crate::writer::BsonWriter;
use crate::{BsonError, BsonResult};

/// 解码上下文：读取器 + 用于解析嵌套类型的注册表
pub struct DecodeContext<'r, 'a> {
    reader: &'r mut BsonReader<'a>,
    registry: &'r SerializerRegistry,
}

impl<'r, 'a> DecodeContext<'r, 'a> {
    pub fn new(reader: &'r mut BsonReader<'a>, registry: &'r SerializerRegistry) -> Self {
        Self { reader, registry }
    }

    pub fn reader(&mut self) -> &mut BsonReader<'a> {
        &mut *self.reader
    }

    pub fn registry(&self) -> &'r SerializerRegistry {
        self.registry
    }

    /// 通过注册表查找 `T` 的序列化器并解码当前值
    pub fn decode<T: 'static>(&mut self) -> BsonResult<T> {
        let serializer = self.registry.lookup::<T>()?;
        serializer.decode(self)
    }
}

/// 编码上下文
pub struct EncodeContext<'w> {
    writer: &'w mut BsonWriter,
    registry: &'w SerializerRegistry,
}

impl<'w> EncodeContext<'w> {
    pub fn new(writer: &'w mut BsonWriter, registry: &'w SerializerRegistry) -> Self {
        Self { writer, registry }
    }

    pub fn writer(&mut self) -> &mut BsonWriter {
        &mut *self.writer
    }

    pub fn registry(&self) -> &'w SerializerRegistry {
        self.registry
    }

    pub fn encode<T: 'static>(&mut self, value: &T) -> BsonResult<()> {
        let serializer = self.registry.lookup::<T>()?;
        serializer.encode(self, value)
    }
}

/// 序列化器 trait
///
/// # Brief
/// 在读取器当前位置解码一个值，或在写入器当前位置编码一个值。
/// 对不支持的线上类型必须报错，不允许回退到默认值。
pub trait BsonSerializer: Send + Sync {
    type Value;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Self::Value>;

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &Self::Value) -> BsonResult<()>;
}

/// 可配置线上表示的序列化器
pub trait WithRepresentation: Sized {
    fn representation(&self) -> BsonType;

    /// 返回使用新表示的序列化器，不支持的表示报 Representation 错误
    fn with_representation(self, representation: BsonType) -> BsonResult<Self>;
}

/// 可配置数值转换策略的序列化器
pub trait WithConverter: Sized {
    fn converter(&self) -> RepresentationConverter;

    fn with_converter(self, converter: RepresentationConverter) -> Self;
}

/// 用序列化器编码一个顶层文档
///
/// # Arguments
/// * `serializer` - 值类型的序列化器，必须产出文档形状
/// * `registry` - 嵌套类型的查找来源
/// * `value` - 要编码的值
pub fn serialize_document<S>(
    serializer: &S,
    registry: &SerializerRegistry,
    value: &S::Value,
) -> BsonResult<Vec<u8>>
where
    S: BsonSerializer + ?Sized,
{
    let mut writer = BsonWriter::new();
    serializer.encode(&mut EncodeContext::new(&mut writer, registry), value)?;
    writer.into_bytes()
}

/// 用序列化器解码一个顶层文档，尾部多余字节视为格式错误
pub fn deserialize_document<S>(
    serializer: &S,
    registry: &SerializerRegistry,
    data: &[u8],
) -> BsonResult<S::Value>
where
    S: BsonSerializer + ?Sized,
{
    let mut reader = BsonReader::new(data);
    let value = serializer.decode(&mut DecodeContext::new(&mut reader, registry))?;
    if !reader.is_done() || reader.position() != data.len() {
        return Err(BsonError::Format(format!(
            "document not fully consumed: stopped at offset {} of {}",
            reader.position(),
            data.len()
        )));
    }
    Ok(value)
}

pub(crate) fn unsupported_representation(type_name: &str, representation: BsonType) -> BsonError {
    BsonError::Representation(format!(
        "{} is not a valid representation for {}",
        representation, type_name
    ))
}

pub(crate) fn cannot_decode(type_name: &str, actual: BsonType) -> BsonError {
    BsonError::Representation(format!(
        "Cannot deserialize {} from BsonType {}",
        type_name, actual
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// 把值包进 `{ "v": ... }` 编码
    pub fn encode_field<S: BsonSerializer + ?Sized>(
        serializer: &S,
        registry: &SerializerRegistry,
        value: &S::Value,
    ) -> BsonResult<Vec<u8>> {
        let mut writer = BsonWriter::new();
        writer.write_start_document()?;
        writer.write_name("v")?;
        serializer.encode(&mut EncodeContext::new(&mut writer, registry), value)?;
        writer.write_end_document()?;
        writer.into_bytes()
    }

    /// 从 `{ "v": ... }` 解码
    pub fn decode_field<S: BsonSerializer + ?Sized>(
        serializer: &S,
        registry: &SerializerRegistry,
        data: &[u8],
    ) -> BsonResult<S::Value> {
        let mut reader = BsonReader::new(data);
        reader.read_start_document()?;
        if reader.read_bson_type()?.is_none() {
            return Err(BsonError::Format("empty document".to_string()));
        }
        let value = serializer.decode(&mut DecodeContext::new(&mut reader, registry))?;
        if reader.read_bson_type()?.is_some() {
            return Err(BsonError::Format("unexpected extra element".to_string()));
        }
        reader.read_end_document()?;
        Ok(value)
    }

    pub fn round_trip<S: BsonSerializer + ?Sized>(
        serializer: &S,
        value: &S::Value,
    ) -> BsonResult<S::Value> {
        let registry = SerializerRegistry::with_defaults();
        let bytes = encode_field(serializer, &registry, value)?;
        decode_field(serializer, &registry, &bytes)
    }

    /// 返回 `{ "v": value }` 的字节
    pub fn field_bytes(value: impl Into<crate::value::BsonValue>) -> Vec<u8> {
        crate::codec::encode_document(&crate::document::Document::new().with("v", value.into()))
            .unwrap()
    }
}
