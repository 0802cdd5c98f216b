use super::{BsonSerializer, DecodeContext, EncodeContext};
use crate::compat::{from_bson_document, to_bson_document};
use crate::{BsonError, BsonResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// 任意 serde 类型的序列化器
///
/// # Brief
/// 经由 `bson` crate 的 serde 实现转换为文档表示，适合没有专用序列化器的结构体。
/// 值必须序列化为文档形状，否则报 Representation 错误。
pub struct SerdeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BsonSerializer for SerdeSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<T> {
        let doc = ctx.reader().read_document()?;
        bson::from_document(to_bson_document(&doc)?).map_err(|e| {
            BsonError::Format(format!(
                "cannot deserialize {}: {}",
                std::any::type_name::<T>(),
                e
            ))
        })
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &T) -> BsonResult<()> {
        let doc = bson::to_document(value).map_err(|e| {
            BsonError::Representation(format!(
                "cannot serialize {} as a document: {}",
                std::any::type_name::<T>(),
                e
            ))
        })?;
        ctx.writer().write_document(&from_bson_document(&doc)?)
    }
}
