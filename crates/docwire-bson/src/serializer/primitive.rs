use super::{BsonSerializer, DecodeContext, EncodeContext};
use crate::document::Document;
use crate::spec::BsonType;
use crate::value::BsonValue;
use crate::BsonResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct Int32Serializer;

impl BsonSerializer for Int32Serializer {
    type Value = i32;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<i32> {
        ctx.reader().read_int32()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &i32) -> BsonResult<()> {
        ctx.writer().write_int32(*value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Int64Serializer;

impl BsonSerializer for Int64Serializer {
    type Value = i64;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<i64> {
        ctx.reader().read_int64()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &i64) -> BsonResult<()> {
        ctx.writer().write_int64(*value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSerializer;

impl BsonSerializer for DoubleSerializer {
    type Value = f64;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<f64> {
        ctx.reader().read_double()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &f64) -> BsonResult<()> {
        ctx.writer().write_double(*value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanSerializer;

impl BsonSerializer for BooleanSerializer {
    type Value = bool;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<bool> {
        ctx.reader().read_boolean()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &bool) -> BsonResult<()> {
        ctx.writer().write_boolean(*value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl BsonSerializer for StringSerializer {
    type Value = String;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<String> {
        ctx.reader().read_string()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &String) -> BsonResult<()> {
        ctx.writer().write_string(value)
    }
}

/// 整文档，可用作顶层或内嵌值
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSerializer;

impl BsonSerializer for DocumentSerializer {
    type Value = Document;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Document> {
        ctx.reader().read_document()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &Document) -> BsonResult<()> {
        ctx.writer().write_document(value)
    }
}

/// 任意线上类型
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonValueSerializer;

impl BsonSerializer for BsonValueSerializer {
    type Value = BsonValue;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<BsonValue> {
        ctx.reader().read_value()
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &BsonValue) -> BsonResult<()> {
        ctx.writer().write_value(value)
    }
}

/// 可空包装：线上 null 与 `None` 互相映射，其余交给内部序列化器
#[derive(Debug, Clone, Copy, Default)]
pub struct NullableSerializer<S> {
    inner: S,
}

impl<S> NullableSerializer<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BsonSerializer> BsonSerializer for NullableSerializer<S> {
    type Value = Option<S::Value>;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Option<S::Value>> {
        if ctx.reader().current_bson_type()? == BsonType::Null {
            ctx.reader().read_null()?;
            return Ok(None);
        }
        self.inner.decode(ctx).map(Some)
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &Option<S::Value>) -> BsonResult<()> {
        match value {
            Some(v) => self.inner.encode(ctx, v),
            None => ctx.writer().write_null(),
        }
    }
}
