//! BSON 写入器
//!
//! 只追加地写入 `BytesMut`。文档和数组的长度前缀先占位，结束时回填。
//! 数组元素名由写入器按 "0", "1", ... 自动生成。

use crate::document::Document;
use crate::spec::{BinarySubtype, BsonType, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH};
use crate::value::{Binary, BsonValue, DateTime, DbPointer, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bytes::{BufMut, BytesMut};
use docwire_common::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Initial,
    Name,
    Value,
    Done,
}

#[derive(Debug)]
struct Context {
    /// 长度前缀所在的偏移
    start: usize,
    /// 数组的下一个下标；文档为 None
    next_index: Option<usize>,
}

pub struct BsonWriter {
    buf: BytesMut,
    state: WriterState,
    stack: Vec<Context>,
    pending_name: Option<String>,
}

impl Default for BsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BsonWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_buffer(BytesMut::with_capacity(capacity))
    }

    /// 在已有缓冲区之后追加写入，已有内容保持不变
    pub fn from_buffer(buf: BytesMut) -> Self {
        Self {
            buf,
            state: WriterState::Initial,
            stack: Vec::new(),
            pending_name: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == WriterState::Done
    }

    /// 取出写好的字节，要求顶层文档已结束
    pub fn into_bytes(self) -> BsonResult<Vec<u8>> {
        Ok(self.into_buffer()?.to_vec())
    }

    pub fn into_buffer(self) -> BsonResult<BytesMut> {
        if self.state != WriterState::Done {
            return Err(BsonError::InvalidUsage(format!(
                "top-level document not finished (state {:?})",
                self.state
            )));
        }
        Ok(self.buf)
    }

    /// 写入下一个元素的名称
    pub fn write_name(&mut self, name: &str) -> BsonResult<()> {
        if self.state != WriterState::Name {
            return Err(BsonError::InvalidUsage(format!(
                "write_name called in state {:?}",
                self.state
            )));
        }
        if self.in_array() {
            return Err(BsonError::InvalidUsage(
                "array element names are generated by the writer".to_string(),
            ));
        }
        if name.as_bytes().contains(&0) {
            return Err(BsonError::Format(format!(
                "element name {:?} contains a null byte",
                name
            )));
        }
        self.pending_name = Some(name.to_string());
        self.state = WriterState::Value;
        Ok(())
    }

    pub fn write_start_document(&mut self) -> BsonResult<()> {
        if self.state == WriterState::Initial {
            return self.push_context(None);
        }
        self.begin_value(BsonType::Document)?;
        self.push_context(None)
    }

    pub fn write_end_document(&mut self) -> BsonResult<()> {
        if self.state != WriterState::Name || self.in_array() {
            return Err(BsonError::InvalidUsage(format!(
                "write_end_document called in state {:?}",
                self.state
            )));
        }
        self.pop_context()
    }

    pub fn write_start_array(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::Array)?;
        self.push_context(Some(0))
    }

    pub fn write_end_array(&mut self) -> BsonResult<()> {
        if self.state != WriterState::Name || !self.in_array() {
            return Err(BsonError::InvalidUsage(format!(
                "write_end_array called in state {:?}",
                self.state
            )));
        }
        self.pop_context()
    }

    pub fn write_double(&mut self, v: f64) -> BsonResult<()> {
        self.begin_value(BsonType::Double)?;
        self.buf.put_f64_le(v);
        self.end_value();
        Ok(())
    }

    pub fn write_string(&mut self, v: &str) -> BsonResult<()> {
        self.begin_value(BsonType::String)?;
        self.put_string(v)?;
        self.end_value();
        Ok(())
    }

    pub fn write_binary(&mut self, v: &Binary) -> BsonResult<()> {
        self.begin_value(BsonType::Binary)?;
        if v.subtype == BinarySubtype::BinaryOld {
            self.put_len(v.bytes.len() + 4)?;
            self.buf.put_u8(v.subtype.into());
            self.put_len(v.bytes.len())?;
        } else {
            self.put_len(v.bytes.len())?;
            self.buf.put_u8(v.subtype.into());
        }
        self.buf.put_slice(&v.bytes);
        self.end_value();
        Ok(())
    }

    pub fn write_undefined(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::Undefined)?;
        self.end_value();
        Ok(())
    }

    pub fn write_object_id(&mut self, id: &ObjectId) -> BsonResult<()> {
        self.begin_value(BsonType::ObjectId)?;
        self.buf.put_slice(id.as_bytes());
        self.end_value();
        Ok(())
    }

    pub fn write_boolean(&mut self, v: bool) -> BsonResult<()> {
        self.begin_value(BsonType::Boolean)?;
        self.buf.put_u8(v as u8);
        self.end_value();
        Ok(())
    }

    pub fn write_date_time(&mut self, v: DateTime) -> BsonResult<()> {
        self.begin_value(BsonType::DateTime)?;
        self.buf.put_i64_le(v.timestamp_millis());
        self.end_value();
        Ok(())
    }

    pub fn write_null(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::Null)?;
        self.end_value();
        Ok(())
    }

    pub fn write_regular_expression(&mut self, v: &Regex) -> BsonResult<()> {
        self.begin_value(BsonType::RegularExpression)?;
        self.put_cstring(&v.pattern)?;
        self.put_cstring(&v.options)?;
        self.end_value();
        Ok(())
    }

    pub fn write_db_pointer(&mut self, v: &DbPointer) -> BsonResult<()> {
        self.begin_value(BsonType::DbPointer)?;
        self.put_string(&v.namespace)?;
        self.buf.put_slice(v.id.as_bytes());
        self.end_value();
        Ok(())
    }

    pub fn write_javascript(&mut self, code: &str) -> BsonResult<()> {
        self.begin_value(BsonType::JavaScript)?;
        self.put_string(code)?;
        self.end_value();
        Ok(())
    }

    pub fn write_symbol(&mut self, v: &str) -> BsonResult<()> {
        self.begin_value(BsonType::Symbol)?;
        self.put_string(v)?;
        self.end_value();
        Ok(())
    }

    pub fn write_javascript_with_scope(&mut self, v: &JavaScriptCodeWithScope) -> BsonResult<()> {
        self.begin_value(BsonType::JavaScriptWithScope)?;
        let start = self.buf.len();
        self.buf.put_i32_le(0);
        self.put_string(&v.code)?;
        let mut scope = BsonWriter::with_capacity(64);
        scope.write_document(&v.scope)?;
        self.buf.put_slice(&scope.into_buffer()?);
        self.patch_len(start)?;
        self.end_value();
        Ok(())
    }

    pub fn write_int32(&mut self, v: i32) -> BsonResult<()> {
        self.begin_value(BsonType::Int32)?;
        self.buf.put_i32_le(v);
        self.end_value();
        Ok(())
    }

    pub fn write_timestamp(&mut self, v: Timestamp) -> BsonResult<()> {
        self.begin_value(BsonType::Timestamp)?;
        self.buf.put_u64_le(v.to_u64());
        self.end_value();
        Ok(())
    }

    pub fn write_int64(&mut self, v: i64) -> BsonResult<()> {
        self.begin_value(BsonType::Int64)?;
        self.buf.put_i64_le(v);
        self.end_value();
        Ok(())
    }

    pub fn write_decimal128(&mut self, v: Decimal128) -> BsonResult<()> {
        self.begin_value(BsonType::Decimal128)?;
        self.buf.put_slice(&v.bytes());
        self.end_value();
        Ok(())
    }

    pub fn write_min_key(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::MinKey)?;
        self.end_value();
        Ok(())
    }

    pub fn write_max_key(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::MaxKey)?;
        self.end_value();
        Ok(())
    }

    /// 写入任意值，名称须已写入（数组内除外）
    pub fn write_value(&mut self, value: &BsonValue) -> BsonResult<()> {
        match value {
            BsonValue::Double(v) => self.write_double(*v),
            BsonValue::String(v) => self.write_string(v),
            BsonValue::Document(v) => self.write_document(v),
            BsonValue::Array(v) => {
                self.write_start_array()?;
                for item in v {
                    self.write_value(item)?;
                }
                self.write_end_array()
            }
            BsonValue::Binary(v) => self.write_binary(v),
            BsonValue::Undefined => self.write_undefined(),
            BsonValue::ObjectId(v) => self.write_object_id(v),
            BsonValue::Boolean(v) => self.write_boolean(*v),
            BsonValue::DateTime(v) => self.write_date_time(*v),
            BsonValue::Null => self.write_null(),
            BsonValue::RegularExpression(v) => self.write_regular_expression(v),
            BsonValue::DbPointer(v) => self.write_db_pointer(v),
            BsonValue::JavaScriptCode(v) => self.write_javascript(v),
            BsonValue::Symbol(v) => self.write_symbol(v),
            BsonValue::JavaScriptCodeWithScope(v) => self.write_javascript_with_scope(v),
            BsonValue::Int32(v) => self.write_int32(*v),
            BsonValue::Timestamp(v) => self.write_timestamp(*v),
            BsonValue::Int64(v) => self.write_int64(*v),
            BsonValue::Decimal128(v) => self.write_decimal128(*v),
            BsonValue::MinKey => self.write_min_key(),
            BsonValue::MaxKey => self.write_max_key(),
        }
    }

    /// 写入整个文档，可作为顶层文档或当前元素的值
    pub fn write_document(&mut self, doc: &Document) -> BsonResult<()> {
        self.write_start_document()?;
        for (name, value) in doc.iter() {
            self.write_name(name)?;
            self.write_value(value)?;
        }
        self.write_end_document()
    }

    fn in_array(&self) -> bool {
        self.stack
            .last()
            .map(|c| c.next_index.is_some())
            .unwrap_or(false)
    }

    /// 写出类型标记和元素名
    fn begin_value(&mut self, ty: BsonType) -> BsonResult<()> {
        let name = match self.state {
            WriterState::Value => self.pending_name.take().ok_or_else(|| {
                BsonError::InvalidUsage("no element name pending".to_string())
            })?,
            WriterState::Name if self.in_array() => {
                let ctx = self
                    .stack
                    .last_mut()
                    .ok_or_else(|| BsonError::InvalidUsage("not inside an array".to_string()))?;
                let index = ctx.next_index.unwrap_or(0);
                ctx.next_index = Some(index + 1);
                index.to_string()
            }
            other => {
                return Err(BsonError::InvalidUsage(format!(
                    "cannot write {} in state {:?}",
                    ty, other
                )));
            }
        };
        self.buf.put_u8(ty.as_u8());
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    fn end_value(&mut self) {
        self.state = WriterState::Name;
    }

    fn push_context(&mut self, next_index: Option<usize>) -> BsonResult<()> {
        if self.stack.len() >= MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let start = self.buf.len();
        self.buf.put_i32_le(0);
        self.stack.push(Context { start, next_index });
        self.state = WriterState::Name;
        Ok(())
    }

    fn pop_context(&mut self) -> BsonResult<()> {
        let ctx = self
            .stack
            .pop()
            .ok_or_else(|| BsonError::InvalidUsage("no open document".to_string()))?;
        self.buf.put_u8(0);
        self.patch_len(ctx.start)?;
        self.state = if self.stack.is_empty() {
            WriterState::Done
        } else {
            WriterState::Name
        };
        Ok(())
    }

    /// 回填 `start` 处的长度前缀
    fn patch_len(&mut self, start: usize) -> BsonResult<()> {
        let len = self.buf.len() - start;
        if len > MAX_DOCUMENT_SIZE {
            return Err(BsonError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
        }
        self.buf[start..start + 4].copy_from_slice(&(len as i32).to_le_bytes());
        Ok(())
    }

    fn put_len(&mut self, len: usize) -> BsonResult<()> {
        if len > MAX_DOCUMENT_SIZE {
            return Err(BsonError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
        }
        self.buf.put_i32_le(len as i32);
        Ok(())
    }

    fn put_string(&mut self, s: &str) -> BsonResult<()> {
        self.put_len(s.len() + 1)?;
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    fn put_cstring(&mut self, s: &str) -> BsonResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(BsonError::Format(format!("cstring {:?} contains a null byte", s)));
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bytes() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        writer.write_name("hello").unwrap();
        writer.write_string("world").unwrap();
        writer.write_end_document().unwrap();
        assert_eq!(
            writer.into_bytes().unwrap(),
            b"\x16\x00\x00\x00\x02hello\x00\x06\x00\x00\x00world\x00\x00".to_vec()
        );
    }

    #[test]
    fn test_array_names_generated() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        writer.write_name("xy").unwrap();
        writer.write_start_array().unwrap();
        writer.write_double(1.0).unwrap();
        writer.write_double(2.0).unwrap();
        writer.write_end_array().unwrap();
        writer.write_end_document().unwrap();
        let bytes = writer.into_bytes().unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&36i32.to_le_bytes());
        expected.extend_from_slice(b"\x04xy\x00");
        expected.extend_from_slice(&27i32.to_le_bytes());
        expected.extend_from_slice(b"\x010\x00");
        expected.extend_from_slice(&1.0f64.to_le_bytes());
        expected.extend_from_slice(b"\x011\x00");
        expected.extend_from_slice(&2.0f64.to_le_bytes());
        expected.push(0);
        expected.push(0);
        assert_eq!(bytes.len(), 36);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_value_without_name() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        let err = writer.write_int32(1).unwrap_err();
        assert!(matches!(err, BsonError::InvalidUsage(_)));
    }

    #[test]
    fn test_null_byte_in_name() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        let err = writer.write_name("a\0b").unwrap_err();
        assert!(matches!(err, BsonError::Format(_)));
    }

    #[test]
    fn test_finish_unterminated() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        assert!(matches!(writer.into_bytes(), Err(BsonError::InvalidUsage(_))));
    }

    #[test]
    fn test_mismatched_end() {
        let mut writer = BsonWriter::new();
        writer.write_start_document().unwrap();
        assert!(writer.write_end_array().is_err());
    }
}
