//! BSON 读取器
//!
//! 对字节切片做只进的顺序读取，并支持书签：记下当前位置，之后回退到该位置重新读取。
//! 多态解码依赖它先窥探判别字段，再从头交给具体类型的序列化器。
//!
//! 读取器是一个小状态机：
//!
//! ```text
//! Initial --read_start_document--> Type --read_bson_type--> Value --read_xxx--> Type
//!                                   |                                            |
//!                                   +--(0x00)--> EndOfDocument --read_end_document--> Type / Done
//! ```
//!
//! 期望类型与实际类型不一致是致命的格式错误，之后不做任何恢复。

use crate::document::Document;
use crate::spec::{BinarySubtype, BsonType, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
use crate::value::{Binary, BsonValue, DateTime, DbPointer, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use docwire_common::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextKind {
    Document,
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Context {
    kind: ContextKind,
    /// 结束位置（不含），即长度前缀所声明的末尾
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Initial,
    Type,
    Value,
    EndOfDocument,
    EndOfArray,
    Done,
}

/// 读取位置书签
///
/// 保存回退所需的全部状态，只能用于创建它的读取器。
#[derive(Debug, Clone)]
pub struct Bookmark {
    pos: usize,
    state: ReaderState,
    current_type: Option<BsonType>,
    current_name: String,
    stack: Vec<Context>,
}

pub struct BsonReader<'a> {
    data: &'a [u8],
    pos: usize,
    state: ReaderState,
    current_type: Option<BsonType>,
    current_name: String,
    stack: Vec<Context>,
    /// 外层读取器已占用的嵌套层数，解析 code-with-scope 的作用域时继承
    outer_depth: usize,
}

impl<'a> BsonReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: ReaderState::Initial,
            current_type: None,
            current_name: String::new(),
            stack: Vec::new(),
            outer_depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// 顶层文档是否已经完整读完
    pub fn is_done(&self) -> bool {
        self.state == ReaderState::Done
    }

    pub fn bookmark(&self) -> Bookmark {
        Bookmark {
            pos: self.pos,
            state: self.state,
            current_type: self.current_type,
            current_name: self.current_name.clone(),
            stack: self.stack.clone(),
        }
    }

    pub fn return_to_bookmark(&mut self, bookmark: Bookmark) {
        self.pos = bookmark.pos;
        self.state = bookmark.state;
        self.current_type = bookmark.current_type;
        self.current_name = bookmark.current_name;
        self.stack = bookmark.stack;
    }

    /// 当前待读值的类型
    ///
    /// 在尚未开始读取时返回 `Document`（顶层总是文档）。
    pub fn current_bson_type(&self) -> BsonResult<BsonType> {
        match self.state {
            ReaderState::Initial => Ok(BsonType::Document),
            ReaderState::Value => self
                .current_type
                .ok_or_else(|| BsonError::InvalidUsage("no current value".to_string())),
            other => Err(BsonError::InvalidUsage(format!(
                "current_bson_type called in state {:?}",
                other
            ))),
        }
    }

    /// 当前元素名，仅在读取类型之后、读取值之前有效
    pub fn current_name(&self) -> BsonResult<&str> {
        match self.state {
            ReaderState::Value => Ok(&self.current_name),
            other => Err(BsonError::InvalidUsage(format!(
                "current_name called in state {:?}",
                other
            ))),
        }
    }

    /// 读取下一个元素的类型标记和名称
    ///
    /// # Returns
    /// 到达当前文档/数组末尾时返回 `None`
    pub fn read_bson_type(&mut self) -> BsonResult<Option<BsonType>> {
        if self.state != ReaderState::Type {
            return Err(BsonError::InvalidUsage(format!(
                "read_bson_type called in state {:?}",
                self.state
            )));
        }
        let ctx = self.context()?;
        let marker = self.read_u8()?;
        if marker == 0 {
            if self.pos != ctx.end {
                return Err(BsonError::Format(format!(
                    "document terminator at offset {} but declared end is {}",
                    self.pos - 1,
                    ctx.end
                )));
            }
            self.current_type = None;
            self.state = match ctx.kind {
                ContextKind::Document => ReaderState::EndOfDocument,
                ContextKind::Array => ReaderState::EndOfArray,
            };
            return Ok(None);
        }
        let ty = BsonType::from_u8(marker).ok_or_else(|| {
            BsonError::Format(format!(
                "invalid element type 0x{:02x} at offset {}",
                marker,
                self.pos - 1
            ))
        })?;
        self.current_name = self.read_cstring()?;
        self.current_type = Some(ty);
        self.state = ReaderState::Value;
        Ok(Some(ty))
    }

    pub fn read_start_document(&mut self) -> BsonResult<()> {
        self.start_container(BsonType::Document, ContextKind::Document)
    }

    pub fn read_end_document(&mut self) -> BsonResult<()> {
        if self.state != ReaderState::EndOfDocument {
            return Err(BsonError::InvalidUsage(format!(
                "read_end_document called in state {:?}",
                self.state
            )));
        }
        self.end_container()
    }

    pub fn read_start_array(&mut self) -> BsonResult<()> {
        self.start_container(BsonType::Array, ContextKind::Array)
    }

    pub fn read_end_array(&mut self) -> BsonResult<()> {
        if self.state != ReaderState::EndOfArray {
            return Err(BsonError::InvalidUsage(format!(
                "read_end_array called in state {:?}",
                self.state
            )));
        }
        self.end_container()
    }

    pub fn read_double(&mut self) -> BsonResult<f64> {
        self.begin_value(BsonType::Double)?;
        let v = f64::from_le_bytes(self.read_array::<8>()?);
        self.end_value();
        Ok(v)
    }

    pub fn read_string(&mut self) -> BsonResult<String> {
        self.begin_value(BsonType::String)?;
        let s = self.read_length_prefixed_string()?;
        self.end_value();
        Ok(s)
    }

    pub fn read_binary(&mut self) -> BsonResult<Binary> {
        self.begin_value(BsonType::Binary)?;
        let len = self.read_length(0)?;
        let subtype = BinarySubtype::from(self.read_u8()?);
        let bytes = if subtype == BinarySubtype::BinaryOld {
            let inner = self.read_length(0)?;
            if inner + 4 != len {
                return Err(BsonError::Format(format!(
                    "old binary inner length {} does not match outer length {}",
                    inner, len
                )));
            }
            self.take(inner)?.to_vec()
        } else {
            self.take(len)?.to_vec()
        };
        self.end_value();
        Ok(Binary { subtype, bytes })
    }

    pub fn read_undefined(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::Undefined)?;
        self.end_value();
        Ok(())
    }

    pub fn read_object_id(&mut self) -> BsonResult<ObjectId> {
        self.begin_value(BsonType::ObjectId)?;
        let id = ObjectId::from_bytes(self.read_array::<12>()?);
        self.end_value();
        Ok(id)
    }

    pub fn read_boolean(&mut self) -> BsonResult<bool> {
        self.begin_value(BsonType::Boolean)?;
        let v = match self.read_u8()? {
            0 => false,
            1 => true,
            b => {
                return Err(BsonError::Format(format!("invalid boolean byte 0x{:02x}", b)));
            }
        };
        self.end_value();
        Ok(v)
    }

    pub fn read_date_time(&mut self) -> BsonResult<DateTime> {
        self.begin_value(BsonType::DateTime)?;
        let v = DateTime::from_millis(i64::from_le_bytes(self.read_array::<8>()?));
        self.end_value();
        Ok(v)
    }

    pub fn read_null(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::Null)?;
        self.end_value();
        Ok(())
    }

    pub fn read_regular_expression(&mut self) -> BsonResult<Regex> {
        self.begin_value(BsonType::RegularExpression)?;
        let pattern = self.read_cstring()?;
        let options = self.read_cstring()?;
        self.end_value();
        Ok(Regex { pattern, options })
    }

    pub fn read_db_pointer(&mut self) -> BsonResult<DbPointer> {
        self.begin_value(BsonType::DbPointer)?;
        let namespace = self.read_length_prefixed_string()?;
        let id = ObjectId::from_bytes(self.read_array::<12>()?);
        self.end_value();
        Ok(DbPointer { namespace, id })
    }

    pub fn read_javascript(&mut self) -> BsonResult<String> {
        self.begin_value(BsonType::JavaScript)?;
        let s = self.read_length_prefixed_string()?;
        self.end_value();
        Ok(s)
    }

    pub fn read_symbol(&mut self) -> BsonResult<String> {
        self.begin_value(BsonType::Symbol)?;
        let s = self.read_length_prefixed_string()?;
        self.end_value();
        Ok(s)
    }

    pub fn read_javascript_with_scope(&mut self) -> BsonResult<JavaScriptCodeWithScope> {
        self.begin_value(BsonType::JavaScriptWithScope)?;
        let start = self.pos;
        let total = self.read_length(4)?;
        let code = self.read_length_prefixed_string()?;
        let scope_len = self.peek_length()?;
        let scope_bytes = self.take(scope_len)?;
        let mut scope_reader = BsonReader::new(scope_bytes);
        scope_reader.outer_depth = self.depth();
        let scope = scope_reader.read_document()?;
        if self.pos - start != total {
            return Err(BsonError::Format(format!(
                "code with scope declares {} bytes but contains {}",
                total,
                self.pos - start
            )));
        }
        self.end_value();
        Ok(JavaScriptCodeWithScope { code, scope })
    }

    pub fn read_int32(&mut self) -> BsonResult<i32> {
        self.begin_value(BsonType::Int32)?;
        let v = i32::from_le_bytes(self.read_array::<4>()?);
        self.end_value();
        Ok(v)
    }

    pub fn read_timestamp(&mut self) -> BsonResult<Timestamp> {
        self.begin_value(BsonType::Timestamp)?;
        let v = Timestamp::from_u64(u64::from_le_bytes(self.read_array::<8>()?));
        self.end_value();
        Ok(v)
    }

    pub fn read_int64(&mut self) -> BsonResult<i64> {
        self.begin_value(BsonType::Int64)?;
        let v = i64::from_le_bytes(self.read_array::<8>()?);
        self.end_value();
        Ok(v)
    }

    pub fn read_decimal128(&mut self) -> BsonResult<Decimal128> {
        self.begin_value(BsonType::Decimal128)?;
        let v = Decimal128::from_bytes(self.read_array::<16>()?);
        self.end_value();
        Ok(v)
    }

    pub fn read_min_key(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::MinKey)?;
        self.end_value();
        Ok(())
    }

    pub fn read_max_key(&mut self) -> BsonResult<()> {
        self.begin_value(BsonType::MaxKey)?;
        self.end_value();
        Ok(())
    }

    /// 读取当前值，类型不限
    pub fn read_value(&mut self) -> BsonResult<BsonValue> {
        let value = match self.current_bson_type()? {
            BsonType::Double => BsonValue::Double(self.read_double()?),
            BsonType::String => BsonValue::String(self.read_string()?),
            BsonType::Document => BsonValue::Document(self.read_document()?),
            BsonType::Array => BsonValue::Array(self.read_array_values()?),
            BsonType::Binary => BsonValue::Binary(self.read_binary()?),
            BsonType::Undefined => {
                self.read_undefined()?;
                BsonValue::Undefined
            }
            BsonType::ObjectId => BsonValue::ObjectId(self.read_object_id()?),
            BsonType::Boolean => BsonValue::Boolean(self.read_boolean()?),
            BsonType::DateTime => BsonValue::DateTime(self.read_date_time()?),
            BsonType::Null => {
                self.read_null()?;
                BsonValue::Null
            }
            BsonType::RegularExpression => {
                BsonValue::RegularExpression(self.read_regular_expression()?)
            }
            BsonType::DbPointer => BsonValue::DbPointer(self.read_db_pointer()?),
            BsonType::JavaScript => BsonValue::JavaScriptCode(self.read_javascript()?),
            BsonType::Symbol => BsonValue::Symbol(self.read_symbol()?),
            BsonType::JavaScriptWithScope => {
                BsonValue::JavaScriptCodeWithScope(self.read_javascript_with_scope()?)
            }
            BsonType::Int32 => BsonValue::Int32(self.read_int32()?),
            BsonType::Timestamp => BsonValue::Timestamp(self.read_timestamp()?),
            BsonType::Int64 => BsonValue::Int64(self.read_int64()?),
            BsonType::Decimal128 => BsonValue::Decimal128(self.read_decimal128()?),
            BsonType::MinKey => {
                self.read_min_key()?;
                BsonValue::MinKey
            }
            BsonType::MaxKey => {
                self.read_max_key()?;
                BsonValue::MaxKey
            }
        };
        Ok(value)
    }

    /// 读取整个文档（顶层或内嵌），重名字段保留第一次出现的值
    pub fn read_document(&mut self) -> BsonResult<Document> {
        self.read_start_document()?;
        let mut doc = Document::new();
        while self.read_bson_type()?.is_some() {
            let name = std::mem::take(&mut self.current_name);
            let value = self.read_value()?;
            doc.insert_if_absent(name, value);
        }
        self.read_end_document()?;
        Ok(doc)
    }

    /// 读取整个数组，元素名不做校验
    pub fn read_array_values(&mut self) -> BsonResult<Vec<BsonValue>> {
        self.read_start_array()?;
        let mut values = Vec::new();
        while self.read_bson_type()?.is_some() {
            values.push(self.read_value()?);
        }
        self.read_end_array()?;
        Ok(values)
    }

    /// 跳过当前值
    pub fn skip_value(&mut self) -> BsonResult<()> {
        let ty = self.current_bson_type()?;
        if self.state != ReaderState::Value {
            return Err(BsonError::InvalidUsage(
                "skip_value requires a current element".to_string(),
            ));
        }
        let size = match ty.fixed_size() {
            Some(n) => n,
            None => match ty {
                BsonType::String | BsonType::JavaScript | BsonType::Symbol => {
                    4 + self.peek_length()?
                }
                BsonType::Document | BsonType::Array | BsonType::JavaScriptWithScope => {
                    self.peek_length()?
                }
                BsonType::Binary => 4 + 1 + self.peek_length()?,
                BsonType::DbPointer => 4 + self.peek_length()? + 12,
                BsonType::RegularExpression => {
                    self.read_cstring()?;
                    self.read_cstring()?;
                    0
                }
                _ => unreachable!("fixed-size types handled above"),
            },
        };
        self.take(size)?;
        self.end_value();
        Ok(())
    }

    /// 在当前文档中查找指定字段
    ///
    /// # Brief
    /// 依次跳过不匹配的元素，找到后停在该元素的值之前
    ///
    /// # Returns
    /// 找到返回 true；读到文档末尾返回 false，此时读取器处于文档末尾状态
    pub fn find_element(&mut self, name: &str) -> BsonResult<bool> {
        while self.read_bson_type()?.is_some() {
            if self.current_name == name {
                return Ok(true);
            }
            self.skip_value()?;
        }
        Ok(false)
    }

    fn start_container(&mut self, expected: BsonType, kind: ContextKind) -> BsonResult<()> {
        match self.state {
            ReaderState::Initial if kind == ContextKind::Document => {}
            ReaderState::Value => self.check_type(expected)?,
            other => {
                return Err(BsonError::InvalidUsage(format!(
                    "cannot start {} in state {:?}",
                    expected, other
                )));
            }
        }
        if self.depth() >= MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let start = self.pos;
        let len = self.read_length(MIN_DOCUMENT_SIZE)?;
        if len > MAX_DOCUMENT_SIZE {
            return Err(BsonError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
        }
        let end = start + len;
        if end > self.limit() {
            return Err(BsonError::Format(format!(
                "{} at offset {} declares {} bytes but only {} remain",
                expected,
                start,
                len,
                self.limit().saturating_sub(start)
            )));
        }
        self.stack.push(Context { kind, end });
        self.current_type = None;
        self.state = ReaderState::Type;
        Ok(())
    }

    fn depth(&self) -> usize {
        self.outer_depth + self.stack.len()
    }

    fn end_container(&mut self) -> BsonResult<()> {
        self.stack.pop();
        self.state = if self.stack.is_empty() {
            ReaderState::Done
        } else {
            ReaderState::Type
        };
        Ok(())
    }

    fn check_type(&self, expected: BsonType) -> BsonResult<()> {
        match self.current_type {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(BsonError::Format(format!(
                "expected {} for element '{}', found {}",
                expected, self.current_name, actual
            ))),
            None => Err(BsonError::InvalidUsage("no current value".to_string())),
        }
    }

    fn begin_value(&self, expected: BsonType) -> BsonResult<()> {
        if self.state != ReaderState::Value {
            return Err(BsonError::InvalidUsage(format!(
                "cannot read {} in state {:?}",
                expected, self.state
            )));
        }
        self.check_type(expected)
    }

    fn end_value(&mut self) {
        self.current_type = None;
        self.state = ReaderState::Type;
    }

    fn context(&self) -> BsonResult<Context> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| BsonError::InvalidUsage("not inside a document".to_string()))
    }

    /// 当前上下文允许读到的位置
    fn limit(&self) -> usize {
        self.stack.last().map(|c| c.end).unwrap_or(self.data.len())
    }

    fn take(&mut self, len: usize) -> BsonResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(BsonError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        if end > self.limit() {
            return Err(BsonError::Format(format!(
                "value at offset {} overruns its enclosing document",
                self.pos
            )));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> BsonResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> BsonResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    /// 读取非负 i32 长度，`min` 为允许的最小值
    fn read_length(&mut self, min: usize) -> BsonResult<usize> {
        let raw = i32::from_le_bytes(self.read_array::<4>()?);
        if raw < 0 || (raw as usize) < min {
            return Err(BsonError::Format(format!("invalid length {}", raw)));
        }
        Ok(raw as usize)
    }

    fn peek_length(&self) -> BsonResult<usize> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(BsonError::UnexpectedEof)?;
        let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if raw < 0 {
            return Err(BsonError::Format(format!("invalid length {}", raw)));
        }
        Ok(raw as usize)
    }

    fn read_cstring(&mut self) -> BsonResult<String> {
        let limit = self.limit().min(self.data.len());
        let rest = self.data.get(self.pos..limit).ok_or(BsonError::UnexpectedEof)?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BsonError::Format("unterminated cstring".to_string()))?;
        let s = std::str::from_utf8(&rest[..nul])?.to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    fn read_length_prefixed_string(&mut self) -> BsonResult<String> {
        let len = self.read_length(1)?;
        let bytes = self.take(len)?;
        if bytes[len - 1] != 0 {
            return Err(BsonError::Format("string is missing its null terminator".to_string()));
        }
        Ok(std::str::from_utf8(&bytes[..len - 1])?.to_string())
    }
}
