//! 线上协议消息
//!
//! 旧式请求/应答报文：OP_QUERY、OP_GET_MORE、OP_KILL_CURSORS 以及 OP_REPLY。
//! 所有整数均为小端序，报文以 16 字节头开始：
//!
//! ```text
//! | messageLength i32 | requestID i32 | responseTo i32 | opCode i32 | body... |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use docwire_bson::{decode_document, deserialize_document, document_length, encode_document_into};
use docwire_bson::{BsonSerializer, Document, SerializerRegistry};
use docwire_common::{DriverError, DriverResult};
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicI32, Ordering};

pub const MAX_MESSAGE_SIZE: usize = 48 * 1000 * 1000;

static REQUEST_ID_COUNTER: AtomicI32 = AtomicI32::new(1);

/// 分配进程内唯一的请求 ID
pub fn next_request_id() -> i32 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    GetMore = 2005,
    KillCursors = 2007,
}

impl TryFrom<i32> for OpCode {
    type Error = DriverError;

    fn try_from(value: i32) -> DriverResult<Self> {
        match value {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2007 => Ok(OpCode::KillCursors),
            other => Err(DriverError::Protocol(format!("unknown opcode {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub opcode: OpCode,
}

impl MessageHeader {
    pub const SIZE: usize = 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.message_length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.opcode as i32);
    }

    /// 解析报文头，并校验声明长度与实际长度一致
    pub fn decode(data: &[u8]) -> DriverResult<Self> {
        if data.len() < Self::SIZE {
            return Err(DriverError::Protocol(format!(
                "message of {} bytes is shorter than its header",
                data.len()
            )));
        }
        let mut buf = data;
        let message_length = buf.get_i32_le();
        let request_id = buf.get_i32_le();
        let response_to = buf.get_i32_le();
        let opcode = OpCode::try_from(buf.get_i32_le())?;
        if message_length < 0 || message_length as usize != data.len() {
            return Err(DriverError::Protocol(format!(
                "message length {} does not match received {} bytes",
                message_length,
                data.len()
            )));
        }
        Ok(Self {
            message_length,
            request_id,
            response_to,
            opcode,
        })
    }
}

/// OP_QUERY 标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct QueryFlags(i32);

impl QueryFlags {
    pub const NONE: Self = Self(0);
    pub const TAILABLE_CURSOR: Self = Self(2);
    /// 允许在非主节点上读取
    pub const SLAVE_OK: Self = Self(4);
    pub const OPLOG_REPLAY: Self = Self(8);
    pub const NO_CURSOR_TIMEOUT: Self = Self(16);
    pub const AWAIT_DATA: Self = Self(32);
    pub const EXHAUST: Self = Self(64);
    pub const PARTIAL: Self = Self(128);

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// OP_REPLY 标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplyFlags(i32);

impl ReplyFlags {
    pub const NONE: Self = Self(0);
    pub const CURSOR_NOT_FOUND: Self = Self(1);
    pub const QUERY_FAILURE: Self = Self(2);
    pub const SHARD_CONFIG_STALE: Self = Self(4);
    pub const AWAIT_CAPABLE: Self = Self(8);

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ReplyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryMessage {
    pub request_id: i32,
    pub flags: QueryFlags,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub fields: Option<Document>,
}

impl QueryMessage {
    pub fn encode(&self) -> DriverResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(256);
        let start = begin_message(&mut buf, self.request_id, OpCode::Query);
        buf.put_i32_le(self.flags.bits());
        put_cstring(&mut buf, &self.full_collection_name)?;
        buf.put_i32_le(self.number_to_skip);
        buf.put_i32_le(self.number_to_return);
        encode_document_into(&self.query, &mut buf)?;
        if let Some(fields) = &self.fields {
            encode_document_into(fields, &mut buf)?;
        }
        finish_message(&mut buf, start)?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMoreMessage {
    pub request_id: i32,
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

impl GetMoreMessage {
    pub fn encode(&self) -> DriverResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(64);
        let start = begin_message(&mut buf, self.request_id, OpCode::GetMore);
        buf.put_i32_le(0);
        put_cstring(&mut buf, &self.full_collection_name)?;
        buf.put_i32_le(self.number_to_return);
        buf.put_i64_le(self.cursor_id);
        finish_message(&mut buf, start)?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursorsMessage {
    pub request_id: i32,
    pub cursor_ids: Vec<i64>,
}

impl KillCursorsMessage {
    pub fn encode(&self) -> DriverResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(MessageHeader::SIZE + 8 + 8 * self.cursor_ids.len());
        let start = begin_message(&mut buf, self.request_id, OpCode::KillCursors);
        buf.put_i32_le(0);
        buf.put_i32_le(self.cursor_ids.len() as i32);
        for id in &self.cursor_ids {
            buf.put_i64_le(*id);
        }
        finish_message(&mut buf, start)?;
        Ok(buf)
    }
}

/// 解析后的客户端请求，供测试替身或代理使用
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMessage {
    Query(QueryMessage),
    GetMore(GetMoreMessage),
    KillCursors(KillCursorsMessage),
}

impl RequestMessage {
    pub fn request_id(&self) -> i32 {
        match self {
            RequestMessage::Query(m) => m.request_id,
            RequestMessage::GetMore(m) => m.request_id,
            RequestMessage::KillCursors(m) => m.request_id,
        }
    }

    pub fn decode(data: &[u8]) -> DriverResult<Self> {
        let header = MessageHeader::decode(data)?;
        let mut body = &data[MessageHeader::SIZE..];
        match header.opcode {
            OpCode::Query => {
                need(&body, 4, "query flags")?;
                let flags = QueryFlags::from_bits(body.get_i32_le());
                let full_collection_name = get_cstring(&mut body)?;
                need(&body, 8, "skip/return counts")?;
                let number_to_skip = body.get_i32_le();
                let number_to_return = body.get_i32_le();
                let query = take_document(&mut body)?;
                let fields = if body.has_remaining() {
                    Some(take_document(&mut body)?)
                } else {
                    None
                };
                Ok(RequestMessage::Query(QueryMessage {
                    request_id: header.request_id,
                    flags,
                    full_collection_name,
                    number_to_skip,
                    number_to_return,
                    query,
                    fields,
                }))
            }
            OpCode::GetMore => {
                need(&body, 4, "reserved field")?;
                body.advance(4);
                let full_collection_name = get_cstring(&mut body)?;
                need(&body, 12, "get more body")?;
                Ok(RequestMessage::GetMore(GetMoreMessage {
                    request_id: header.request_id,
                    full_collection_name,
                    number_to_return: body.get_i32_le(),
                    cursor_id: body.get_i64_le(),
                }))
            }
            OpCode::KillCursors => {
                need(&body, 8, "kill cursors body")?;
                body.advance(4);
                let count = body.get_i32_le();
                if count < 0 {
                    return Err(DriverError::Protocol(format!("negative cursor count {}", count)));
                }
                need(&body, count as usize * 8, "cursor ids")?;
                let cursor_ids = (0..count).map(|_| body.get_i64_le()).collect();
                Ok(RequestMessage::KillCursors(KillCursorsMessage {
                    request_id: header.request_id,
                    cursor_ids,
                }))
            }
            OpCode::Reply => Err(DriverError::Protocol(
                "OP_REPLY is not a request".to_string(),
            )),
        }
    }
}

/// OP_REPLY 应答，文档保持原始字节，按需解码
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    pub header: MessageHeader,
    pub response_flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<Bytes>,
}

impl ReplyMessage {
    /// 编码应答报文，服务端或测试替身使用
    pub fn encode(
        request_id: i32,
        response_to: i32,
        flags: ReplyFlags,
        cursor_id: i64,
        starting_from: i32,
        documents: &[Document],
    ) -> DriverResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(256);
        let start = begin_message(&mut buf, request_id, OpCode::Reply);
        // responseTo 位于头部偏移 8
        buf[start + 8..start + 12].copy_from_slice(&response_to.to_le_bytes());
        buf.put_i32_le(flags.bits());
        buf.put_i64_le(cursor_id);
        buf.put_i32_le(starting_from);
        buf.put_i32_le(documents.len() as i32);
        for doc in documents {
            encode_document_into(doc, &mut buf)?;
        }
        finish_message(&mut buf, start)?;
        Ok(buf)
    }

    pub fn decode(data: Bytes) -> DriverResult<Self> {
        let header = MessageHeader::decode(&data)?;
        if header.opcode != OpCode::Reply {
            return Err(DriverError::Protocol(format!(
                "expected OP_REPLY, received {:?}",
                header.opcode
            )));
        }
        let mut body = &data[MessageHeader::SIZE..];
        need(&body, 20, "reply body")?;
        let response_flags = ReplyFlags::from_bits(body.get_i32_le());
        let cursor_id = body.get_i64_le();
        let starting_from = body.get_i32_le();
        let number_returned = body.get_i32_le();

        let mut documents = Vec::new();
        let mut offset = MessageHeader::SIZE + 20;
        while offset < data.len() {
            let len = document_length(&data[offset..])?;
            if offset + len > data.len() {
                return Err(DriverError::Protocol(format!(
                    "document at offset {} overruns the reply",
                    offset
                )));
            }
            documents.push(data.slice(offset..offset + len));
            offset += len;
        }
        if documents.len() as i64 != number_returned as i64 {
            return Err(DriverError::Protocol(format!(
                "reply declares {} documents but contains {}",
                number_returned,
                documents.len()
            )));
        }
        Ok(Self {
            header,
            response_flags,
            cursor_id,
            starting_from,
            number_returned,
            documents,
        })
    }

    /// 校验应答与请求对应且未携带失败标志
    pub fn check(&self, request_id: i32) -> DriverResult<()> {
        if self.header.response_to != request_id {
            return Err(DriverError::Protocol(format!(
                "reply is for request {} but {} was expected",
                self.header.response_to, request_id
            )));
        }
        if self.response_flags.contains(ReplyFlags::CURSOR_NOT_FOUND) {
            return Err(DriverError::Protocol(format!(
                "cursor {} not found on server",
                self.cursor_id
            )));
        }
        if self.response_flags.contains(ReplyFlags::QUERY_FAILURE) {
            let detail = match self.documents.first() {
                Some(raw) => {
                    let doc = decode_document(raw)?;
                    let message = doc.get_str("$err").unwrap_or("unknown error").to_string();
                    match doc.get_i64("code") {
                        Some(code) => format!("{} (code {})", message, code),
                        None => message,
                    }
                }
                None => "unknown error".to_string(),
            };
            return Err(DriverError::Protocol(format!("query failure: {}", detail)));
        }
        Ok(())
    }

    /// 用给定序列化器解码全部文档
    pub fn decode_documents<S>(
        &self,
        serializer: &S,
        registry: &SerializerRegistry,
    ) -> DriverResult<Vec<S::Value>>
    where
        S: BsonSerializer + ?Sized,
    {
        self.documents
            .iter()
            .map(|raw| deserialize_document(serializer, registry, raw).map_err(DriverError::from))
            .collect()
    }
}

fn begin_message(buf: &mut BytesMut, request_id: i32, opcode: OpCode) -> usize {
    let start = buf.len();
    MessageHeader {
        message_length: 0,
        request_id,
        response_to: 0,
        opcode,
    }
    .encode(buf);
    start
}

fn finish_message(buf: &mut BytesMut, start: usize) -> DriverResult<()> {
    let len = buf.len() - start;
    if len > MAX_MESSAGE_SIZE {
        return Err(DriverError::Argument(format!(
            "message of {} bytes exceeds the maximum of {}",
            len, MAX_MESSAGE_SIZE
        )));
    }
    buf[start..start + 4].copy_from_slice(&(len as i32).to_le_bytes());
    Ok(())
}

fn put_cstring(buf: &mut BytesMut, s: &str) -> DriverResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(DriverError::argument("collection", "must not contain a null byte"));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn need(buf: &&[u8], n: usize, what: &str) -> DriverResult<()> {
    if buf.remaining() < n {
        return Err(DriverError::Protocol(format!("truncated {}", what)));
    }
    Ok(())
}

fn get_cstring(buf: &mut &[u8]) -> DriverResult<String> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DriverError::Protocol("unterminated cstring".to_string()))?;
    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|e| DriverError::Protocol(format!("invalid cstring: {}", e)))?
        .to_string();
    buf.advance(nul + 1);
    Ok(s)
}

fn take_document(buf: &mut &[u8]) -> DriverResult<Document> {
    let len = document_length(buf)?;
    need(buf, len, "document")?;
    let doc = decode_document(&buf[..len])?;
    buf.advance(len);
    Ok(doc)
}
