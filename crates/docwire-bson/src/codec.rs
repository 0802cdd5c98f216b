//! 文档级编解码
//!
//! 在 [`BsonReader`] / [`BsonWriter`] 之上提供整文档的便捷函数。

use crate::document::Document;
use crate::reader::BsonReader;
use crate::writer::BsonWriter;
use crate::{BsonError, BsonResult};
use bytes::BytesMut;

/// 编码文档为字节向量
///
/// # Arguments
/// * `doc` - 要编码的文档
///
/// # Returns
/// 成功返回完整的 BSON 字节，包括长度前缀和结尾 0x00
pub fn encode_document(doc: &Document) -> BsonResult<Vec<u8>> {
    let mut writer = BsonWriter::with_capacity(256);
    writer.write_document(doc)?;
    writer.into_bytes()
}

/// 将文档追加到缓冲区末尾
///
/// # Brief
/// 用于拼装线上报文，缓冲区原有内容保持不变
pub fn encode_document_into(doc: &Document, buf: &mut BytesMut) -> BsonResult<()> {
    let mut writer = BsonWriter::from_buffer(buf.split_off(buf.len()));
    writer.write_document(doc)?;
    buf.unsplit(writer.into_buffer()?);
    Ok(())
}

/// 解码恰好一个文档
///
/// # Brief
/// 输入必须完整包含一个文档，尾部多余字节视为格式错误
pub fn decode_document(data: &[u8]) -> BsonResult<Document> {
    let mut reader = BsonReader::new(data);
    let doc = reader.read_document()?;
    if reader.position() != data.len() {
        return Err(BsonError::Format(format!(
            "{} trailing bytes after document",
            data.len() - reader.position()
        )));
    }
    Ok(doc)
}

/// 读取文档的长度前缀，不做完整校验
pub fn document_length(data: &[u8]) -> BsonResult<usize> {
    let prefix = data.get(..4).ok_or(BsonError::UnexpectedEof)?;
    let len = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len < crate::spec::MIN_DOCUMENT_SIZE as i32 {
        return Err(BsonError::Format(format!("invalid document length {}", len)));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::BinarySubtype;
    use crate::value::{Binary, BsonValue, DateTime, DbPointer, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp};
    use docwire_common::ObjectId;
    use proptest::prelude::*;

    const HELLO: &[u8] = b"\x16\x00\x00\x00\x02hello\x00\x06\x00\x00\x00world\x00\x00";

    fn every_type() -> Document {
        Document::new()
            .with("double", 3.25)
            .with("string", "text")
            .with("doc", Document::new().with("inner", 1))
            .with("array", vec![BsonValue::Int32(1), BsonValue::String("two".into())])
            .with("binary", Binary::generic(vec![1u8, 2, 3]))
            .with(
                "old_binary",
                Binary {
                    subtype: BinarySubtype::BinaryOld,
                    bytes: vec![9, 8],
                },
            )
            .with("undefined", BsonValue::Undefined)
            .with("oid", ObjectId::from_bytes([7; 12]))
            .with("bool", true)
            .with("date", DateTime::from_millis(-5))
            .with("null", BsonValue::Null)
            .with(
                "regex",
                BsonValue::RegularExpression(Regex {
                    pattern: "^a".into(),
                    options: "i".into(),
                }),
            )
            .with(
                "dbref",
                BsonValue::DbPointer(DbPointer {
                    namespace: "db.coll".into(),
                    id: ObjectId::from_bytes([1; 12]),
                }),
            )
            .with("code", BsonValue::JavaScriptCode("f()".into()))
            .with("symbol", BsonValue::Symbol("sym".into()))
            .with(
                "scoped",
                BsonValue::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                    code: "x + y".into(),
                    scope: Document::new().with("x", 1),
                }),
            )
            .with("int32", -7)
            .with("ts", Timestamp { time: 10, increment: 2 })
            .with("int64", i64::MAX)
            .with("dec", BsonValue::Decimal128(Decimal128::from_bytes([3; 16])))
            .with("min", BsonValue::MinKey)
            .with("max", BsonValue::MaxKey)
    }

    #[test]
    fn test_hello_world_bytes() {
        let doc = Document::new().with("hello", "world");
        assert_eq!(encode_document(&doc).unwrap(), HELLO.to_vec());
        assert_eq!(decode_document(HELLO).unwrap(), doc);
    }

    #[test]
    fn test_empty_document() {
        let bytes = encode_document(&Document::new()).unwrap();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
        assert!(decode_document(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_all_types_byte_stable() {
        let doc = every_type();
        let bytes = encode_document(&doc).unwrap();
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(encode_document(&decoded).unwrap(), bytes);
        assert_eq!(document_length(&bytes).unwrap(), bytes.len());
    }

    #[test]
    fn test_skip_every_type() {
        let bytes = encode_document(&every_type().with("last", "found")).unwrap();
        let mut reader = BsonReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert!(reader.find_element("last").unwrap());
        assert_eq!(reader.read_string().unwrap(), "found");
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = HELLO.to_vec();
        bytes.push(0);
        let err = decode_document(&bytes).unwrap_err();
        assert!(matches!(err, BsonError::Format(_)));
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::from(&b"head"[..]);
        encode_document_into(&Document::new().with("hello", "world"), &mut buf).unwrap();
        assert_eq!(&buf[..4], b"head");
        assert_eq!(&buf[4..], HELLO);
    }

    #[test]
    fn test_nesting_limit() {
        let mut doc = Document::new();
        for _ in 0..crate::spec::MAX_NESTING_DEPTH {
            doc = Document::new().with("d", doc);
        }
        let err = encode_document(&doc).unwrap_err();
        assert!(matches!(err, BsonError::NestingTooDeep(_)));
    }

    proptest! {
        #[test]
        fn prop_scalar_documents_survive(
            i in any::<i32>(),
            l in any::<i64>(),
            s in "[a-z]{0,16}",
            b in any::<bool>(),
        ) {
            let doc = Document::new().with("i", i).with("l", l).with("s", s).with("b", b);
            let bytes = encode_document(&doc).unwrap();
            prop_assert_eq!(decode_document(&bytes).unwrap(), doc);
        }

        #[test]
        fn prop_garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_document(&data);
        }
    }
}
