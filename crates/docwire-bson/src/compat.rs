//! 与 `bson` crate 互转
//!
//! 值级别一一对应，线上字节保持一致。`bson::DbPointer` 不公开字段，
//! 因此这一类型经由字节往返转换。

use crate::codec::{decode_document, encode_document};
use crate::document::Document;
use crate::spec::BinarySubtype;
use crate::value::{Binary, BsonValue, DateTime, DbPointer, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bson::Bson;
use docwire_common::ObjectId;

/// 将 BsonValue 转换为 `bson::Bson`
///
/// # Arguments
/// * `value` - 要转换的值
///
/// # Returns
/// 成功返回等价的 `Bson`，编码后的字节与本 crate 的编码一致
pub fn to_bson(value: &BsonValue) -> BsonResult<Bson> {
    let bson = match value {
        BsonValue::Double(v) => Bson::Double(*v),
        BsonValue::String(s) => Bson::String(s.clone()),
        BsonValue::Document(doc) => Bson::Document(to_bson_document(doc)?),
        BsonValue::Array(arr) => Bson::Array(arr.iter().map(to_bson).collect::<BsonResult<_>>()?),
        BsonValue::Binary(b) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::from(u8::from(b.subtype)),
            bytes: b.bytes.clone(),
        }),
        BsonValue::Undefined => Bson::Undefined,
        BsonValue::ObjectId(oid) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(*oid.as_bytes())),
        BsonValue::Boolean(b) => Bson::Boolean(*b),
        BsonValue::DateTime(dt) => Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis())),
        BsonValue::Null => Bson::Null,
        BsonValue::RegularExpression(r) => Bson::RegularExpression(bson::Regex {
            pattern: r.pattern.clone(),
            options: r.options.clone(),
        }),
        BsonValue::DbPointer(p) => db_pointer_to_bson(p)?,
        BsonValue::JavaScriptCode(code) => Bson::JavaScriptCode(code.clone()),
        BsonValue::Symbol(s) => Bson::Symbol(s.clone()),
        BsonValue::JavaScriptCodeWithScope(js) => {
            Bson::JavaScriptCodeWithScope(bson::JavaScriptCodeWithScope {
                code: js.code.clone(),
                scope: to_bson_document(&js.scope)?,
            })
        }
        BsonValue::Int32(n) => Bson::Int32(*n),
        BsonValue::Timestamp(ts) => Bson::Timestamp(bson::Timestamp {
            time: ts.time,
            increment: ts.increment,
        }),
        BsonValue::Int64(n) => Bson::Int64(*n),
        BsonValue::Decimal128(d) => Bson::Decimal128(bson::Decimal128::from_bytes(d.bytes())),
        BsonValue::MinKey => Bson::MinKey,
        BsonValue::MaxKey => Bson::MaxKey,
    };
    Ok(bson)
}

/// 从 `bson::Bson` 转换为 BsonValue
pub fn from_bson(bson: &Bson) -> BsonResult<BsonValue> {
    let value = match bson {
        Bson::Double(v) => BsonValue::Double(*v),
        Bson::String(s) => BsonValue::String(s.clone()),
        Bson::Array(arr) => BsonValue::Array(arr.iter().map(from_bson).collect::<BsonResult<_>>()?),
        Bson::Document(doc) => BsonValue::Document(from_bson_document(doc)?),
        Bson::Boolean(b) => BsonValue::Boolean(*b),
        Bson::Null => BsonValue::Null,
        Bson::RegularExpression(r) => BsonValue::RegularExpression(Regex {
            pattern: r.pattern.clone(),
            options: r.options.clone(),
        }),
        Bson::JavaScriptCode(code) => BsonValue::JavaScriptCode(code.clone()),
        Bson::JavaScriptCodeWithScope(js) => {
            BsonValue::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: js.code.clone(),
                scope: from_bson_document(&js.scope)?,
            })
        }
        Bson::Int32(n) => BsonValue::Int32(*n),
        Bson::Int64(n) => BsonValue::Int64(*n),
        Bson::Timestamp(ts) => BsonValue::Timestamp(Timestamp {
            time: ts.time,
            increment: ts.increment,
        }),
        Bson::Binary(b) => BsonValue::Binary(Binary {
            subtype: BinarySubtype::from(u8::from(b.subtype)),
            bytes: b.bytes.clone(),
        }),
        Bson::ObjectId(oid) => BsonValue::ObjectId(ObjectId::from_bytes(oid.bytes())),
        Bson::DateTime(dt) => BsonValue::DateTime(DateTime::from_millis(dt.timestamp_millis())),
        Bson::Symbol(s) => BsonValue::Symbol(s.clone()),
        Bson::Decimal128(d) => BsonValue::Decimal128(Decimal128::from_bytes(d.bytes())),
        Bson::Undefined => BsonValue::Undefined,
        Bson::MaxKey => BsonValue::MaxKey,
        Bson::MinKey => BsonValue::MinKey,
        Bson::DbPointer(_) => db_pointer_from_bson(bson)?,
    };
    Ok(value)
}

pub fn to_bson_document(doc: &Document) -> BsonResult<bson::Document> {
    let mut out = bson::Document::new();
    for (k, v) in doc.iter() {
        out.insert(k.to_string(), to_bson(v)?);
    }
    Ok(out)
}

pub fn from_bson_document(doc: &bson::Document) -> BsonResult<Document> {
    let mut out = Document::with_capacity(doc.len());
    for (k, v) in doc {
        out.insert(k.as_str(), from_bson(v)?);
    }
    Ok(out)
}

/// 渲染为 relaxed extended JSON，用于日志
pub fn to_relaxed_json(doc: &Document) -> BsonResult<serde_json::Value> {
    Ok(Bson::Document(to_bson_document(doc)?).into_relaxed_extjson())
}

fn db_pointer_to_bson(pointer: &DbPointer) -> BsonResult<Bson> {
    let bytes = encode_document(&Document::new().with("v", BsonValue::DbPointer(pointer.clone())))?;
    let mut doc = bson::Document::from_reader(&mut &bytes[..])
        .map_err(|e| BsonError::Format(format!("bson rejected DbPointer: {}", e)))?;
    doc.remove("v")
        .ok_or_else(|| BsonError::Format("DbPointer lost in conversion".to_string()))
}

fn db_pointer_from_bson(pointer: &Bson) -> BsonResult<BsonValue> {
    let mut doc = bson::Document::new();
    doc.insert("v", pointer.clone());
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)
        .map_err(|e| BsonError::Representation(format!("bson failed to write DbPointer: {}", e)))?;
    let mut ours = decode_document(&bytes)?;
    ours.remove("v")
        .ok_or_else(|| BsonError::Format("DbPointer lost in conversion".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new()
            .with("name", "Alice")
            .with("age", 30)
            .with("big", 1i64 << 40)
            .with("score", 9.5)
            .with("tags", vec![BsonValue::from("a"), BsonValue::from("b")])
            .with("oid", ObjectId::from_bytes([0xAB; 12]))
            .with("at", DateTime::from_millis(1_700_000_000_000))
            .with("ts", Timestamp { time: 5, increment: 9 })
            .with("bin", Binary::generic(vec![0u8, 255]))
            .with("nested", Document::new().with("ok", true).with("nil", BsonValue::Null))
            .with(
                "re",
                BsonValue::RegularExpression(Regex {
                    pattern: "a+".into(),
                    options: "im".into(),
                }),
            )
            .with("dec", BsonValue::Decimal128(Decimal128::from_bytes([1; 16])))
            .with("sym", BsonValue::Symbol("s".into()))
            .with("min", BsonValue::MinKey)
            .with("max", BsonValue::MaxKey)
    }

    #[test]
    fn test_bytes_match_bson_crate() {
        let doc = sample();
        let ours = encode_document(&doc).unwrap();
        let mut theirs = Vec::new();
        to_bson_document(&doc).unwrap().to_writer(&mut theirs).unwrap();
        assert_eq!(ours, theirs);

        let parsed = bson::Document::from_reader(&mut &ours[..]).unwrap();
        assert_eq!(from_bson_document(&parsed).unwrap(), doc);
    }

    #[test]
    fn test_db_pointer_conversion() {
        let value = BsonValue::DbPointer(DbPointer {
            namespace: "db.things".into(),
            id: ObjectId::from_bytes([3; 12]),
        });
        let bson = to_bson(&value).unwrap();
        assert!(matches!(bson, Bson::DbPointer(_)));
        assert_eq!(from_bson(&bson).unwrap(), value);
    }

    #[test]
    fn test_relaxed_json() {
        let json = to_relaxed_json(&Document::new().with("x", 1).with("s", "t")).unwrap();
        assert_eq!(json, serde_json::json!({ "x": 1, "s": "t" }));
    }
}
