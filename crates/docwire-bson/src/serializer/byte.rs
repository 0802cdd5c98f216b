//! u8 序列化器
//!
//! 解码时接受 Binary(1 字节) / Int32 / Int64 / String(1~2 位十六进制)，与配置的表示无关；
//! 编码时只使用配置的表示。整数形式通过回宽比较检测数据丢失。

use super::{cannot_decode, unsupported_representation, BsonSerializer, DecodeContext, EncodeContext, WithRepresentation};
use crate::spec::BsonType;
use crate::value::Binary;
use crate::{BsonError, BsonResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSerializer {
    representation: BsonType,
}

impl Default for ByteSerializer {
    fn default() -> Self {
        Self {
            representation: BsonType::Int32,
        }
    }
}

impl ByteSerializer {
    pub fn new(representation: BsonType) -> BsonResult<Self> {
        Self::default().with_representation(representation)
    }
}

impl WithRepresentation for ByteSerializer {
    fn representation(&self) -> BsonType {
        self.representation
    }

    fn with_representation(self, representation: BsonType) -> BsonResult<Self> {
        match representation {
            BsonType::Binary | BsonType::Int32 | BsonType::Int64 | BsonType::String => {
                Ok(Self { representation })
            }
            other => Err(unsupported_representation("Byte", other)),
        }
    }
}

impl BsonSerializer for ByteSerializer {
    type Value = u8;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<u8> {
        let reader = ctx.reader();
        let bson_type = reader.current_bson_type()?;
        let (value, lost_data) = match bson_type {
            BsonType::Binary => {
                let binary = reader.read_binary()?;
                if binary.bytes.len() != 1 {
                    return Err(BsonError::Format(
                        "Binary data for Byte must be exactly one byte long".to_string(),
                    ));
                }
                (binary.bytes[0], false)
            }
            BsonType::Int32 => {
                let v = reader.read_int32()?;
                let b = v as u8;
                (b, b as i32 != v)
            }
            BsonType::Int64 => {
                let v = reader.read_int64()?;
                let b = v as u8;
                (b, b as i64 != v)
            }
            BsonType::String => (parse_hex(&reader.read_string()?)?, false),
            other => return Err(cannot_decode("Byte", other)),
        };
        if lost_data {
            return Err(BsonError::Representation(format!(
                "Data loss occurred when trying to convert from {} to Byte",
                bson_type
            )));
        }
        Ok(value)
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &u8) -> BsonResult<()> {
        let writer = ctx.writer();
        match self.representation {
            BsonType::Binary => writer.write_binary(&Binary::generic(vec![*value])),
            BsonType::Int32 => writer.write_int32(*value as i32),
            BsonType::Int64 => writer.write_int64(*value as i64),
            BsonType::String => writer.write_string(&format!("{:02x}", value)),
            other => Err(unsupported_representation("Byte", other)),
        }
    }
}

/// 一位数字左侧补 "0"，再按两位十六进制解析
fn parse_hex(s: &str) -> BsonResult<u8> {
    let padded = if s.len() == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    };
    match hex::decode(&padded) {
        Ok(bytes) if bytes.len() == 1 => Ok(bytes[0]),
        _ => Err(BsonError::Format(format!(
            "'{}' is not a valid hexadecimal Byte",
            s
        ))),
    }
}
