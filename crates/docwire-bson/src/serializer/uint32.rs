use super::{
    cannot_decode, unsupported_representation, BsonSerializer, DecodeContext, EncodeContext,
    WithConverter, WithRepresentation,
};
use crate::converter::RepresentationConverter;
use crate::spec::BsonType;
use crate::{BsonError, BsonResult};

/// u32 序列化器
///
/// 数值形式经过 [`RepresentationConverter`]，字符串形式为十进制文本。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UInt32Serializer {
    representation: BsonType,
    converter: RepresentationConverter,
}

impl Default for UInt32Serializer {
    fn default() -> Self {
        Self {
            representation: BsonType::Int32,
            converter: RepresentationConverter::STRICT,
        }
    }
}

impl UInt32Serializer {
    pub fn new(representation: BsonType, converter: RepresentationConverter) -> BsonResult<Self> {
        Ok(Self::default()
            .with_representation(representation)?
            .with_converter(converter))
    }
}

impl WithRepresentation for UInt32Serializer {
    fn representation(&self) -> BsonType {
        self.representation
    }

    fn with_representation(self, representation: BsonType) -> BsonResult<Self> {
        match representation {
            BsonType::Double | BsonType::Int32 | BsonType::Int64 | BsonType::String => Ok(Self {
                representation,
                ..self
            }),
            other => Err(unsupported_representation("UInt32", other)),
        }
    }
}

impl WithConverter for UInt32Serializer {
    fn converter(&self) -> RepresentationConverter {
        self.converter
    }

    fn with_converter(self, converter: RepresentationConverter) -> Self {
        Self { converter, ..self }
    }
}

impl BsonSerializer for UInt32Serializer {
    type Value = u32;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<u32> {
        let reader = ctx.reader();
        match reader.current_bson_type()? {
            BsonType::Double => self.converter.f64_to_u32(reader.read_double()?),
            BsonType::Int32 => self.converter.i32_to_u32(reader.read_int32()?),
            BsonType::Int64 => self.converter.i64_to_u32(reader.read_int64()?),
            BsonType::String => {
                let s = reader.read_string()?;
                s.trim().parse::<u32>().map_err(|e| {
                    BsonError::Format(format!("'{}' is not a valid UInt32: {}", s, e))
                })
            }
            other => Err(cannot_decode("UInt32", other)),
        }
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &u32) -> BsonResult<()> {
        let writer = ctx.writer();
        match self.representation {
            BsonType::Double => writer.write_double(self.converter.u32_to_f64(*value)),
            BsonType::Int32 => writer.write_int32(self.converter.u32_to_i32(*value)?),
            BsonType::Int64 => writer.write_int64(self.converter.u32_to_i64(*value)),
            BsonType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("UInt32", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{decode_field, field_bytes, round_trip};
    use super::*;
    use crate::registry::SerializerRegistry;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries_per_representation() {
        let wrapping = RepresentationConverter::new(true, false);
        for repr in [BsonType::Double, BsonType::Int32, BsonType::Int64, BsonType::String] {
            let s = UInt32Serializer::new(repr, wrapping).unwrap();
            for v in [0u32, 1, i32::MAX as u32, i32::MAX as u32 + 1, u32::MAX] {
                assert_eq!(round_trip(&s, &v).unwrap(), v, "{:?} {}", repr, v);
            }
        }
    }

    #[test]
    fn test_strict_int32_rejects_large_values() {
        let s = UInt32Serializer::default();
        assert!(round_trip(&s, &u32::MAX).unwrap_err().is_representation());
        assert_eq!(round_trip(&s, &(i32::MAX as u32)).unwrap(), i32::MAX as u32);
    }

    #[test]
    fn test_decode_rules() {
        let registry = SerializerRegistry::with_defaults();
        let s = UInt32Serializer::default();
        assert!(decode_field(&s, &registry, &field_bytes(-1)).unwrap_err().is_representation());
        assert!(decode_field(&s, &registry, &field_bytes(1.5)).unwrap_err().is_representation());
        assert_eq!(decode_field(&s, &registry, &field_bytes(" 42 ")).unwrap(), 42);
        let err = decode_field(&s, &registry, &field_bytes("forty")).unwrap_err();
        assert!(matches!(err, BsonError::Format(_)));
        assert!(decode_field(&s, &registry, &field_bytes(true)).unwrap_err().is_representation());
    }

    proptest! {
        #[test]
        fn prop_int64_round_trip(v in any::<u32>()) {
            let s = UInt32Serializer::new(BsonType::Int64, RepresentationConverter::STRICT).unwrap();
            prop_assert_eq!(round_trip(&s, &v).unwrap(), v);
        }
    }
}
