//! GeoJSON 坐标与坐标参考系
//!
//! 坐标对编码为定长两元素 double 数组。坐标参考系 (CRS) 是多态的：
//!
//! ```text
//! { "type": "link", "properties": { "href": "...", "type": "proj4" } }
//! { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } }
//! ```
//!
//! 解码时先记下书签，扫描 `"type"` 字段后回退，再交给具体类型的序列化器。

use super::{BsonSerializer, DecodeContext, EncodeContext};
use crate::reader::BsonReader;
use crate::writer::BsonWriter;
use crate::{BsonError, BsonResult};

/// 投影坐标 (东向, 北向)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected2DCoordinates {
    pub easting: f64,
    pub northing: f64,
}

impl Projected2DCoordinates {
    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }
}

/// 地理坐标 (经度, 纬度)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geographic2DCoordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Geographic2DCoordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// 坐标的抽象类别，本身不可序列化
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinates {
    Projected2D(Projected2DCoordinates),
    Geographic2D(Geographic2DCoordinates),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedCrs {
    pub href: String,
    /// 链接内容的格式提示，如 "proj4"
    pub href_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCrs {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateReferenceSystem {
    Linked(LinkedCrs),
    Named(NamedCrs),
}

impl CoordinateReferenceSystem {
    /// 线上判别值
    pub fn type_name(&self) -> &'static str {
        match self {
            CoordinateReferenceSystem::Linked(_) => LINK,
            CoordinateReferenceSystem::Named(_) => NAME,
        }
    }
}

const LINK: &str = "link";
const NAME: &str = "name";

fn read_pair(reader: &mut BsonReader<'_>, what: &str) -> BsonResult<(f64, f64)> {
    reader.read_start_array()?;
    let mut values = [0.0f64; 2];
    for slot in values.iter_mut() {
        if reader.read_bson_type()?.is_none() {
            return Err(BsonError::Format(format!("{} must have exactly 2 values", what)));
        }
        *slot = reader.read_double()?;
    }
    if reader.read_bson_type()?.is_some() {
        return Err(BsonError::Format(format!("{} must have exactly 2 values", what)));
    }
    reader.read_end_array()?;
    Ok((values[0], values[1]))
}

fn write_pair(writer: &mut BsonWriter, a: f64, b: f64) -> BsonResult<()> {
    writer.write_start_array()?;
    writer.write_double(a)?;
    writer.write_double(b)?;
    writer.write_end_array()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Projected2DCoordinatesSerializer;

impl BsonSerializer for Projected2DCoordinatesSerializer {
    type Value = Projected2DCoordinates;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Projected2DCoordinates> {
        let (easting, northing) = read_pair(ctx.reader(), "Projected2DCoordinates")?;
        Ok(Projected2DCoordinates { easting, northing })
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &Projected2DCoordinates) -> BsonResult<()> {
        write_pair(ctx.writer(), value.easting, value.northing)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic2DCoordinatesSerializer;

impl BsonSerializer for Geographic2DCoordinatesSerializer {
    type Value = Geographic2DCoordinates;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Geographic2DCoordinates> {
        let (longitude, latitude) = read_pair(ctx.reader(), "Geographic2DCoordinates")?;
        Ok(Geographic2DCoordinates {
            longitude,
            latitude,
        })
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &Geographic2DCoordinates) -> BsonResult<()> {
        write_pair(ctx.writer(), value.longitude, value.latitude)
    }
}

/// 抽象坐标类型的注册锚点，编解码一律拒绝
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatesSerializer;

impl CoordinatesSerializer {
    fn refuse() -> BsonError {
        BsonError::InvalidUsage(
            "Only concrete subtypes of Coordinates can be serialized".to_string(),
        )
    }
}

impl BsonSerializer for CoordinatesSerializer {
    type Value = Coordinates;

    fn decode(&self, _ctx: &mut DecodeContext<'_, '_>) -> BsonResult<Coordinates> {
        Err(Self::refuse())
    }

    fn encode(&self, _ctx: &mut EncodeContext<'_>, _value: &Coordinates) -> BsonResult<()> {
        Err(Self::refuse())
    }
}

/// 读取 CRS 文档并逐个处理 properties 内的字段
fn read_crs<F>(reader: &mut BsonReader<'_>, expected_type: &str, mut on_property: F) -> BsonResult<()>
where
    F: FnMut(&str, &mut BsonReader<'_>) -> BsonResult<()>,
{
    reader.read_start_document()?;
    let mut seen_type = false;
    let mut seen_properties = false;
    while reader.read_bson_type()?.is_some() {
        let name = reader.current_name()?.to_string();
        match name.as_str() {
            // 重名字段以第一次出现为准
            "type" if seen_type => reader.skip_value()?,
            "properties" if seen_properties => reader.skip_value()?,
            "type" => {
                let actual = reader.read_string()?;
                if actual != expected_type {
                    return Err(BsonError::Format(format!(
                        "expected CRS type '{}', found '{}'",
                        expected_type, actual
                    )));
                }
                seen_type = true;
            }
            "properties" => {
                reader.read_start_document()?;
                while reader.read_bson_type()?.is_some() {
                    let prop = reader.current_name()?.to_string();
                    on_property(&prop, reader)?;
                }
                reader.read_end_document()?;
                seen_properties = true;
            }
            other => {
                return Err(BsonError::Format(format!(
                    "unexpected element '{}' in {} CRS",
                    other, expected_type
                )));
            }
        }
    }
    reader.read_end_document()?;
    if !seen_type {
        return Err(BsonError::Format(format!("{} CRS is missing the type field", expected_type)));
    }
    Ok(())
}

fn write_crs_header(writer: &mut BsonWriter, type_name: &str) -> BsonResult<()> {
    writer.write_start_document()?;
    writer.write_name("type")?;
    writer.write_string(type_name)?;
    writer.write_name("properties")?;
    writer.write_start_document()
}

fn write_crs_footer(writer: &mut BsonWriter) -> BsonResult<()> {
    writer.write_end_document()?;
    writer.write_end_document()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedCrsSerializer;

impl BsonSerializer for LinkedCrsSerializer {
    type Value = LinkedCrs;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<LinkedCrs> {
        let mut href = None;
        let mut href_type = None;
        read_crs(ctx.reader(), LINK, |prop, reader| {
            match prop {
                "href" if href.is_some() => reader.skip_value()?,
                "type" if href_type.is_some() => reader.skip_value()?,
                "href" => href = Some(reader.read_string()?),
                "type" => href_type = Some(reader.read_string()?),
                other => {
                    return Err(BsonError::Format(format!(
                        "unexpected property '{}' in linked CRS",
                        other
                    )));
                }
            }
            Ok(())
        })?;
        let href = href.ok_or_else(|| BsonError::Format("linked CRS is missing href".to_string()))?;
        Ok(LinkedCrs { href, href_type })
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &LinkedCrs) -> BsonResult<()> {
        let writer = ctx.writer();
        write_crs_header(writer, LINK)?;
        writer.write_name("href")?;
        writer.write_string(&value.href)?;
        if let Some(href_type) = &value.href_type {
            writer.write_name("type")?;
            writer.write_string(href_type)?;
        }
        write_crs_footer(writer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NamedCrsSerializer;

impl BsonSerializer for NamedCrsSerializer {
    type Value = NamedCrs;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<NamedCrs> {
        let mut name = None;
        read_crs(ctx.reader(), NAME, |prop, reader| match prop {
            "name" if name.is_some() => reader.skip_value(),
            "name" => {
                name = Some(reader.read_string()?);
                Ok(())
            }
            other => Err(BsonError::Format(format!(
                "unexpected property '{}' in named CRS",
                other
            ))),
        })?;
        let name = name.ok_or_else(|| BsonError::Format("named CRS is missing name".to_string()))?;
        Ok(NamedCrs { name })
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &NamedCrs) -> BsonResult<()> {
        let writer = ctx.writer();
        write_crs_header(writer, NAME)?;
        writer.write_name("name")?;
        writer.write_string(&value.name)?;
        write_crs_footer(writer)
    }
}

/// 多态 CRS 序列化器
///
/// # Brief
/// 按 `"type"` 判别值在注册表中解析具体类型的序列化器并委托给它，
/// 判别值缺失或未知时报格式错误，不产生部分结果
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateReferenceSystemSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrsKind {
    Linked,
    Named,
}

impl CoordinateReferenceSystemSerializer {
    fn actual_kind(reader: &mut BsonReader<'_>) -> BsonResult<CrsKind> {
        let bookmark = reader.bookmark();
        reader.read_start_document()?;
        if !reader.find_element("type")? {
            return Err(BsonError::Format(
                "CoordinateReferenceSystem object is missing the type field".to_string(),
            ));
        }
        let discriminator = reader.read_string()?;
        reader.return_to_bookmark(bookmark);
        match discriminator.as_str() {
            LINK => Ok(CrsKind::Linked),
            NAME => Ok(CrsKind::Named),
            other => Err(BsonError::Format(format!(
                "The type field of the CoordinateReferenceSystem is not valid: '{}'",
                other
            ))),
        }
    }
}

impl BsonSerializer for CoordinateReferenceSystemSerializer {
    type Value = CoordinateReferenceSystem;

    fn decode(&self, ctx: &mut DecodeContext<'_, '_>) -> BsonResult<CoordinateReferenceSystem> {
        match Self::actual_kind(ctx.reader())? {
            CrsKind::Linked => ctx.decode::<LinkedCrs>().map(CoordinateReferenceSystem::Linked),
            CrsKind::Named => ctx.decode::<NamedCrs>().map(CoordinateReferenceSystem::Named),
        }
    }

    fn encode(&self, ctx: &mut EncodeContext<'_>, value: &CoordinateReferenceSystem) -> BsonResult<()> {
        match value {
            CoordinateReferenceSystem::Linked(crs) => ctx.encode(crs),
            CoordinateReferenceSystem::Named(crs) => ctx.encode(crs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{decode_field, field_bytes, round_trip};
    use super::super::{deserialize_document, serialize_document, NullableSerializer};
    use super::*;
    use crate::codec::encode_document;
    use crate::document::Document;
    use crate::registry::SerializerRegistry;
    use crate::value::BsonValue;

    #[test]
    fn test_coordinate_pairs() {
        let p = Projected2DCoordinates::new(500000.0, -4649776.22);
        assert_eq!(round_trip(&Projected2DCoordinatesSerializer, &p).unwrap(), p);
        let g = Geographic2DCoordinates::new(-73.97, 40.77);
        assert_eq!(round_trip(&Geographic2DCoordinatesSerializer, &g).unwrap(), g);
    }

    #[test]
    fn test_pair_shape() {
        let registry = SerializerRegistry::with_defaults();
        let three = field_bytes(vec![BsonValue::Double(1.0), BsonValue::Double(2.0), BsonValue::Double(3.0)]);
        let err = decode_field(&Projected2DCoordinatesSerializer, &registry, &three).unwrap_err();
        assert!(matches!(err, BsonError::Format(_)));
        let one = field_bytes(vec![BsonValue::Double(1.0)]);
        let err = decode_field(&Projected2DCoordinatesSerializer, &registry, &one).unwrap_err();
        assert!(matches!(err, BsonError::Format(_)));
    }

    #[test]
    fn test_nullable_coordinates() {
        let s = NullableSerializer::new(Projected2DCoordinatesSerializer);
        assert_eq!(round_trip(&s, &None).unwrap(), None);
        let registry = SerializerRegistry::with_defaults();
        let bytes = field_bytes(BsonValue::Null);
        assert_eq!(decode_field(&s, &registry, &bytes).unwrap(), None);
    }

    #[test]
    fn test_abstract_coordinates_refused() {
        let registry = SerializerRegistry::with_defaults();
        let value = Coordinates::Projected2D(Projected2DCoordinates::new(1.0, 2.0));
        let err = serialize_document(&CoordinatesSerializer, &registry, &value).unwrap_err();
        assert!(matches!(err, BsonError::InvalidUsage(_)));
        let bytes = field_bytes(vec![BsonValue::Double(1.0), BsonValue::Double(2.0)]);
        let err = decode_field(&CoordinatesSerializer, &registry, &bytes).unwrap_err();
        assert!(matches!(err, BsonError::InvalidUsage(_)));
    }

    #[test]
    fn test_named_dispatch() {
        let registry = SerializerRegistry::with_defaults();
        let doc = Document::new()
            .with("properties", Document::new().with("name", "urn:ogc:def:crs:OGC:1.3:CRS84"))
            .with("type", "name");
        let bytes = encode_document(&doc).unwrap();
        let crs = deserialize_document(&CoordinateReferenceSystemSerializer, &registry, &bytes).unwrap();
        assert_eq!(
            crs,
            CoordinateReferenceSystem::Named(NamedCrs {
                name: "urn:ogc:def:crs:OGC:1.3:CRS84".to_string()
            })
        );
    }

    #[test]
    fn test_linked_round_trip() {
        let registry = SerializerRegistry::with_defaults();
        let crs = CoordinateReferenceSystem::Linked(LinkedCrs {
            href: "http://example.com/crs/42".to_string(),
            href_type: Some("proj4".to_string()),
        });
        let bytes = serialize_document(&CoordinateReferenceSystemSerializer, &registry, &crs).unwrap();
        let back = deserialize_document(&CoordinateReferenceSystemSerializer, &registry, &bytes).unwrap();
        assert_eq!(back, crs);
    }

    fn crs_with_duplicates(type_name: &str, props: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = crate::writer::BsonWriter::new();
        writer.write_start_document().unwrap();
        writer.write_name("type").unwrap();
        writer.write_string(type_name).unwrap();
        writer.write_name("properties").unwrap();
        writer.write_start_document().unwrap();
        for (name, value) in props {
            writer.write_name(name).unwrap();
            writer.write_string(value).unwrap();
        }
        writer.write_end_document().unwrap();
        writer.write_name("type").unwrap();
        writer.write_string("ignored").unwrap();
        writer.write_end_document().unwrap();
        writer.into_bytes().unwrap()
    }

    #[test]
    fn test_duplicate_properties_keep_first() {
        let registry = SerializerRegistry::with_defaults();
        let bytes = crs_with_duplicates(
            LINK,
            &[("href", "http://a"), ("type", "proj4"), ("href", "http://b"), ("type", "ogcwkt")],
        );
        let crs = deserialize_document(&CoordinateReferenceSystemSerializer, &registry, &bytes).unwrap();
        assert_eq!(
            crs,
            CoordinateReferenceSystem::Linked(LinkedCrs {
                href: "http://a".to_string(),
                href_type: Some("proj4".to_string()),
            })
        );

        let bytes = crs_with_duplicates(NAME, &[("name", "EPSG:4326"), ("name", "EPSG:3857")]);
        let crs = deserialize_document(&NamedCrsSerializer, &registry, &bytes).unwrap();
        assert_eq!(crs.name, "EPSG:4326");
    }

    #[test]
    fn test_bad_discriminator() {
        let registry = SerializerRegistry::with_defaults();
        for doc in [
            Document::new().with("properties", Document::new().with("name", "x")),
            Document::new().with("type", "epsg"),
            Document::new().with("type", 1),
        ] {
            let bytes = encode_document(&doc).unwrap();
            let err =
                deserialize_document(&CoordinateReferenceSystemSerializer, &registry, &bytes).unwrap_err();
            assert!(matches!(err, BsonError::Format(_)), "{:?}", doc);
        }
    }
}
