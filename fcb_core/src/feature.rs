//! Feature record codec.
//!
//! A record is self-contained: id, quantized vertices, and city objects with
//! attributes (in the column schema encoding), geometries and hierarchy. On
//! disk every record is preceded by a `u32` little-endian size prefix so it
//! is addressable by byte offset/length alone.

use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::Value;
use tracing::warn;

use crate::cj::{
    CityJsonFeature, CityObject, Geometry, GeometryType, Semantics, SemanticsSurface,
    SemanticsValues, Transform,
};
use crate::codec::{write_str16, write_str32, write_u32_vec, ByteReader};
use crate::error::{Error, Result};
use crate::geometry::{
    decode_boundaries, decode_semantics_values, encode_boundaries, encode_semantics_values,
    FlatBoundaries, NO_SEMANTICS,
};
use crate::header::{Column, ColumnType};

impl GeometryType {
    fn to_u8(self) -> u8 {
        match self {
            GeometryType::MultiPoint => 0,
            GeometryType::MultiLineString => 1,
            GeometryType::MultiSurface => 2,
            GeometryType::CompositeSurface => 3,
            GeometryType::Solid => 4,
            GeometryType::MultiSolid => 5,
            GeometryType::CompositeSolid => 6,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(GeometryType::MultiPoint),
            1 => Ok(GeometryType::MultiLineString),
            2 => Ok(GeometryType::MultiSurface),
            3 => Ok(GeometryType::CompositeSurface),
            4 => Ok(GeometryType::Solid),
            5 => Ok(GeometryType::MultiSolid),
            6 => Ok(GeometryType::CompositeSolid),
            other => Err(Error::Decode(format!("unknown geometry type {other}"))),
        }
    }
}

/// Encode one feature record (without the size prefix).
pub fn encode_feature(feature: &CityJsonFeature, columns: &[Column]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_str16(&mut out, &feature.id);

    out.write_u32::<LittleEndian>(feature.vertices.len() as u32)?;
    for vertex in &feature.vertices {
        for v in vertex {
            out.write_i32::<LittleEndian>(*v as i32)?;
        }
    }

    out.write_u16::<LittleEndian>(feature.city_objects.len() as u16)?;
    for (id, object) in &feature.city_objects {
        write_str16(&mut out, id);
        encode_city_object(&mut out, object, columns)?;
    }
    Ok(out)
}

fn encode_city_object(out: &mut Vec<u8>, object: &CityObject, columns: &[Column]) -> Result<()> {
    write_str16(out, &object.thetype);

    match &object.geographical_extent {
        Some(extent) => {
            out.push(1);
            for v in extent {
                out.write_f64::<LittleEndian>(*v)?;
            }
        }
        None => out.push(0),
    }

    match &object.attributes {
        Some(attributes) => {
            out.push(1);
            let encoded = encode_attributes(attributes, columns);
            out.write_u32::<LittleEndian>(encoded.len() as u32)?;
            out.extend_from_slice(&encoded);
        }
        None => out.push(0),
    }

    let geometries = object.geometry.as_deref().unwrap_or(&[]);
    out.write_u16::<LittleEndian>(geometries.len() as u16)?;
    for geometry in geometries {
        encode_geometry(out, geometry)?;
    }

    encode_string_list(out, object.children.as_deref());
    encode_string_list(out, object.parents.as_deref());
    Ok(())
}

fn encode_string_list(out: &mut Vec<u8>, list: Option<&[String]>) {
    let list = list.unwrap_or(&[]);
    out.extend_from_slice(&(list.len() as u16).to_le_bytes());
    for s in list {
        write_str16(out, s);
    }
}

fn encode_geometry(out: &mut Vec<u8>, geometry: &Geometry) -> Result<()> {
    out.push(geometry.thetype.to_u8());
    match &geometry.lod {
        Some(lod) => {
            out.push(1);
            write_str16(out, lod);
        }
        None => out.push(0),
    }

    let flat = encode_boundaries(&geometry.boundaries);
    write_u32_vec(out, &flat.solids);
    write_u32_vec(out, &flat.shells);
    write_u32_vec(out, &flat.surfaces);
    write_u32_vec(out, &flat.strings);
    write_u32_vec(out, &flat.indices);

    match &geometry.semantics {
        Some(semantics) => {
            out.push(1);
            out.write_u16::<LittleEndian>(semantics.surfaces.len() as u16)?;
            for surface in &semantics.surfaces {
                write_str16(out, &surface.thetype);
                out.write_u32::<LittleEndian>(surface.parent.unwrap_or(NO_SEMANTICS))?;
                match &surface.children {
                    Some(children) => {
                        out.push(1);
                        write_u32_vec(out, children);
                    }
                    None => out.push(0),
                }
            }
            let mut values = Vec::new();
            encode_semantics_values(&semantics.values, &mut values);
            write_u32_vec(out, &values);
        }
        None => out.push(0),
    }
    Ok(())
}

/// Decode one feature record (the bytes after the size prefix). Any
/// inconsistency inside the record surfaces as [`Error::Decode`] so callers
/// can skip the record without tearing down the session.
pub fn decode_feature(buf: &[u8], columns: &[Column]) -> Result<CityJsonFeature> {
    decode_feature_inner(buf, columns).map_err(|e| match e {
        Error::Decode(_) => e,
        other => Error::Decode(other.to_string()),
    })
}

fn decode_feature_inner(buf: &[u8], columns: &[Column]) -> Result<CityJsonFeature> {
    let mut rdr = ByteReader::new(buf);
    let id = rdr.read_str16()?;
    let mut feature = CityJsonFeature::new(id);

    let vertex_count = rdr.read_u32()? as usize;
    feature.vertices.reserve(vertex_count.min(rdr.remaining() / 12));
    for _ in 0..vertex_count {
        let x = rdr.read_i32()? as i64;
        let y = rdr.read_i32()? as i64;
        let z = rdr.read_i32()? as i64;
        feature.vertices.push([x, y, z]);
    }

    let object_count = rdr.read_u16()?;
    for _ in 0..object_count {
        let key = rdr.read_str16()?;
        let object = decode_city_object(&mut rdr, columns)?;
        feature.city_objects.insert(key, object);
    }
    Ok(feature)
}

fn decode_city_object(rdr: &mut ByteReader, columns: &[Column]) -> Result<CityObject> {
    let thetype = rdr.read_str16()?;

    let geographical_extent = if rdr.read_u8()? != 0 {
        let mut extent = [0f64; 6];
        for v in &mut extent {
            *v = rdr.read_f64()?;
        }
        Some(extent)
    } else {
        None
    };

    let attributes = if rdr.read_u8()? != 0 {
        let len = rdr.read_u32()? as usize;
        let bytes = rdr.read_bytes(len)?;
        Some(decode_attributes(bytes, columns)?)
    } else {
        None
    };

    let geometry_count = rdr.read_u16()?;
    let geometry = if geometry_count > 0 {
        let mut geometries = Vec::with_capacity(geometry_count as usize);
        for _ in 0..geometry_count {
            geometries.push(decode_geometry(rdr)?);
        }
        Some(geometries)
    } else {
        None
    };

    let children = decode_string_list(rdr)?;
    let parents = decode_string_list(rdr)?;

    Ok(CityObject {
        thetype,
        geographical_extent,
        attributes,
        geometry,
        children,
        parents,
    })
}

fn decode_string_list(rdr: &mut ByteReader) -> Result<Option<Vec<String>>> {
    let count = rdr.read_u16()?;
    if count == 0 {
        return Ok(None);
    }
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        list.push(rdr.read_str16()?);
    }
    Ok(Some(list))
}

fn decode_geometry(rdr: &mut ByteReader) -> Result<Geometry> {
    let thetype = GeometryType::from_u8(rdr.read_u8()?)?;
    let lod = if rdr.read_u8()? != 0 {
        Some(rdr.read_str16()?)
    } else {
        None
    };

    let flat = FlatBoundaries {
        solids: rdr.read_u32_vec()?,
        shells: rdr.read_u32_vec()?,
        surfaces: rdr.read_u32_vec()?,
        strings: rdr.read_u32_vec()?,
        indices: rdr.read_u32_vec()?,
    };
    let boundaries = decode_boundaries(&flat);

    let semantics = if rdr.read_u8()? != 0 {
        let surface_count = rdr.read_u16()?;
        let mut surfaces = Vec::with_capacity(surface_count as usize);
        for _ in 0..surface_count {
            let surface_type = rdr.read_str16()?;
            let parent = rdr.read_u32()?;
            let children = if rdr.read_u8()? != 0 {
                Some(rdr.read_u32_vec()?)
            } else {
                None
            };
            surfaces.push(SemanticsSurface {
                thetype: surface_type,
                parent: (parent != NO_SEMANTICS).then_some(parent),
                children,
            });
        }
        let values = rdr.read_u32_vec()?;
        Some(Semantics {
            surfaces,
            values: decode_semantics_values(thetype, &flat, &values),
        })
    } else {
        None
    };

    Ok(Geometry {
        thetype,
        lod,
        boundaries,
        semantics,
    })
}

/// Encode an attribute bag against the column schema: a sequence of
/// `column index u16` + typed little-endian value, in schema order. Nulls and
/// values that do not coerce to the declared column type are skipped.
pub fn encode_attributes(attributes: &Value, columns: &[Column]) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(map) = attributes.as_object() else {
        return out;
    };
    for column in columns {
        let Some(value) = map.get(&column.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let mut encoded = Vec::new();
        let ok = encode_attribute_value(&mut encoded, value, column.type_);
        if !ok {
            warn!(
                column = %column.name,
                "attribute value does not match declared column type, skipping"
            );
            continue;
        }
        out.extend_from_slice(&column.index.to_le_bytes());
        out.extend_from_slice(&encoded);
    }
    out
}

fn encode_attribute_value(out: &mut Vec<u8>, value: &Value, type_: ColumnType) -> bool {
    match type_ {
        ColumnType::Int => match value.as_i64() {
            Some(v) => out.extend_from_slice(&(v as i32).to_le_bytes()),
            None => return false,
        },
        ColumnType::UInt => match value.as_u64() {
            Some(v) => out.extend_from_slice(&(v as u32).to_le_bytes()),
            None => return false,
        },
        ColumnType::Long => match value.as_i64() {
            Some(v) => out.extend_from_slice(&v.to_le_bytes()),
            None => return false,
        },
        ColumnType::ULong => match value.as_u64() {
            Some(v) => out.extend_from_slice(&v.to_le_bytes()),
            None => return false,
        },
        ColumnType::Float => match value.as_f64() {
            Some(v) => out.extend_from_slice(&(v as f32).to_le_bytes()),
            None => return false,
        },
        ColumnType::Double => match value.as_f64() {
            Some(v) => out.extend_from_slice(&v.to_le_bytes()),
            None => return false,
        },
        ColumnType::Bool => match value.as_bool() {
            Some(v) => out.push(u8::from(v)),
            None => return false,
        },
        ColumnType::String | ColumnType::DateTime => match value.as_str() {
            Some(v) => write_str32(out, v),
            None => return false,
        },
        ColumnType::Json => {
            let json = value.to_string();
            write_str32(out, &json);
        }
    }
    true
}

/// Decode an attribute bag. Unknown column indices are a record-level decode
/// error since the value width cannot be known.
pub fn decode_attributes(bytes: &[u8], columns: &[Column]) -> Result<Value> {
    let mut rdr = ByteReader::new(bytes);
    let mut map = serde_json::Map::new();
    while rdr.remaining() > 0 {
        let col_index = rdr.read_u16()?;
        let column = columns
            .iter()
            .find(|c| c.index == col_index)
            .ok_or_else(|| Error::Decode(format!("attribute for unknown column {col_index}")))?;
        let value = match column.type_ {
            ColumnType::Int => Value::from(rdr.read_i32()?),
            ColumnType::UInt => Value::from(rdr.read_u32()?),
            ColumnType::Long => Value::from(rdr.read_i64()?),
            ColumnType::ULong => Value::from(rdr.read_u64()?),
            ColumnType::Float => serde_json::Number::from_f64(rdr.read_f32()? as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnType::Double => serde_json::Number::from_f64(rdr.read_f64()?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnType::Bool => Value::from(rdr.read_u8()? != 0),
            ColumnType::String | ColumnType::DateTime => Value::from(rdr.read_str32()?),
            ColumnType::Json => serde_json::from_str(&rdr.read_str32()?)?,
        };
        map.insert(column.name.clone(), value);
    }
    Ok(Value::Object(map))
}

/// Bounding box of a feature in real-world x/y, derived from its quantized
/// vertices and the dataset transform.
pub fn feature_bounds(feature: &CityJsonFeature, transform: &Transform) -> packed_rtree::NodeItem {
    let mut node = packed_rtree::NodeItem::create(0);
    for vertex in &feature.vertices {
        let x = vertex[0] as f64 * transform.scale[0] + transform.translate[0];
        let y = vertex[1] as f64 * transform.scale[1] + transform.translate[1];
        node.expand_xy(x, y);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<Column> {
        vec![
            Column {
                index: 0,
                name: "height".to_string(),
                type_: ColumnType::Double,
                title: None,
                description: None,
                attr_index: true,
            },
            Column {
                index: 1,
                name: "identificatie".to_string(),
                type_: ColumnType::String,
                title: None,
                description: None,
                attr_index: false,
            },
            Column {
                index: 2,
                name: "storeys".to_string(),
                type_: ColumnType::Int,
                title: None,
                description: None,
                attr_index: false,
            },
        ]
    }

    fn sample_feature() -> CityJsonFeature {
        let mut feature = CityJsonFeature::new("feat-1".to_string());
        feature.vertices = vec![[0, 0, 0], [1000, 0, 0], [1000, 1000, 0], [0, 1000, 0]];
        feature.city_objects.insert(
            "building-1".to_string(),
            CityObject {
                thetype: "Building".to_string(),
                geographical_extent: Some([0.0, 0.0, 0.0, 1.0, 1.0, 0.0]),
                attributes: Some(json!({
                    "height": 12.5,
                    "identificatie": "NL.IMBAG.Pand.1",
                    "storeys": 4,
                })),
                geometry: Some(vec![Geometry {
                    thetype: GeometryType::MultiSurface,
                    lod: Some("1.2".to_string()),
                    boundaries: Boundaries::Nested(vec![Boundaries::Nested(vec![
                        Boundaries::Indices(vec![0, 1, 2, 3]),
                    ])]),
                    semantics: Some(Semantics {
                        surfaces: vec![SemanticsSurface {
                            thetype: "RoofSurface".to_string(),
                            parent: None,
                            children: None,
                        }],
                        values: SemanticsValues::Indices(vec![Some(0)]),
                    }),
                }]),
                children: None,
                parents: None,
            },
        );
        feature
    }

    use crate::cj::Boundaries;

    #[test]
    fn feature_roundtrip() -> Result<()> {
        let columns = columns();
        let feature = sample_feature();
        let encoded = encode_feature(&feature, &columns)?;
        let decoded = decode_feature(&encoded, &columns)?;
        assert_eq!(decoded, feature);
        Ok(())
    }

    #[test]
    fn attributes_roundtrip_skips_nulls() -> Result<()> {
        let columns = columns();
        let attrs = json!({
            "height": 42.0,
            "identificatie": Value::Null,
            "storeys": 2,
        });
        let encoded = encode_attributes(&attrs, &columns);
        let decoded = decode_attributes(&encoded, &columns)?;
        assert_eq!(decoded, json!({ "height": 42.0, "storeys": 2 }));
        Ok(())
    }

    #[test]
    fn garbage_record_is_a_decode_error() {
        let columns = columns();
        let feature = sample_feature();
        let mut encoded = encode_feature(&feature, &columns).unwrap();
        encoded.truncate(encoded.len() / 3);
        assert!(matches!(
            decode_feature(&encoded, &columns),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn feature_bounds_applies_transform() {
        let feature = sample_feature();
        let transform = Transform {
            scale: [0.001, 0.001, 0.001],
            translate: [100.0, 200.0, 0.0],
        };
        let bounds = feature_bounds(&feature, &transform);
        assert_eq!(bounds.min_x, 100.0);
        assert_eq!(bounds.max_x, 101.0);
        assert_eq!(bounds.min_y, 200.0);
        assert_eq!(bounds.max_y, 201.0);
    }
}
