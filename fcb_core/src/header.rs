//! Container header: feature count, quantization transform, geographic
//! extent, column schema, attribute index table and the embedded CityJSON
//! metadata document.

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::cj::{CityJson, Transform};
use crate::codec::{write_str16, write_str32, ByteReader};
use crate::error::{Error, Result};
use packed_rtree::PackedRTree;

/// Value type of a schema column, also fixing the attribute encoding of the
/// column inside feature records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Bool,
    String,
    DateTime,
    Json,
}

impl ColumnType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::UInt => 1,
            ColumnType::Long => 2,
            ColumnType::ULong => 3,
            ColumnType::Float => 4,
            ColumnType::Double => 5,
            ColumnType::Bool => 6,
            ColumnType::String => 7,
            ColumnType::DateTime => 8,
            ColumnType::Json => 9,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ColumnType::Int),
            1 => Ok(ColumnType::UInt),
            2 => Ok(ColumnType::Long),
            3 => Ok(ColumnType::ULong),
            4 => Ok(ColumnType::Float),
            5 => Ok(ColumnType::Double),
            6 => Ok(ColumnType::Bool),
            7 => Ok(ColumnType::String),
            8 => Ok(ColumnType::DateTime),
            9 => Ok(ColumnType::Json),
            other => Err(Error::Parse(format!("unknown column type {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "Int",
            ColumnType::UInt => "UInt",
            ColumnType::Long => "Long",
            ColumnType::ULong => "ULong",
            ColumnType::Float => "Float",
            ColumnType::Double => "Double",
            ColumnType::Bool => "Bool",
            ColumnType::String => "String",
            ColumnType::DateTime => "DateTime",
            ColumnType::Json => "Json",
        }
    }
}

/// One schema entry. `index` is unique and matches the column order used in
/// serialized attribute records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub index: u16,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attr_index: bool,
}

/// Attribute index table entry: which column, and how many bytes its
/// serialized index section occupies. Sections are laid out in table order
/// immediately after the spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeIndexEntry {
    pub index: u16,
    pub length: u32,
}

/// Schema and feature count, the shape `meta()` exposes to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub columns: Vec<Column>,
    pub feature_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub features_count: u64,
    pub index_node_size: u16,
    pub transform: Transform,
    /// min x/y/z then max x/y/z in real-world coordinates
    pub geographical_extent: [f64; 6],
    pub columns: Vec<Column>,
    pub attribute_index: Vec<AttributeIndexEntry>,
    /// Embedded CityJSON-compatible metadata document
    pub metadata: CityJson,
}

impl Header {
    /// Serialized byte size of the spatial index section.
    pub fn rtree_index_size(&self) -> usize {
        if self.index_node_size > 0 && self.features_count > 0 {
            PackedRTree::index_size(self.features_count as usize, self.index_node_size)
        } else {
            0
        }
    }

    /// Serialized byte size of all attribute index sections together.
    pub fn attr_index_size(&self) -> usize {
        self.attribute_index
            .iter()
            .map(|entry| entry.length as usize)
            .sum()
    }

    /// Byte offset of a column's index section relative to the start of the
    /// attribute index area, if the column is indexed.
    pub fn attr_index_offset(&self, column_index: u16) -> Option<(usize, usize)> {
        let mut offset = 0usize;
        for entry in &self.attribute_index {
            if entry.index == column_index {
                return Some((offset, entry.length as usize));
            }
            offset += entry.length as usize;
        }
        None
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn meta(&self) -> Meta {
        Meta {
            columns: self.columns.clone(),
            feature_count: self.features_count,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u64::<LittleEndian>(self.features_count)?;
        out.write_u16::<LittleEndian>(self.index_node_size)?;
        for v in self
            .transform
            .scale
            .iter()
            .chain(self.transform.translate.iter())
        {
            out.write_f64::<LittleEndian>(*v)?;
        }
        for v in &self.geographical_extent {
            out.write_f64::<LittleEndian>(*v)?;
        }

        out.write_u16::<LittleEndian>(self.columns.len() as u16)?;
        for column in &self.columns {
            out.write_u16::<LittleEndian>(column.index)?;
            out.push(column.type_.to_u8());
            out.push(u8::from(column.attr_index));
            write_str16(&mut out, &column.name);
            write_str16(&mut out, column.title.as_deref().unwrap_or(""));
            write_str16(&mut out, column.description.as_deref().unwrap_or(""));
        }

        out.write_u16::<LittleEndian>(self.attribute_index.len() as u16)?;
        for entry in &self.attribute_index {
            out.write_u16::<LittleEndian>(entry.index)?;
            out.write_u32::<LittleEndian>(entry.length)?;
        }

        let metadata = serde_json::to_string(&self.metadata)?;
        write_str32(&mut out, &metadata);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Header> {
        let mut rdr = ByteReader::new(buf);
        let features_count = rdr.read_u64()?;
        let index_node_size = rdr.read_u16()?;
        let mut transform = Transform::default();
        for v in transform
            .scale
            .iter_mut()
            .chain(transform.translate.iter_mut())
        {
            *v = rdr.read_f64()?;
        }
        let mut geographical_extent = [0f64; 6];
        for v in &mut geographical_extent {
            *v = rdr.read_f64()?;
        }

        let column_count = rdr.read_u16()?;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let index = rdr.read_u16()?;
            let type_ = ColumnType::from_u8(rdr.read_u8()?)?;
            let attr_index = rdr.read_u8()? != 0;
            let name = rdr.read_str16()?;
            let title = rdr.read_str16()?;
            let description = rdr.read_str16()?;
            if columns.iter().any(|c: &Column| c.index == index) {
                return Err(Error::Parse(format!("duplicate column index {index}")));
            }
            columns.push(Column {
                index,
                name,
                type_,
                title: (!title.is_empty()).then_some(title),
                description: (!description.is_empty()).then_some(description),
                attr_index,
            });
        }

        let attr_entry_count = rdr.read_u16()?;
        let mut attribute_index = Vec::with_capacity(attr_entry_count as usize);
        for _ in 0..attr_entry_count {
            let index = rdr.read_u16()?;
            let length = rdr.read_u32()?;
            if !columns.iter().any(|c| c.index == index) {
                return Err(Error::Parse(format!(
                    "attribute index entry for unknown column {index}"
                )));
            }
            attribute_index.push(AttributeIndexEntry { index, length });
        }

        let metadata: CityJson = serde_json::from_str(&rdr.read_str32()?)?;

        Ok(Header {
            features_count,
            index_node_size,
            transform,
            geographical_extent,
            columns,
            attribute_index,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cj::Metadata;

    fn sample_header() -> Header {
        Header {
            features_count: 3,
            index_node_size: 16,
            transform: Transform {
                scale: [0.001, 0.001, 0.001],
                translate: [85000.0, 446000.0, 0.0],
            },
            geographical_extent: [0.0, 0.0, 0.0, 11.0, 11.0, 5.0],
            columns: vec![
                Column {
                    index: 0,
                    name: "height".to_string(),
                    type_: ColumnType::Double,
                    title: Some("roof height".to_string()),
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
            ],
            attribute_index: vec![AttributeIndexEntry {
                index: 0,
                length: 128,
            }],
            metadata: CityJson {
                metadata: Some(Metadata {
                    geographical_extent: Some([0.0, 0.0, 0.0, 11.0, 11.0, 5.0]),
                    reference_system: Some(
                        "https://www.opengis.net/def/crs/EPSG/0/7415".to_string(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn header_roundtrip() -> Result<()> {
        let header = sample_header();
        let encoded = header.encode()?;
        let decoded = Header::decode(&encoded)?;
        assert_eq!(decoded, header);
        Ok(())
    }

    #[test]
    fn truncated_header_is_rejected() {
        let header = sample_header();
        let encoded = header.encode().unwrap();
        let result = Header::decode(&encoded[..encoded.len() / 2]);
        assert!(matches!(result, Err(Error::Truncated { .. })));
    }

    #[test]
    fn attr_index_offsets_tile_the_section() {
        let mut header = sample_header();
        header.columns[1].attr_index = true;
        header.attribute_index = vec![
            AttributeIndexEntry {
                index: 0,
                length: 100,
            },
            AttributeIndexEntry {
                index: 1,
                length: 50,
            },
        ];
        assert_eq!(header.attr_index_offset(0), Some((0, 100)));
        assert_eq!(header.attr_index_offset(1), Some((100, 50)));
        assert_eq!(header.attr_index_size(), 150);
        assert_eq!(header.attr_index_offset(9), None);
    }
}
