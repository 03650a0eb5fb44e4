//! CityJSON / CityJSONFeature data model.
//!
//! Only the parts of the CityJSON 2.0 schema this container encodes: the
//! dataset-level metadata object embedded in the header, and per-feature city
//! objects with nested boundaries, LOD and semantic surfaces. Vertices are
//! quantized integers decoded through the dataset transform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;

use crate::error::{Error, Result};

/// Dataset-level CityJSON object (the header's embedded metadata document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityJson {
    #[serde(rename = "type")]
    pub thetype: String,
    pub version: String,
    pub transform: Transform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl CityJson {
    pub fn new() -> Self {
        Self {
            thetype: "CityJSON".to_string(),
            version: "2.0".to_string(),
            transform: Transform::default(),
            metadata: None,
        }
    }
}

impl Default for CityJson {
    fn default() -> Self {
        Self::new()
    }
}

/// Quantization transform: `real = quantized * scale + translate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: [f64; 3],
    pub translate: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: [1.0, 1.0, 1.0],
            translate: [0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographical_extent: Option<[f64; 6]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One CityJSONSeq line: a feature with its city objects and vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityJsonFeature {
    #[serde(rename = "type")]
    pub thetype: String,
    pub id: String,
    #[serde(rename = "CityObjects")]
    pub city_objects: BTreeMap<String, CityObject>,
    pub vertices: Vec<[i64; 3]>,
}

impl CityJsonFeature {
    pub fn new(id: String) -> Self {
        Self {
            thetype: "CityJSONFeature".to_string(),
            id,
            city_objects: BTreeMap::new(),
            vertices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityObject {
    #[serde(rename = "type")]
    pub thetype: String,
    #[serde(rename = "geographicalExtent", skip_serializing_if = "Option::is_none")]
    pub geographical_extent: Option<[f64; 6]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Vec<Geometry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub thetype: GeometryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lod: Option<String>,
    pub boundaries: Boundaries,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantics: Option<Semantics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    MultiPoint,
    MultiLineString,
    MultiSurface,
    CompositeSurface,
    Solid,
    MultiSolid,
    CompositeSolid,
}

/// Nested vertex-index arrays. Depth depends on the geometry type:
/// rings are the leaves, surfaces/shells/solids nest above them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Boundaries {
    Indices(Vec<u32>),
    Nested(Vec<Boundaries>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semantics {
    pub surfaces: Vec<SemanticsSurface>,
    pub values: SemanticsValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticsSurface {
    #[serde(rename = "type")]
    pub thetype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<u32>>,
}

/// Per-surface semantic assignments, nested one level shallower than the
/// geometry boundaries (`null` where a surface has no semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SemanticsValues {
    Indices(Vec<Option<u32>>),
    Nested(Vec<SemanticsValues>),
}

/// A parsed CityJSONSeq stream: the dataset object followed by its features.
#[derive(Debug, Clone)]
pub struct CityJsonSeq {
    pub cj: CityJson,
    pub features: Vec<CityJsonFeature>,
}

/// Read newline-delimited CityJSONSeq: the first line is the CityJSON
/// object, every following non-empty line one CityJSONFeature.
pub fn read_cityjson_seq<R: BufRead>(reader: R) -> Result<CityJsonSeq> {
    let mut lines = reader.lines();
    let first = lines
        .next()
        .ok_or_else(|| Error::Parse("empty CityJSONSeq input".to_string()))??;
    let cj: CityJson = serde_json::from_str(&first)?;
    let mut features = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        features.push(serde_json::from_str(&line)?);
    }
    Ok(CityJsonSeq { cj, features })
}
