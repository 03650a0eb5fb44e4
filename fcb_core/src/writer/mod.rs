//! Container writer.
//!
//! Features are encoded as they are added and staged in a temporary file.
//! On `write`, feature bounding boxes are Hilbert-sorted, the packed R-tree
//! and the per-column attribute indexes are built over the final byte
//! offsets, and the sections are assembled in container order.

pub mod attribute;
mod attr_index;
pub mod header_writer;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use packed_rtree::{calc_extent, hilbert_sort, NodeItem, PackedRTree};
use tracing::debug;

use crate::cj::{CityJson, CityJsonFeature};
use crate::const_vars::MAGIC_BYTES;
use crate::error::Result;
use crate::feature::{encode_feature, feature_bounds};
use crate::header::{AttributeIndexEntry, Column};
use attr_index::build_column_index;
use attribute::AttributeSchema;
use header_writer::{build_header, HeaderWriterOptions};

/// Writer assembling a complete container from CityJSON metadata and
/// features.
pub struct FcbWriter {
    /// Staging buffer for encoded feature records
    tmpout: BufWriter<File>,
    cj: CityJson,
    options: HeaderWriterOptions,
    columns: Vec<Column>,
    feat_offsets: Vec<TempOffset>,
    feat_nodes: Vec<NodeItem>,
    /// Collected values per indexed column: `(feature number, value)`
    attr_values: HashMap<u16, Vec<(usize, serde_json::Value)>>,
    /// z range observed across all features
    z_range: (f64, f64),
}

#[derive(Clone, Copy, Debug)]
struct TempOffset {
    offset: u64,
    size: usize,
}

impl FcbWriter {
    pub fn new(
        cj: CityJson,
        options: Option<HeaderWriterOptions>,
        attr_schema: Option<AttributeSchema>,
    ) -> Result<Self> {
        let options = options.unwrap_or_default();
        let columns = attr_schema
            .unwrap_or_default()
            .to_columns(options.attribute_indices.as_deref());
        Ok(Self {
            tmpout: BufWriter::new(tempfile::tempfile()?),
            cj,
            options,
            columns,
            feat_offsets: Vec::new(),
            feat_nodes: Vec::new(),
            attr_values: HashMap::new(),
            z_range: (f64::INFINITY, f64::NEG_INFINITY),
        })
    }

    /// Encode and stage one feature.
    pub fn add_feature(&mut self, feature: &CityJsonFeature) -> Result<()> {
        let feature_no = self.feat_offsets.len();
        let buf = encode_feature(feature, &self.columns)?;

        let mut node = feature_bounds(feature, &self.cj.transform);
        // carry the staging order through the sort; replaced by the byte
        // offset during assembly
        node.offset = feature_no as u64;
        self.feat_nodes.push(node);

        for vertex in &feature.vertices {
            let z = vertex[2] as f64 * self.cj.transform.scale[2] + self.cj.transform.translate[2];
            self.z_range.0 = self.z_range.0.min(z);
            self.z_range.1 = self.z_range.1.max(z);
        }

        for object in feature.city_objects.values() {
            let Some(attributes) = object.attributes.as_ref().and_then(|a| a.as_object()) else {
                continue;
            };
            for column in self.columns.iter().filter(|c| c.attr_index) {
                if let Some(value) = attributes.get(&column.name) {
                    if !value.is_null() {
                        self.attr_values
                            .entry(column.index)
                            .or_default()
                            .push((feature_no, value.clone()));
                    }
                }
            }
        }

        let offset = self
            .feat_offsets
            .last()
            .map(|t| t.offset + t.size as u64)
            .unwrap_or(0);
        self.feat_offsets.push(TempOffset {
            offset,
            size: buf.len(),
        });
        self.tmpout.write_all(&buf)?;
        Ok(())
    }

    /// Assemble and write the complete container:
    /// magic bytes, header, spatial index, attribute indexes, features.
    pub fn write(mut self, mut out: impl Write) -> Result<()> {
        let features_count = self.feat_nodes.len() as u64;

        let extent = if self.feat_nodes.is_empty() {
            NodeItem::bounds(0.0, 0.0, 0.0, 0.0)
        } else {
            let extent = calc_extent(&self.feat_nodes);
            hilbert_sort(&mut self.feat_nodes, &extent);
            extent
        };
        debug!(features = features_count, ?extent, "assembling container");

        // final byte offset of each staged feature, in sorted order
        let mut final_offsets: HashMap<usize, u64> = HashMap::with_capacity(self.feat_nodes.len());
        let mut acc = 0u64;
        let index_nodes: Vec<NodeItem> = self
            .feat_nodes
            .iter()
            .map(|temp_node| {
                let feature_no = temp_node.offset as usize;
                let staged = self.feat_offsets[feature_no];
                let mut node = temp_node.clone();
                node.offset = acc;
                final_offsets.insert(feature_no, acc);
                acc += (crate::const_vars::SIZE_PREFIX_SIZE + staged.size) as u64;
                node
            })
            .collect();

        let mut attr_sections: Vec<(AttributeIndexEntry, Vec<u8>)> = Vec::new();
        for column in self.columns.iter().filter(|c| c.attr_index) {
            let values = self
                .attr_values
                .get(&column.index)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let buf = build_column_index(column, values, &final_offsets)?;
            attr_sections.push((
                AttributeIndexEntry {
                    index: column.index,
                    length: buf.len() as u32,
                },
                buf,
            ));
        }

        let z_range = if self.z_range.0.is_finite() {
            self.z_range
        } else {
            (0.0, 0.0)
        };
        let geographical_extent = [
            extent.min_x,
            extent.min_y,
            z_range.0,
            extent.max_x,
            extent.max_y,
            z_range.1,
        ];
        let header = build_header(
            &self.cj,
            &self.options,
            features_count,
            geographical_extent,
            self.columns.clone(),
            attr_sections.iter().map(|(entry, _)| *entry).collect(),
        );

        out.write_all(&MAGIC_BYTES)?;
        let header_buf = header.encode()?;
        out.write_all(&(header_buf.len() as u32).to_le_bytes())?;
        out.write_all(&header_buf)?;

        if header.index_node_size > 0 && !index_nodes.is_empty() {
            let tree = PackedRTree::build(&index_nodes, &extent, header.index_node_size)?;
            tree.stream_write(&mut out)?;
        }

        for (_, buf) in &attr_sections {
            out.write_all(buf)?;
        }

        self.tmpout.flush()?;
        let staged = self.tmpout.into_inner().map_err(|e| e.into_error())?;
        let mut staged_reader = BufReader::new(staged);
        let mut buf = Vec::new();
        for node in &self.feat_nodes {
            let feature = self.feat_offsets[node.offset as usize];
            staged_reader.seek(SeekFrom::Start(feature.offset))?;
            buf.resize(feature.size, 0);
            staged_reader.read_exact(&mut buf)?;
            out.write_all(&(feature.size as u32).to_le_bytes())?;
            out.write_all(&buf)?;
        }

        Ok(())
    }
}
