//! Header assembly.

use packed_rtree::PackedRTree;

use crate::cj::CityJson;
use crate::header::{AttributeIndexEntry, Column, Header};

/// Configuration for the header writing process.
#[derive(Debug, Clone)]
pub struct HeaderWriterOptions {
    /// Whether to build and write the spatial index
    pub write_index: bool,
    /// Branching factor of the spatial index
    pub index_node_size: u16,
    /// Attribute names to build serialized indexes for
    pub attribute_indices: Option<Vec<String>>,
}

impl Default for HeaderWriterOptions {
    fn default() -> Self {
        HeaderWriterOptions {
            write_index: true,
            index_node_size: PackedRTree::DEFAULT_NODE_SIZE,
            attribute_indices: None,
        }
    }
}

pub(super) fn build_header(
    cj: &CityJson,
    options: &HeaderWriterOptions,
    features_count: u64,
    geographical_extent: [f64; 6],
    columns: Vec<Column>,
    attribute_index: Vec<AttributeIndexEntry>,
) -> Header {
    let mut metadata = cj.clone();
    let meta = metadata.metadata.get_or_insert_with(Default::default);
    if meta.geographical_extent.is_none() {
        meta.geographical_extent = Some(geographical_extent);
    }

    Header {
        features_count,
        index_node_size: if options.write_index && features_count > 0 {
            options.index_node_size
        } else {
            0
        },
        transform: cj.transform.clone(),
        geographical_extent,
        columns,
        attribute_index,
        metadata,
    }
}
