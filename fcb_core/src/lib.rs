//! FlatCityBuf: a cloud-optimized binary container for CityJSON city models.
//!
//! The container holds a fixed header with schema and extent, a packed
//! Hilbert R-tree over feature bounding boxes, one serialized sorted index
//! per indexable attribute column, and size-prefixed feature records.
//! [`FcbReader`] reads local files and streams; [`HttpFcbReader`] queries
//! remote containers with HTTP range requests, fetching only the byte ranges
//! a query needs. [`FcbWriter`] produces containers.

mod attr_query;
pub mod cj;
mod codec;
mod const_vars;
pub mod error;
mod feature;
mod geometry;
mod header;
mod reader;
mod spatial;
mod writer;

#[cfg(feature = "http")]
mod http_reader;

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
mod session;

pub use attr_query::AttrQuery;
pub use cj::{
    read_cityjson_seq, Boundaries, CityJson, CityJsonFeature, CityJsonSeq, CityObject, Geometry,
    GeometryType, Metadata, Semantics, SemanticsSurface, SemanticsValues, Transform,
};
pub use error::{Error, Result};
pub use feature::{decode_feature, encode_feature, feature_bounds};
pub use header::{AttributeIndexEntry, Column, ColumnType, Header, Meta};
pub use reader::{reader_trait, FcbReader, FeatureIter};
pub use spatial::SpatialQuery;
pub use writer::attribute::AttributeSchema;
pub use writer::header_writer::HeaderWriterOptions;
pub use writer::FcbWriter;

// query value/operator vocabulary re-exported from the index crates
pub use packed_rtree;
pub use sorted_index::{ByteSerializableValue, Float, Operator, OrderedFloat};

#[cfg(feature = "http")]
pub use http_reader::{AsyncFeatureIter, HttpFcbReader, QueryOptions};

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
pub use http_reader::RetryHttpClient;

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
pub use session::{FcbQuery, FcbSession, Page};

pub(crate) use const_vars::*;

/// Check the leading magic bytes, accepting any version up to ours.
pub fn check_magic_bytes(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC_BYTES_SIZE
        && bytes[0..3] == MAGIC_BYTES[0..3]
        && bytes[4..7] == MAGIC_BYTES[4..7]
        && bytes[3] <= VERSION
}
