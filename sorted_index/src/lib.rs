//! Serialized per-column sorted indexes.
//!
//! Each indexable column of a container gets one serialized `SortedIndex`
//! section: entries ordered by the column's natural key order, each carrying
//! every feature offset that shares the key. Range and equality predicates
//! resolve by binary search; `MultiIndex` combines conditions over several
//! columns by set intersection.

mod byte_serializable;
mod error;
mod index;
mod query;

pub use byte_serializable::{ByteSerializable, ByteSerializableType, ByteSerializableValue, Float, OrderedFloat};
pub use error::{Error, Result};
pub use index::{AnyIndex, IndexSerializable, KeyValue, SortedIndex, ValueOffset};
pub use query::{MultiIndex, Operator, Query, QueryCondition};
