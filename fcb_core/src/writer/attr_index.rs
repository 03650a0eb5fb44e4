//! Per-column attribute index construction.
//!
//! Values collected while staging features are keyed by the column's native
//! type, grouped so duplicate keys share one entry, and serialized with the
//! feature's final byte offset (known only after the Hilbert sort).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sorted_index::{ByteSerializable, IndexSerializable, KeyValue, OrderedFloat, SortedIndex};
use tracing::warn;

use crate::error::{Error, Result};
use crate::header::{Column, ColumnType};

/// Build one column's serialized index section.
///
/// `values` holds `(feature number, attribute value)` pairs in staging order;
/// `final_offsets` maps feature numbers to their byte offset in the feature
/// section. Values that do not coerce to the column type are skipped.
pub(super) fn build_column_index(
    column: &Column,
    values: &[(usize, Value)],
    final_offsets: &HashMap<usize, u64>,
) -> Result<Vec<u8>> {
    match column.type_ {
        ColumnType::Int => build_typed(column, values, final_offsets, |v| {
            v.as_i64().map(|i| i as i32)
        }),
        ColumnType::UInt => build_typed(column, values, final_offsets, |v| {
            v.as_u64().map(|i| i as u32)
        }),
        ColumnType::Long => build_typed(column, values, final_offsets, Value::as_i64),
        ColumnType::ULong => build_typed(column, values, final_offsets, Value::as_u64),
        ColumnType::Float => build_typed(column, values, final_offsets, |v| {
            v.as_f64().map(|f| OrderedFloat(f as f32))
        }),
        ColumnType::Double => build_typed(column, values, final_offsets, |v| {
            v.as_f64().map(OrderedFloat)
        }),
        ColumnType::Bool => build_typed(column, values, final_offsets, Value::as_bool),
        ColumnType::String => build_typed(column, values, final_offsets, |v| {
            v.as_str().map(|s| s.to_string())
        }),
        ColumnType::DateTime => build_typed(column, values, final_offsets, |v| {
            v.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        }),
        ColumnType::Json => Err(Error::UnsupportedColumnType(
            column.type_.name().to_string(),
        )),
    }
}

fn build_typed<T, F>(
    column: &Column,
    values: &[(usize, Value)],
    final_offsets: &HashMap<usize, u64>,
    extract: F,
) -> Result<Vec<u8>>
where
    T: Ord + ByteSerializable + 'static,
    F: Fn(&Value) -> Option<T>,
{
    let mut grouped: BTreeMap<T, Vec<u64>> = BTreeMap::new();
    for (feature_no, value) in values {
        let Some(key) = extract(value) else {
            warn!(
                column = %column.name,
                "attribute value does not coerce to the column type, not indexed"
            );
            continue;
        };
        let offset = final_offsets
            .get(feature_no)
            .copied()
            .expect("every staged feature has a final offset");
        grouped.entry(key).or_default().push(offset);
    }

    let mut index = SortedIndex::new();
    index.build_index(
        grouped
            .into_iter()
            .map(|(key, mut offsets)| {
                offsets.sort_unstable();
                KeyValue { key, offsets }
            })
            .collect(),
    );

    let mut buf = Vec::new();
    index.serialize(&mut buf)?;
    Ok(buf)
}
