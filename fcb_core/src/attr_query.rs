//! Attribute query validation and translation.
//!
//! Conditions are validated against the header schema before any index or
//! feature I/O: predicates on unknown or unindexed columns and operator
//! values whose type does not match the column's declared type fail fast.

use chrono::{DateTime, Utc};
use sorted_index::{
    ByteSerializableType, ByteSerializableValue, Float, IndexSerializable, MultiIndex, Operator,
    Query, QueryCondition, SortedIndex,
};

use crate::error::{Error, Result};
use crate::header::{Column, ColumnType, Header};

/// One query: `(column name, operator, boundary value)` triples, implicitly
/// AND-combined.
pub type AttrQuery = Vec<(String, Operator, ByteSerializableValue)>;

/// The key type a column's index section stores.
fn expected_key_type(type_: ColumnType) -> Option<ByteSerializableType> {
    match type_ {
        ColumnType::Int => Some(ByteSerializableType::I32),
        ColumnType::UInt => Some(ByteSerializableType::U32),
        ColumnType::Long => Some(ByteSerializableType::I64),
        ColumnType::ULong => Some(ByteSerializableType::U64),
        ColumnType::Float => Some(ByteSerializableType::F32),
        ColumnType::Double => Some(ByteSerializableType::F64),
        ColumnType::Bool => Some(ByteSerializableType::Bool),
        ColumnType::String => Some(ByteSerializableType::String),
        ColumnType::DateTime => Some(ByteSerializableType::DateTime),
        ColumnType::Json => None,
    }
}

/// Check every condition against the schema. Returns the matched columns in
/// condition order.
pub(crate) fn validate_attr_query<'a>(
    header: &'a Header,
    query: &AttrQuery,
) -> Result<Vec<&'a Column>> {
    let mut matched = Vec::with_capacity(query.len());
    for (name, _, value) in query {
        let column = header
            .column(name)
            .ok_or_else(|| Error::UnindexedColumn(name.clone()))?;
        if !column.attr_index || header.attr_index_offset(column.index).is_none() {
            return Err(Error::UnindexedColumn(name.clone()));
        }
        let expected = expected_key_type(column.type_)
            .ok_or_else(|| Error::UnsupportedColumnType(column.type_.name().to_string()))?;
        let actual = value.value_type();
        if expected != actual {
            return Err(Error::TypeMismatch {
                column: name.clone(),
                expected: format!("{expected:?}"),
                actual: format!("{actual:?}"),
            });
        }
        matched.push(column);
    }
    Ok(matched)
}

/// Translate to the index-level query (serialized boundary keys).
pub(crate) fn build_query(query: &AttrQuery) -> Query {
    Query {
        conditions: query
            .iter()
            .map(|(name, operator, value)| QueryCondition {
                field: name.clone(),
                operator: *operator,
                key: value.to_bytes(),
            })
            .collect(),
    }
}

/// Deserialize one column's index section into the multi-index, dispatching
/// on the column's declared type.
pub(crate) fn add_column_index(
    multi_index: &mut MultiIndex,
    column: &Column,
    mut bytes: &[u8],
) -> Result<()> {
    let name = column.name.clone();
    match column.type_ {
        ColumnType::Int => {
            multi_index.add_index(name, Box::new(SortedIndex::<i32>::deserialize(&mut bytes)?))
        }
        ColumnType::UInt => {
            multi_index.add_index(name, Box::new(SortedIndex::<u32>::deserialize(&mut bytes)?))
        }
        ColumnType::Long => {
            multi_index.add_index(name, Box::new(SortedIndex::<i64>::deserialize(&mut bytes)?))
        }
        ColumnType::ULong => {
            multi_index.add_index(name, Box::new(SortedIndex::<u64>::deserialize(&mut bytes)?))
        }
        ColumnType::Float => multi_index.add_index(
            name,
            Box::new(SortedIndex::<Float<f32>>::deserialize(&mut bytes)?),
        ),
        ColumnType::Double => multi_index.add_index(
            name,
            Box::new(SortedIndex::<Float<f64>>::deserialize(&mut bytes)?),
        ),
        ColumnType::Bool => {
            multi_index.add_index(name, Box::new(SortedIndex::<bool>::deserialize(&mut bytes)?))
        }
        ColumnType::String => multi_index.add_index(
            name,
            Box::new(SortedIndex::<String>::deserialize(&mut bytes)?),
        ),
        ColumnType::DateTime => multi_index.add_index(
            name,
            Box::new(SortedIndex::<DateTime<Utc>>::deserialize(&mut bytes)?),
        ),
        ColumnType::Json => {
            return Err(Error::UnsupportedColumnType(
                column.type_.name().to_string(),
            ))
        }
    }
    Ok(())
}

/// Canonical string used in query fingerprints: conditions are sorted so
/// equivalent queries share a fingerprint.
pub(crate) fn attr_fingerprint(query: &AttrQuery) -> String {
    let mut parts: Vec<String> = query
        .iter()
        .map(|(name, operator, value)| format!("{name}-{operator:?}-{value:?}"))
        .collect();
    parts.sort();
    parts.join(",")
}
