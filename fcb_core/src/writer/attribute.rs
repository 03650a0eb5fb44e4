//! Attribute schema inference.
//!
//! The writer builds the column schema by scanning feature attributes:
//! each attribute name gets a column with a type inferred from its JSON
//! values, in first-seen order.

use serde_json::Value;

use crate::header::{Column, ColumnType};

#[derive(Debug, Clone, Default)]
pub struct AttributeSchema {
    columns: Vec<(String, ColumnType)>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Register every attribute of one attribute bag.
    pub fn add_attributes(&mut self, attributes: &Value) {
        let Some(map) = attributes.as_object() else {
            return;
        };
        for (name, value) in map {
            let Some(inferred) = infer_type(value) else {
                continue;
            };
            match self.columns.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = widen(*existing, inferred),
                None => self.columns.push((name.clone(), inferred)),
            }
        }
    }

    /// Resolve to header columns, flagging the named attributes as indexed.
    pub fn to_columns(&self, attr_indices: Option<&[String]>) -> Vec<Column> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, (name, type_))| Column {
                index: i as u16,
                name: name.clone(),
                type_: *type_,
                title: None,
                description: None,
                attr_index: attr_indices
                    .map(|names| names.iter().any(|n| n == name))
                    .unwrap_or(false),
            })
            .collect()
    }
}

fn infer_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Bool),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(ColumnType::Long)
            } else {
                Some(ColumnType::Double)
            }
        }
        Value::String(_) => Some(ColumnType::String),
        Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
    }
}

/// Reconcile two observed types for the same attribute. Mixed integer and
/// float observations widen to Double; anything else keeps the first type.
fn widen(existing: ColumnType, observed: ColumnType) -> ColumnType {
    match (existing, observed) {
        (ColumnType::Long, ColumnType::Double) | (ColumnType::Double, ColumnType::Long) => {
            ColumnType::Double
        }
        _ => existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_and_orders_columns() {
        let mut schema = AttributeSchema::new();
        schema.add_attributes(&json!({
            "height": 10.5,
            "identificatie": "NL.1",
            "storeys": 3,
            "monument": true,
        }));
        // serde_json with preserve_order keeps insertion order
        let columns = schema.to_columns(Some(&["height".to_string()]));
        assert_eq!(columns.len(), 4);
        let height = columns.iter().find(|c| c.name == "height").unwrap();
        assert_eq!(height.type_, ColumnType::Double);
        assert!(height.attr_index);
        let storeys = columns.iter().find(|c| c.name == "storeys").unwrap();
        assert_eq!(storeys.type_, ColumnType::Long);
        assert!(!storeys.attr_index);
    }

    #[test]
    fn widens_mixed_numbers_to_double() {
        let mut schema = AttributeSchema::new();
        schema.add_attributes(&json!({ "value": 1 }));
        schema.add_attributes(&json!({ "value": 1.5 }));
        let columns = schema.to_columns(None);
        assert_eq!(columns[0].type_, ColumnType::Double);
    }
}
