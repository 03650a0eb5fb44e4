use std::collections::HashMap;

use crate::index::{AnyIndex, ValueOffset};

/// Comparison operators accepted in attribute conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// One condition: a field name, an operator and the serialized boundary key.
#[derive(Debug, Clone)]
pub struct QueryCondition {
    pub field: String,
    pub operator: Operator,
    pub key: Vec<u8>,
}

/// A set of conditions, implicitly AND-combined.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<QueryCondition>,
}

/// A collection of per-field indexes evaluated together.
#[derive(Default)]
pub struct MultiIndex {
    indices: HashMap<String, Box<dyn AnyIndex>>,
}

impl MultiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&mut self, field_name: String, index: Box<dyn AnyIndex>) {
        self.indices.insert(field_name, index);
    }

    pub fn contains(&self, field_name: &str) -> bool {
        self.indices.contains_key(field_name)
    }

    /// Evaluate a query: each condition resolves independently against its
    /// field's index, then candidate sets are intersected starting from the
    /// smallest set. Conditions on unknown fields yield no candidates, which
    /// makes the whole query empty (callers validate fields up front).
    ///
    /// The result is sorted ascending so feature reads stay sequential.
    pub fn query(&self, query: &Query) -> Vec<ValueOffset> {
        let mut candidate_sets: Vec<Vec<ValueOffset>> = Vec::new();

        for condition in &query.conditions {
            let Some(index) = self.indices.get(&condition.field) else {
                return Vec::new();
            };
            let mut offsets = evaluate_condition(index.as_ref(), condition);
            offsets.sort_unstable();
            offsets.dedup();
            candidate_sets.push(offsets);
        }

        if candidate_sets.is_empty() {
            return Vec::new();
        }

        // intersect smallest-first; each pass can only shrink the running set
        candidate_sets.sort_by_key(|set| set.len());
        let mut sets = candidate_sets.into_iter();
        let mut intersection = sets.next().expect("candidate_sets is non-empty");
        for set in sets {
            intersection.retain(|offset| set.binary_search(offset).is_ok());
            if intersection.is_empty() {
                break;
            }
        }
        intersection
    }
}

fn evaluate_condition(index: &dyn AnyIndex, condition: &QueryCondition) -> Vec<ValueOffset> {
    let key = condition.key.as_slice();
    match condition.operator {
        Operator::Eq => index.query_exact_bytes(key),
        Operator::Ge => index.query_range_bytes(Some(key), None),
        Operator::Gt => {
            // keys strictly greater: [key, ..) minus the exact matches
            let offsets = index.query_range_bytes(Some(key), None);
            let eq = index.query_exact_bytes(key);
            offsets.into_iter().filter(|o| !eq.contains(o)).collect()
        }
        Operator::Lt => index.query_range_bytes(None, Some(key)),
        Operator::Le => {
            // [.., key) plus the exact matches
            let mut offsets = index.query_range_bytes(None, Some(key));
            offsets.extend(index.query_exact_bytes(key));
            offsets
        }
    }
}
