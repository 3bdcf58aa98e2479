//! Field-path condition evaluation for endpoint filters.
//!
//! Conditions are evaluated against the serialized envelope via a safe
//! dotted-path accessor over `serde_json::Value` — no dynamic property
//! access.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

/// One filter condition against a dotted field path into the envelope,
/// e.g. `{"field": "metadata.user_id", "operator": "equals", "value": "u-1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl FieldCondition {
    /// Evaluate this condition against the serialized envelope.
    ///
    /// A missing field fails every operator except `not_equals`,
    /// `not_contains` and `not_in`, which hold vacuously.
    pub fn matches(&self, envelope: &Value) -> bool {
        let target = lookup_path(envelope, &self.field);

        match self.operator {
            ConditionOperator::Equals => target == Some(&self.value),
            ConditionOperator::NotEquals => target != Some(&self.value),
            ConditionOperator::Contains => target.is_some_and(|t| contains(t, &self.value)),
            ConditionOperator::NotContains => !target.is_some_and(|t| contains(t, &self.value)),
            ConditionOperator::GreaterThan => compare(target, &self.value)
                .is_some_and(|ord| ord == std::cmp::Ordering::Greater),
            ConditionOperator::LessThan => {
                compare(target, &self.value).is_some_and(|ord| ord == std::cmp::Ordering::Less)
            }
            ConditionOperator::In => member_of(target, &self.value),
            ConditionOperator::NotIn => !member_of(target, &self.value),
        }
    }
}

/// Walk a dotted path through objects and array indices.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn contains(target: &Value, needle: &Value) -> bool {
    match target {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.contains(needle),
        _ => false,
    }
}

fn compare(target: Option<&Value>, value: &Value) -> Option<std::cmp::Ordering> {
    let lhs = target?.as_f64()?;
    let rhs = value.as_f64()?;
    lhs.partial_cmp(&rhs)
}

fn member_of(target: Option<&Value>, set: &Value) -> bool {
    match (target, set) {
        (Some(t), Value::Array(items)) => items.contains(t),
        _ => false,
    }
}
