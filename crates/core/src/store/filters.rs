// List filters for `get_list`: `{field: value}` or `{field: [op, operand]}`.

use std::cmp::Ordering;

use docmirror_common::Document;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
}

impl Filter {
    /// Parse one filter condition. A bare value means equality; a two-element
    /// array with a known operator is an operator filter.
    pub fn parse(condition: &Value) -> Self {
        if let Value::Array(parts) = condition {
            if let [Value::String(op), operand] = parts.as_slice() {
                match op.to_ascii_lowercase().as_str() {
                    "=" => return Self::Eq(operand.clone()),
                    "in" => return Self::In(as_list(operand)),
                    "not in" => return Self::NotIn(as_list(operand)),
                    "<" => return Self::Lt(operand.clone()),
                    "<=" => return Self::Le(operand.clone()),
                    ">" => return Self::Gt(operand.clone()),
                    ">=" => return Self::Ge(operand.clone()),
                    _ => {}
                }
            }
        }
        Self::Eq(condition.clone())
    }

    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            Self::Eq(expected) => loosely_equal(value, expected),
            Self::In(options) => options.iter().any(|option| loosely_equal(value, option)),
            Self::NotIn(options) => !options.iter().any(|option| loosely_equal(value, option)),
            Self::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Self::Le(bound) => matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal)),
            Self::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Self::Ge(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

/// Conjunction of per-field filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, Filter)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self(map.iter().map(|(field, condition)| (field.clone(), Filter::parse(condition))).collect())
    }

    pub fn with(mut self, fieldname: impl Into<String>, filter: Filter) -> Self {
        self.0.push((fieldname.into(), filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(fieldname, filter)| match fieldname.as_str() {
            "name" => filter.matches(Some(&Value::String(doc.name.clone()))),
            "doctype" => filter.matches(Some(&Value::String(doc.doctype.clone()))),
            _ => filter.matches(doc.get(fieldname)),
        })
    }
}

fn as_list(operand: &Value) -> Vec<Value> {
    match operand {
        Value::Array(items) => items.clone(),
        Value::String(text) => {
            text.split(',').map(|item| Value::String(item.trim().to_string())).collect()
        }
        other => vec![other.clone()],
    }
}

/// Numbers compare numerically, so `1` equals `1.0`; everything else must
/// match exactly.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
