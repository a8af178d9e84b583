//! Fetch specifications: which records to retrieve and in what order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{Fields, Record};

/// Comparison operator used in a [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// A boolean expression over record fields.
///
/// Missing fields compare as `null`. Predicates are plain data, so two
/// predicates built the same way compare equal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every record.
    #[default]
    True,
    /// Compares a field against a constant.
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    /// Matches when the field equals any of the values.
    In { field: String, values: Vec<Value> },
    /// Matches when the field is present and not null.
    Exists(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn at_most(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Le, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn at_least(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ge, value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            field: field.into(),
            values,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Predicate::Exists(field.into())
    }

    /// Conjunction that drops `True` operands and flattens nested `And`s.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Disjunction of two predicates.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut left), p) => {
                left.push(p);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against a set of field values.
    pub fn evaluate(&self, fields: &Fields) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { field, op, value } => {
                let actual = fields.get(field).unwrap_or(&Value::Null);
                match op {
                    Comparison::Eq | Comparison::Ne => op.holds(compare_values(actual, value)),
                    _ => comparable(actual, value) && op.holds(compare_values(actual, value)),
                }
            }
            Predicate::In { field, values } => {
                let actual = fields.get(field).unwrap_or(&Value::Null);
                values
                    .iter()
                    .any(|v| compare_values(actual, v) == Ordering::Equal)
            }
            Predicate::Exists(field) => fields.get(field).is_some_and(|v| !v.is_null()),
            Predicate::And(predicates) => predicates.iter().all(|p| p.evaluate(fields)),
            Predicate::Or(predicates) => predicates.iter().any(|p| p.evaluate(fields)),
            Predicate::Not(predicate) => !predicate.evaluate(fields),
        }
    }

    /// Returns every field name the predicate refers to.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::True => {}
            Predicate::Compare { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Exists(field) => out.push(field.as_str()),
            Predicate::And(predicates) | Predicate::Or(predicates) => {
                for p in predicates {
                    p.collect_fields(out);
                }
            }
            Predicate::Not(p) => p.collect_fields(out),
        }
    }
}

/// Ordered comparisons only apply between values of the same kind.
fn comparable(a: &Value, b: &Value) -> bool {
    rank(a) == rank(b)
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for sorting and comparisons.
///
/// Values of different kinds order null < bool < number < string < array <
/// object. Numbers compare numerically, strings lexicographically. Arrays
/// and objects of the same kind compare equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Sort direction for one ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One `(field, direction)` ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub direction: SortDirection,
}

impl SortDescriptor {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Returns the same key with the direction flipped.
    pub fn reversed(&self) -> Self {
        Self {
            field: self.field.clone(),
            direction: match self.direction {
                SortDirection::Ascending => SortDirection::Descending,
                SortDirection::Descending => SortDirection::Ascending,
            },
        }
    }
}

/// Builder for constructing fetch specifications.
///
/// A fetch specification names an entity, a predicate over its fields, an
/// ordering, and an optional limit. Two specifications compare equal when
/// all four parts do, which is how the query engine decides whether a new
/// filter needs a new fetch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchSpec {
    /// Entity whose records are retrieved.
    pub entity: String,

    /// Records must satisfy this predicate.
    pub predicate: Predicate,

    /// Ordering keys, most significant first.
    pub ordering: Vec<SortDescriptor>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl FetchSpec {
    /// Creates a specification matching every record of an entity.
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Replaces the predicate.
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Adds a predicate conjunctively.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    /// Replaces the ordering.
    pub fn ordering(mut self, ordering: Vec<SortDescriptor>) -> Self {
        self.ordering = ordering;
        self
    }

    /// Appends an ordering key.
    pub fn order_by(mut self, descriptor: SortDescriptor) -> Self {
        self.ordering.push(descriptor);
        self
    }

    /// Limits the number of records returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record belongs to the entity and satisfies the predicate.
    pub fn matches(&self, record: &Record) -> bool {
        record.entity() == self.entity && record.with_fields(|f| self.predicate.evaluate(f))
    }

    /// Compares two field sets by this specification's ordering.
    pub fn compare(&self, a: &Fields, b: &Fields) -> Ordering {
        for descriptor in &self.ordering {
            let left = a.get(&descriptor.field).unwrap_or(&Value::Null);
            let right = b.get(&descriptor.field).unwrap_or(&Value::Null);
            let ordering = match descriptor.direction {
                SortDirection::Ascending => compare_values(left, right),
                SortDirection::Descending => compare_values(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Returns every field name referenced by the predicate or the ordering.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = self.predicate.referenced_fields();
        fields.extend(self.ordering.iter().map(|d| d.field.as_str()));
        fields
    }
}
