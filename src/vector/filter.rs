//! Metadata predicates for filtered search.
//!
//! A [`FilterClause`] holds `must` (AND) and `must_not` (AND-NOT)
//! conditions. Clauses are validated once before a search starts, so a
//! malformed predicate fails with `InvalidFilter` instead of silently
//! matching nothing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

/// Nullable scalar stored in a metadata column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn loose_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Metadata of one record. Ordered so serialized rows are stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Comparison operator for filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    NotNull,
}

impl FilterOperator {
    fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

/// A single condition on a metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MetadataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<MetadataValue>>,
}

impl FilterCondition {
    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::with_value(field, FilterOperator::Eq, value)
    }

    pub fn with_value(
        field: impl Into<String>,
        op: FilterOperator,
        value: impl Into<MetadataValue>,
    ) -> Self {
        Self {
            field: field.into(),
            op,
            value: Some(value.into()),
            values: None,
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<MetadataValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOperator::In,
            value: None,
            values: Some(values),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOperator::IsNull,
            value: None,
            values: None,
        }
    }

    fn validate(&self) -> RagResult<()> {
        if self.field.is_empty() {
            return Err(RagError::InvalidFilter("empty field name".to_string()));
        }
        let invalid = |msg: &str| {
            Err(RagError::InvalidFilter(format!(
                "field '{}' with {:?}: {msg}",
                self.field, self.op
            )))
        };

        match self.op {
            FilterOperator::Eq | FilterOperator::Ne => match &self.value {
                None => invalid("requires 'value'"),
                Some(MetadataValue::Null) => invalid("compare against null with is_null/not_null"),
                Some(_) if self.values.is_some() => invalid("takes 'value', not 'values'"),
                Some(_) => Ok(()),
            },
            op if op.is_ordering() => match &self.value {
                Some(MetadataValue::Float(x)) if x.is_nan() => invalid("NaN is not comparable"),
                Some(MetadataValue::Integer(_) | MetadataValue::Float(_) | MetadataValue::String(_)) => {
                    if self.values.is_some() {
                        invalid("takes 'value', not 'values'")
                    } else {
                        Ok(())
                    }
                }
                Some(_) => invalid("requires a number or string"),
                None => invalid("requires 'value'"),
            },
            FilterOperator::In => match &self.values {
                Some(values) if values.is_empty() => invalid("'values' must not be empty"),
                Some(values) if values.iter().any(MetadataValue::is_null) => {
                    invalid("'values' must not contain null")
                }
                Some(_) if self.value.is_some() => invalid("takes 'values', not 'value'"),
                Some(_) => Ok(()),
                None => invalid("requires 'values'"),
            },
            _ => {
                if self.value.is_some() || self.values.is_some() {
                    invalid("takes no operand")
                } else {
                    Ok(())
                }
            }
        }
    }

    fn evaluate(&self, metadata: &Metadata) -> bool {
        let field = metadata.get(&self.field).unwrap_or(&MetadataValue::Null);

        match self.op {
            FilterOperator::IsNull => field.is_null(),
            FilterOperator::NotNull => !field.is_null(),
            _ if field.is_null() => false,
            FilterOperator::Eq => self.value.as_ref().is_some_and(|v| field.loose_eq(v)),
            FilterOperator::Ne => self.value.as_ref().is_some_and(|v| !field.loose_eq(v)),
            FilterOperator::In => self
                .values
                .as_ref()
                .is_some_and(|vs| vs.iter().any(|v| field.loose_eq(v))),
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
                let Some(ord) = self.value.as_ref().and_then(|v| field.loose_cmp(v)) else {
                    return false;
                };
                match self.op {
                    FilterOperator::Gt => ord == Ordering::Greater,
                    FilterOperator::Gte => ord != Ordering::Less,
                    FilterOperator::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            }
        }
    }
}

/// Metadata filter clause with `must` (AND) and `must_not` (AND-NOT) conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(default)]
    pub must: Vec<FilterCondition>,
    #[serde(default)]
    pub must_not: Vec<FilterCondition>,
}

impl FilterClause {
    /// Clause requiring every condition in `must`.
    #[must_use]
    pub fn must(conditions: Vec<FilterCondition>) -> Self {
        Self {
            must: conditions,
            must_not: Vec::new(),
        }
    }

    #[must_use]
    pub fn and_not(mut self, condition: FilterCondition) -> Self {
        self.must_not.push(condition);
        self
    }

    /// Rejects malformed conditions with `InvalidFilter`.
    pub fn validate(&self) -> RagResult<()> {
        self.must
            .iter()
            .chain(&self.must_not)
            .try_for_each(FilterCondition::validate)
    }

    /// Whether `metadata` passes the clause. Missing fields read as null.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.must.iter().all(|c| c.evaluate(metadata))
            && !self.must_not.iter().any(|c| c.evaluate(metadata))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: Vec<(&str, MetadataValue)>) -> Metadata {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_metadata_value_json_shape() {
        let m = meta(vec![
            ("a", MetadataValue::Null),
            ("b", 3i64.into()),
            ("c", 0.5.into()),
            ("d", "x".into()),
            ("e", true.into()),
        ]);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"a":null,"b":3,"c":0.5,"d":"x","e":true}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_must_and_must_not() {
        let m = meta(vec![("lang", "rust".into()), ("year", 2024i64.into())]);

        let clause = FilterClause::must(vec![FilterCondition::eq("lang", "rust")]);
        assert!(clause.matches(&m));

        let clause = clause.and_not(FilterCondition::with_value(
            "year",
            FilterOperator::Gte,
            2020i64,
        ));
        assert!(!clause.matches(&m));
    }

    #[test]
    fn test_ordering_mixes_integers_and_floats() {
        let m = meta(vec![("score", 7i64.into())]);
        let gt = FilterClause::must(vec![FilterCondition::with_value(
            "score",
            FilterOperator::Gt,
            6.5,
        )]);
        let lte = FilterClause::must(vec![FilterCondition::with_value(
            "score",
            FilterOperator::Lte,
            7.0,
        )]);
        assert!(gt.matches(&m));
        assert!(lte.matches(&m));
    }

    #[test]
    fn test_null_semantics() {
        let m = meta(vec![("author", MetadataValue::Null)]);
        assert!(FilterClause::must(vec![FilterCondition::is_null("author")]).matches(&m));
        assert!(FilterClause::must(vec![FilterCondition::is_null("missing")]).matches(&m));
        // Null never satisfies a value comparison, not even `ne`.
        assert!(!FilterClause::must(vec![FilterCondition::with_value(
            "author",
            FilterOperator::Ne,
            "bob",
        )])
        .matches(&m));
    }

    #[test]
    fn test_in_operator() {
        let m = meta(vec![("tag", "b".into())]);
        let clause = FilterClause::must(vec![FilterCondition::one_of(
            "tag",
            vec!["a".into(), "b".into()],
        )]);
        assert!(clause.matches(&m));
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let cases = [
            FilterCondition {
                field: "x".into(),
                op: FilterOperator::Eq,
                value: None,
                values: None,
            },
            FilterCondition::with_value("x", FilterOperator::Gt, true),
            FilterCondition::one_of("x", vec![]),
            FilterCondition::with_value("", FilterOperator::Eq, 1i64),
            FilterCondition::with_value("x", FilterOperator::IsNull, 1i64),
            FilterCondition::with_value("x", FilterOperator::Eq, MetadataValue::Null),
        ];
        for cond in cases {
            let clause = FilterClause::must(vec![cond.clone()]);
            assert!(
                matches!(clause.validate(), Err(RagError::InvalidFilter(_))),
                "{cond:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_deserialize_clause() {
        let clause: FilterClause = serde_json::from_str(
            r#"{"must":[{"field":"lang","op":"eq","value":"go"}],
                "must_not":[{"field":"draft","op":"not_null"}]}"#,
        )
        .unwrap();
        clause.validate().unwrap();
        assert_eq!(clause.must[0].op, FilterOperator::Eq);
        assert_eq!(clause.must_not[0].op, FilterOperator::NotNull);
    }
}
